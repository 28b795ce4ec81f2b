use std::collections::HashSet;
use tincan_signal::Envelope;

/// Remembers which relay envelopes a poller has already handled.
///
/// The relay hands back every live envelope on each poll. Envelopes are ordered by relay
/// timestamp; the cursor keeps the newest timestamp seen plus the ids seen at exactly that
/// timestamp, which is enough to skip everything already processed.
#[derive(Debug, Default, Clone)]
pub struct SignalCursor {
    watermark: i64,
    at_watermark: HashSet<String>,
}

impl SignalCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    /// The not-yet-seen envelopes of `envelopes`, in relay order, marking them seen.
    pub fn fresh(&mut self, mut envelopes: Vec<Envelope>) -> Vec<Envelope> {
        envelopes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        envelopes.retain(|envelope| self.admit(envelope));
        envelopes
    }

    fn admit(&mut self, envelope: &Envelope) -> bool {
        if envelope.timestamp < self.watermark {
            return false;
        }
        if envelope.timestamp > self.watermark {
            self.watermark = envelope.timestamp;
            self.at_watermark.clear();
        }
        self.at_watermark.insert(envelope.id.clone())
    }
}
