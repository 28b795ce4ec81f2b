use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "tincan",
    about = "Serverless, end-to-end encrypted group chat for your local network",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "TINCAN_RELAY_URL",
        help = "Signaling relay, e.g. 192.168.1.10:8080 or https://relay.example"
    )]
    pub relay: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(flatten)]
    pub timing: TimingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "TINCAN_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "TINCAN_LOG_FILE",
        help = "Write logs to this file instead of stderr"
    )]
    pub file: Option<PathBuf>,

    #[arg(
        long = "log-filter",
        global = true,
        value_name = "DIRECTIVES",
        env = "TINCAN_LOG_FILTER",
        help = "Raw tracing filter, e.g. tincan=trace,webrtc_ice=debug; overrides --log-level"
    )]
    pub filter: Option<String>,

    #[arg(
        long = "trace-deps",
        global = true,
        env = "TINCAN_TRACE_DEPS",
        value_parser = FalseyValueParser::new(),
        help = "Let WebRTC and HTTP crates log at the chosen level too"
    )]
    pub trace_deps: bool,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
            filter: self.filter.clone(),
            trace_deps: self.trace_deps,
        }
    }
}

/// Protocol timings. Unset flags keep what the environment or the defaults chose.
#[derive(Args, Debug, Clone, Default)]
pub struct TimingArgs {
    /// How often a live session polls the relay
    #[arg(
        long = "poll-interval-ms",
        global = true,
        value_name = "MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_ms: Option<u64>,

    /// How often the room list is rescanned
    #[arg(
        long = "discovery-interval-ms",
        global = true,
        value_name = "MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub discovery_interval_ms: Option<u64>,

    /// How often a host re-advertises its room
    #[arg(
        long = "heartbeat-interval-ms",
        global = true,
        value_name = "MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub heartbeat_interval_ms: Option<u64>,

    /// How long a joiner waits to be admitted
    #[arg(
        long = "handshake-timeout-ms",
        global = true,
        value_name = "MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub handshake_timeout_ms: Option<u64>,
}

impl TimingArgs {
    pub fn apply(&self, config: &mut ClientConfig) {
        let overrides = [
            (self.poll_interval_ms, &mut config.poll_interval),
            (self.discovery_interval_ms, &mut config.discovery_interval),
            (self.heartbeat_interval_ms, &mut config.heartbeat_interval),
            (self.handshake_timeout_ms, &mut config.handshake_timeout),
        ];
        for (millis, slot) in overrides {
            if let Some(millis) = millis {
                *slot = Duration::from_millis(millis);
            }
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List rooms advertised on this network
    Rooms(RoomsArgs),
    /// Open a new room
    Host(HostArgs),
    /// Join a room by host id or room name
    Join(JoinArgs),
}

#[derive(Args, Debug, Default)]
pub struct RoomsArgs {
    #[arg(long, help = "Keep scanning and print the list whenever it changes")]
    pub watch: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct IdentityArgs {
    #[arg(long, env = "TINCAN_NAME", help = "Display name shown to other peers")]
    pub name: Option<String>,

    #[arg(long, help = "Prompt for a room password")]
    pub password: bool,

    #[arg(
        long = "password-value",
        env = "TINCAN_ROOM_PASSWORD",
        hide = true,
        hide_env_values = true
    )]
    pub password_value: Option<String>,
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Name other peers see in their room list
    pub room: String,

    #[command(flatten)]
    pub identity: IdentityArgs,
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Host peer id (peer-xxxxxxx) or advertised room name
    pub target: String,

    #[command(flatten)]
    pub identity: IdentityArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_with_password_prompt() {
        let cli = Cli::try_parse_from(["tincan", "host", "lounge", "--password", "--name", "ana"])
            .unwrap();
        match cli.command {
            Command::Host(args) => {
                assert_eq!(args.room, "lounge");
                assert!(args.identity.password);
                assert_eq!(args.identity.name.as_deref(), Some("ana"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cli.logging.level, LogLevel::Warn);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tincan",
            "join",
            "peer-abc1234",
            "--relay",
            "10.0.0.2:8080",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.relay.as_deref(), Some("10.0.0.2:8080"));
        assert_eq!(cli.logging.level, LogLevel::Debug);
        assert!(matches!(cli.command, Command::Join(ref args) if args.target == "peer-abc1234"));
    }

    #[test]
    fn timing_flags_override_only_what_they_name() {
        let cli = Cli::try_parse_from([
            "tincan",
            "rooms",
            "--poll-interval-ms",
            "500",
            "--handshake-timeout-ms",
            "2500",
        ])
        .unwrap();
        let mut config = ClientConfig::default();
        cli.timing.apply(&mut config);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.handshake_timeout, Duration::from_millis(2500));
        assert_eq!(config.discovery_interval, ClientConfig::default().discovery_interval);
        assert_eq!(config.heartbeat_interval, ClientConfig::default().heartbeat_interval);

        assert!(Cli::try_parse_from(["tincan", "rooms", "--poll-interval-ms", "0"]).is_err());
    }

    #[test]
    fn log_filter_reaches_the_logging_config() {
        let cli = Cli::try_parse_from([
            "tincan",
            "rooms",
            "--log-filter",
            "tincan=trace",
            "--trace-deps",
        ])
        .unwrap();
        let config = cli.logging.to_config();
        assert_eq!(config.filter.as_deref(), Some("tincan=trace"));
        assert!(config.trace_deps);
    }

    #[test]
    fn rooms_watch_flag() {
        let cli = Cli::try_parse_from(["tincan", "rooms", "--watch"]).unwrap();
        assert!(matches!(cli.command, Command::Rooms(RoomsArgs { watch: true })));
    }
}
