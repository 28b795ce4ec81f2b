/// One line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Say(String),
    Who,
    Rename(String),
    BurnLogs,
    BurnChat,
    Promote(String),
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub const HELP: &str = "\
/who              list members
/name <name>      change your display name
/burn-logs        (host) clear everyone's history
/burn-chat        (host) wipe the room and disconnect everyone
/promote <peer>   (host) hand the host role to a member
/quit             leave the room";

pub fn parse(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };
    let (verb, rest) = match command.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (command, ""),
    };
    match (verb, rest) {
        ("who", _) => Input::Who,
        ("help", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        ("burn-logs", _) => Input::BurnLogs,
        ("burn-chat", _) => Input::BurnChat,
        ("name", "") => Input::Invalid("usage: /name <display name>".into()),
        ("name", name) => Input::Rename(name.to_string()),
        ("promote", "") => Input::Invalid("usage: /promote <peer id or name>".into()),
        ("promote", peer) => Input::Promote(peer.to_string()),
        _ => Input::Invalid(format!("unknown command /{verb}; try /help")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(parse("  hi there "), Input::Say("hi there".into()));
        assert_eq!(parse("   "), Input::Empty);
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(parse("/name  Dana K"), Input::Rename("Dana K".into()));
        assert_eq!(parse("/promote peer-abc1234"), Input::Promote("peer-abc1234".into()));
        assert!(matches!(parse("/promote"), Input::Invalid(_)));
        assert!(matches!(parse("/name"), Input::Invalid(_)));
    }

    #[test]
    fn bare_commands() {
        assert_eq!(parse("/who"), Input::Who);
        assert_eq!(parse("/burn-logs"), Input::BurnLogs);
        assert_eq!(parse("/burn-chat"), Input::BurnChat);
        assert_eq!(parse("/exit"), Input::Quit);
        assert!(matches!(parse("/dance"), Input::Invalid(message) if message.contains("/dance")));
    }
}
