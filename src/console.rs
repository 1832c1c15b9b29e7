//! Line-oriented front end: turns typed lines into [`Command`]s and events
//! into timestamped log lines.
//!
//! ```text
//! connect [endpoint] [client_id]
//! disconnect
//! sub [topic]
//! pub <topic> <message...>
//! clear | help | quit
//! ```

use tracing::{error, info};

use crate::session::{Command, Event};

pub const HELP: &str = "\
commands:
  connect [endpoint] [client_id]   connect to the broker (defaults from config)
  disconnect                       close the session
  sub [topic]                      subscribe to a topic filter
  pub <topic> <message...>         publish the rest of the line
  clear                            clear the log
  help                             show this text
  quit                             disconnect and exit";

/// Values used when a command leaves an argument out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleDefaults {
    pub endpoint: String,
    pub client_id: String,
    pub topic: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Session(Command),
    Clear,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("unknown command '{0}', type 'help' for a list")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parses one input line. Blank lines yield `Ok(None)`.
///
/// Empty topics or payloads are passed through untouched; the session
/// manager reports them as invalid arguments.
pub fn parse_line(
    line: &str,
    defaults: &ConsoleDefaults,
) -> Result<Option<ConsoleInput>, CommandParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let input = match word.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "connect" => {
            let mut args = rest.split_whitespace();
            let endpoint = args.next().unwrap_or(defaults.endpoint.as_str()).to_string();
            let client_identity = args.next().unwrap_or(defaults.client_id.as_str()).to_string();
            if args.next().is_some() {
                return Err(CommandParseError::Usage("connect [endpoint] [client_id]"));
            }
            ConsoleInput::Session(Command::Connect {
                endpoint,
                client_identity,
            })
        }
        "disconnect" => ConsoleInput::Session(Command::Disconnect),
        "sub" | "subscribe" => {
            let topic = if rest.is_empty() {
                defaults.topic.as_str()
            } else {
                rest
            };
            ConsoleInput::Session(Command::Subscribe {
                topic: topic.to_string(),
            })
        }
        "pub" | "publish" => {
            if rest.is_empty() {
                return Err(CommandParseError::Usage("pub <topic> <message...>"));
            }
            let (topic, message) = match rest.split_once(char::is_whitespace) {
                Some((topic, message)) => (topic, message.trim()),
                None => (rest, ""),
            };
            ConsoleInput::Session(Command::Publish {
                topic: topic.to_string(),
                payload: message.as_bytes().to_vec(),
            })
        }
        "clear" => ConsoleInput::Clear,
        "help" | "?" => ConsoleInput::Help,
        "quit" | "exit" => ConsoleInput::Quit,
        other => return Err(CommandParseError::Unknown(other.to_string())),
    };
    Ok(Some(input))
}

/// Unwraps one read from the input stream. End of input and read errors
/// (invalid UTF-8 included) both yield `None` so the caller can shut down
/// cleanly.
pub fn accept_line(read: std::io::Result<Option<String>>) -> Option<String> {
    match read {
        Ok(Some(line)) => Some(line),
        Ok(None) => {
            info!("Input closed");
            None
        }
        Err(e) => {
            error!("Failed to read input: {}", e);
            None
        }
    }
}

/// Log line shown when a command is handed to the session manager.
pub fn describe(command: &Command) -> String {
    match command {
        Command::Connect { endpoint, .. } => format!("[connecting...] {endpoint}"),
        Command::Disconnect => "[disconnecting...]".to_string(),
        Command::Subscribe { topic } => format!("[subscribing...] {topic}"),
        Command::Publish { topic, payload } => {
            format!("[sending...] {topic} -> {}", String::from_utf8_lossy(payload))
        }
    }
}

/// `[HH:MM:SS] <event>`
pub fn render(event: &Event) -> String {
    format!("[{}] {}", event.timestamp.format("%H:%M:%S"), event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ConsoleDefaults {
        ConsoleDefaults {
            endpoint: "tcp://broker.emqx.io:1883".to_string(),
            client_id: "client_1".to_string(),
            topic: "test/topic".to_string(),
        }
    }

    fn session(line: &str) -> Command {
        match parse_line(line, &defaults()) {
            Ok(Some(ConsoleInput::Session(command))) => command,
            other => panic!("expected a session command for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn connect_falls_back_to_defaults() {
        assert_eq!(
            session("connect"),
            Command::Connect {
                endpoint: "tcp://broker.emqx.io:1883".to_string(),
                client_identity: "client_1".to_string(),
            }
        );
        assert_eq!(
            session("  CONNECT broker:1883 c1 "),
            Command::Connect {
                endpoint: "broker:1883".to_string(),
                client_identity: "c1".to_string(),
            }
        );
        assert_eq!(
            parse_line("connect a b c", &defaults()),
            Err(CommandParseError::Usage("connect [endpoint] [client_id]"))
        );
    }

    #[test]
    fn publish_keeps_rest_of_line() {
        assert_eq!(
            session("pub t/1 hello   there"),
            Command::Publish {
                topic: "t/1".to_string(),
                payload: b"hello   there".to_vec(),
            }
        );
        assert_eq!(
            session("pub t/1"),
            Command::Publish {
                topic: "t/1".to_string(),
                payload: Vec::new(),
            }
        );
        assert!(matches!(
            parse_line("pub", &defaults()),
            Err(CommandParseError::Usage(_))
        ));
    }

    #[test]
    fn subscribe_uses_default_topic() {
        assert_eq!(
            session("sub"),
            Command::Subscribe {
                topic: "test/topic".to_string()
            }
        );
        assert_eq!(
            session("subscribe sensors/+/temp"),
            Command::Subscribe {
                topic: "sensors/+/temp".to_string()
            }
        );
    }

    #[test]
    fn local_commands_and_errors() {
        assert_eq!(parse_line("   ", &defaults()), Ok(None));
        assert_eq!(parse_line("clear", &defaults()), Ok(Some(ConsoleInput::Clear)));
        assert_eq!(parse_line("quit", &defaults()), Ok(Some(ConsoleInput::Quit)));
        assert_eq!(parse_line("help", &defaults()), Ok(Some(ConsoleInput::Help)));
        assert_eq!(
            parse_line("launch", &defaults()),
            Err(CommandParseError::Unknown("launch".to_string()))
        );
    }

    #[tokio::test]
    async fn unreadable_input_ends_the_session() {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let mut lines = BufReader::new(&b"connect\n\xff\xfe\n"[..]).lines();
        assert_eq!(
            accept_line(lines.next_line().await),
            Some("connect".to_string())
        );
        assert_eq!(accept_line(lines.next_line().await), None);
        assert_eq!(accept_line(Ok(None)), None);
    }

    #[test]
    fn describes_pending_commands() {
        assert_eq!(
            describe(&session("pub t/1 hi")),
            "[sending...] t/1 -> hi"
        );
        assert_eq!(describe(&Command::Disconnect), "[disconnecting...]");
    }
}
