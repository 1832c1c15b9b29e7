use super::event::Operation;

/// Request submitted to [`SessionManager::submit`](super::SessionManager::submit).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Connect {
        endpoint: String,
        client_identity: String,
    },
    Disconnect,
    Subscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
    },
}

impl Command {
    pub fn operation(&self) -> Operation {
        match self {
            Command::Connect { .. } => Operation::Connect,
            Command::Disconnect => Operation::Disconnect,
            Command::Subscribe { .. } => Operation::Subscribe,
            Command::Publish { .. } => Operation::Publish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_each_command() {
        let publish = Command::Publish {
            topic: "t/1".to_string(),
            payload: b"hi".to_vec(),
        };
        assert_eq!(publish.operation(), Operation::Publish);
        assert_eq!(Command::Disconnect.operation().to_string(), "disconnect");
    }
}
