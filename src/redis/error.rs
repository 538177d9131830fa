use thiserror::Error;

use super::resp::RespValue;

/// The wire-visible error taxonomy. Anything else a handler returns is
/// treated as a connection-terminating protocol violation rather than a
/// reply the peer can be sent.
#[derive(Debug, Error)]
pub enum RedisError {
    #[error("ERR unknown command")]
    UnknownCommand,
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongArity { command: String },
}

impl RedisError {
    pub fn to_resp(&self) -> RespValue {
        RespValue::simple_error(self.to_string())
    }
}
