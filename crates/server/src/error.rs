use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("no ports available")]
    NoPortsAvailable,
    #[error("no user ids available")]
    NoUserIdsAvailable,
    #[error("socket fault: {0}")]
    Io(#[from] io::Error),
}
