use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport is not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(String),

    #[error("pairing code request failed: {0}")]
    Pairing(String),

    #[error("credential persistence failed: {0}")]
    Persist(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
