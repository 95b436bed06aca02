use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("client is closed")]
    ClientClosed,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Core(#[from] airlock_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
