use thiserror::Error;

/// Errors produced by the core primitives.
///
/// None of these escape a client's `push` path as panics or returned
/// failures: the client resolves every one of them to a dropped record and
/// a lost-counter increment.
#[derive(Error, Debug)]
pub enum Error {
    /// The encoded record would exceed the configured maximum record size.
    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    /// Accepting the bytes would push resident memory past the ceiling.
    #[error("memory ceiling reached: {requested} bytes refused")]
    CapacityExceeded { requested: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A record stream did not decode cleanly.
    #[error("malformed record stream at offset {offset}")]
    MalformedRecord { offset: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
