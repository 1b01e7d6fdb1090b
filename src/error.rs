use crate::model::MovieId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("username is already taken")]
    DuplicateUsername,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    #[error("duration must be a positive number of minutes, got {0}")]
    InvalidDuration(i64),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unknown action: {0}")]
    InvalidAction(String),

    #[error("segment width must be at least one second")]
    InvalidSegmentWidth,

    #[error("movie {0} not found")]
    NotFound(MovieId),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] bincode::Error),

    #[error("password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),
}

impl Error {
    /// Errors caused by the caller's input rather than by the store.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            Error::InvalidRating(_)
            | Error::InvalidDuration(_)
            | Error::InvalidTimestamp(_)
            | Error::InvalidAction(_)
            | Error::InvalidSegmentWidth => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A stored key or value that does not have the expected layout.
pub fn corrupt(message: &str) -> Error {
    Error::Corrupt(Box::new(bincode::ErrorKind::Custom(message.to_owned())))
}
