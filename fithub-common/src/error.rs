//! Errors raised by the shared FitHub plumbing

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Query, transaction or pool failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Creating the data folder or reading a config file
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file missing, unparseable or out of range
    #[error("configuration error: {0}")]
    Config(String),

    /// Row or argument breaking a data rule (negative total, unknown status,
    /// duplicate customer, malformed timestamp)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
