use std::{fmt::Display, result};

pub type Result<T, E = Error> = result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    /// A connection is already active on this service
    AlreadyOpen,
    /// Operation needs an open connection
    NotOpen,
    /// Serial device could not be opened or configured
    Transport(String),
    /// Device went away mid-session
    Disconnected(String),
    IoError(std::io::Error),
    Csv(csv::Error),
}
impl std::error::Error for Error {}
impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AlreadyOpen => write!(f, "Port is already open"),
            Error::NotOpen => write!(f, "Port is not open"),
            Error::Transport(e) => write!(f, "Transport error: {e}"),
            Error::Disconnected(e) => write!(f, "Disconnected: {e}"),
            Error::IoError(e) => write!(f, "IO error: {e}"),
            Error::Csv(e) => write!(f, "CSV error: {e}"),
        }
    }
}
impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}
impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}
impl From<tokio_serial::Error> for Error {
    fn from(value: tokio_serial::Error) -> Self {
        Self::Transport(value.to_string())
    }
}
