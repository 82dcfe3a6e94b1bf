use std::fmt::Display;
use std::io;

/// Basalt errors.
#[derive(Debug)]
pub enum Error {
    /// An underlying read/write/rename/fsync failure, propagated unchanged.
    Io(io::Error),
    /// On-disk bytes failed validation: CRC mismatch, bad magic, truncated
    /// blocks, varint overflow, or shard manifest skew.
    Corruption(String),
    /// Invalid caller input: out-of-order writer keys, empty keys or values,
    /// a bad shard count, or an unknown sharder name.
    InvalidInput(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Corruption(msg) => write!(f, "corruption: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

/// Constructs an Error::Corruption from the given format string.
#[macro_export]
macro_rules! corruption {
    ($($args:tt)*) => { $crate::error::Error::Corruption(format!($($args)*)) };
}

/// Constructs an Error::InvalidInput from the given format string.
#[macro_export]
macro_rules! errinput {
    ($($args:tt)*) => { $crate::error::Error::InvalidInput(format!($($args)*)) };
}

/// A basalt Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}
