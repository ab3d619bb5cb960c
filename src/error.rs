use std::error;
use std::fmt;
use std::io;

/// Errors reported by registration and loop operations.
///
/// "Not inserted" situations are deliberately absent: querying or
/// deleting an unregistered descriptor is a normal result, not a
/// failure.
#[derive(Debug)]
pub enum Error {
    /// The request named neither a pollable condition, a signal, nor
    /// a timeout, or combined conditions that cannot coexist.
    InvalidArgument,

    /// The backend could not allocate or arm a watcher.
    Backend(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid event registration"),
            Error::Backend(err) => write!(f, "backend failure: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::InvalidArgument => None,
            Error::Backend(err) => Some(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Backend(err)
    }
}
