//! Errors raised while decoding or emitting events.

#[derive(Debug, Clone)]
pub enum Error {
    /// An event payload could not be decoded.
    Decode(String),
    /// An event could not be encoded.
    Encode(wirepack::Error),
    /// The underlying connection refused the operation.
    Link(workerlink::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(reason) => write!(f, "Failed to decode event: {}", reason),
            Self::Encode(e) => write!(f, "Failed to encode event: {}", e),
            Self::Link(e) => write!(f, "Connection error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Link(e) => Some(e),
            Self::Decode(_) => None,
        }
    }
}

impl From<wirepack::Error> for Error {
    fn from(e: wirepack::Error) -> Self {
        Self::Encode(e)
    }
}

impl From<workerlink::Error> for Error {
    fn from(e: workerlink::Error) -> Self {
        Self::Link(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
