//! Error types for the Redshift wire driver.

use thiserror::Error;

use crate::pg::error::{ErrorKind, ServerError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Interface error: {0}")]
    Interface(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Server(ServerError),

    #[error("Programming error: {0}")]
    Programming(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Data error: {0}")]
    Data(String),
}

impl Error {
    /// The DB-API class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Interface(_) | Error::ConnectionClosed | Error::Io(_) => ErrorKind::Interface,
            Error::Server(e) => e.kind(),
            Error::Programming(_) => ErrorKind::Programming,
            Error::NotSupported(_) => ErrorKind::NotSupported,
            Error::Data(_) => ErrorKind::Data,
        }
    }

    /// SQLSTATE of a server-reported error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(e) => Some(e.code.as_str()),
            _ => None,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Interface(format!("protocol violation: {}", msg.into()))
    }
}

impl From<ServerError> for Error {
    fn from(e: ServerError) -> Self {
        Error::Server(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
