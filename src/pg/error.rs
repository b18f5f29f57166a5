//! Server-reported errors and SQLSTATE classification.

use std::collections::HashMap;
use std::fmt;

/// DB-API error class an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Client-side usage or protocol failure (closed connection, bad auth, ...).
    Interface,
    /// Statement or schema problem reported by the server.
    Programming,
    /// Constraint violation reported by the server.
    Integrity,
    /// A value could not be mapped to any wire type.
    NotSupported,
    /// A value could not be encoded or decoded.
    Data,
}

/// An `ErrorResponse` received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub severity: String,
    /// Five character SQLSTATE.
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Every field of the response, keyed by its one-byte field type.
    pub fields: HashMap<u8, String>,
}

impl ServerError {
    /// Build from the field map of an `ErrorResponse`.
    pub fn from_fields(fields: HashMap<u8, String>) -> Self {
        Self {
            severity: fields.get(&b'S').cloned().unwrap_or_default(),
            code: fields.get(&b'C').cloned().unwrap_or_default(),
            message: fields.get(&b'M').cloned().unwrap_or_default(),
            detail: fields.get(&b'D').cloned(),
            hint: fields.get(&b'H').cloned(),
            fields,
        }
    }

    /// Classify by SQLSTATE class.
    pub fn kind(&self) -> ErrorKind {
        match self.code.get(..2) {
            Some("23") => ErrorKind::Integrity,
            Some("28") | Some("08") => ErrorKind::Interface,
            _ => ErrorKind::Programming,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(d) = &self.detail {
            write!(f, "\nDetail: {}", d)?;
        }
        if let Some(h) = &self.hint {
            write!(f, "\nHint: {}", h)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
