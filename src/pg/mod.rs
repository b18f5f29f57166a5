//! Redshift flavoured PostgreSQL v3 wire protocol client.
//!
//! This module provides a blocking extended-query client that:
//! - Prepares every statement and caches it per connection (LRU)
//! - Rewrites DB-API placeholder styles into `$n`
//! - Defers server errors until the stream is back at `ReadyForQuery`
//!
//! Architecture:
//! - `protocol`: Low-level wire protocol encoding/decoding
//! - `session`: Message dispatcher and per-connection protocol state
//! - `connection`: Startup, query execution and cache invalidation
//! - `statement`: Prepared statements and their LRU cache
//! - `types`: Parameter inference and value encoding/decoding
//! - `paramstyle`: Placeholder rewriting
//! - `auth` / `scram`: Credentials, MD5 and SASL authentication
//! - `cursor`: DB-API cursor surface
//! - `shared`: Mutex-guarded connection for use across threads

pub mod auth;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod paramstyle;
pub mod protocol;
pub mod scram;
pub mod session;
pub mod shared;
pub mod statement;
pub mod types;


pub use auth::{CredentialRegistry, CredentialSource, SaslClient};
pub use connection::{negotiate_ssl, Config, ConnectOptions, Connection};
pub use cursor::{Cursor, Description};
pub use error::{ErrorKind, ServerError};
pub use paramstyle::{ParamStyle, Params};
pub use protocol::TransactionStatus;
pub use session::{Notification, Row};
pub use shared::SharedConnection;
pub use statement::{PreparedStatement, StatementCache};
pub use types::{DefaultCodec, Oid, TypeCodec, Value};
