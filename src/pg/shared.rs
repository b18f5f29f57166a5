//! A connection shared between threads.
//!
//! The lock is held for a whole request/response cycle so that frames of
//! two executions never interleave on the socket.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::connection::Connection;
use super::cursor::Cursor;
use super::paramstyle::Params;
use crate::error::Result;

pub struct SharedConnection<S: Read + Write = TcpStream> {
    inner: Arc<Mutex<Connection<S>>>,
}

impl<S: Read + Write> Clone for SharedConnection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Read + Write> SharedConnection<S> {
    pub fn new(conn: Connection<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// Exclusive access for several calls in a row.
    pub fn lock(&self) -> MutexGuard<'_, Connection<S>> {
        self.inner.lock()
    }

    pub fn execute(&self, cursor: &mut Cursor, sql: &str, params: impl Into<Params>) -> Result<()> {
        let mut conn = self.inner.lock();
        cursor.execute(&mut *conn, sql, params)
    }

    pub fn commit(&self) -> Result<()> {
        self.inner.lock().commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.inner.lock().rollback()
    }

    /// Close the connection if this is the last handle; otherwise just
    /// drop this handle.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().close(),
            Err(_) => Ok(()),
        }
    }
}
