//! DB-API style cursor.
//!
//! A cursor holds the buffered result of its last `execute` and a weak
//! handle to the cached statement that produced it. It does not borrow the
//! connection; each call takes the connection explicitly, so any number of
//! cursors can take turns on one connection.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Weak};

use super::connection::Connection;
use super::paramstyle::Params;
use super::protocol::FieldDescription;
use super::session::{CopyStreams, Row};
use super::statement::{Column, PreparedStatement};
use super::types::Oid;
use crate::error::{Error, Result};

/// Column metadata in DB-API `description` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub name: String,
    pub type_code: Oid,
    pub display_size: Option<i32>,
    pub internal_size: Option<i32>,
    pub precision: Option<i32>,
    pub scale: Option<i32>,
    /// Only known under the extended result metadata protocol.
    pub null_ok: Option<bool>,
    /// Schema, table and flags when the server sent them.
    pub field: FieldDescription,
}

impl Description {
    fn from_column(column: &Column) -> Self {
        let field = &column.field;
        let internal_size = (field.type_size > 0).then_some(i32::from(field.type_size));
        let (precision, scale) = match field.type_oid {
            Oid::NUMERIC if field.type_modifier >= 4 => {
                let modifier = field.type_modifier - 4;
                (Some((modifier >> 16) & 0xffff), Some(modifier & 0xffff))
            }
            _ => (None, None),
        };
        let display_size = match field.type_oid {
            Oid::VARCHAR | Oid::BPCHAR if field.type_modifier >= 4 => {
                Some(field.type_modifier - 4)
            }
            _ => None,
        };
        Self {
            name: field.name.clone(),
            type_code: field.type_oid,
            display_size,
            internal_size,
            precision,
            scale,
            null_ok: field.extended.as_ref().map(|e| e.nullable),
            field: field.clone(),
        }
    }
}

/// A cursor over one connection's results.
pub struct Cursor {
    rows: VecDeque<Row>,
    row_count: i64,
    redshift_rowcount: i64,
    description: Option<Vec<Description>>,
    statement: Weak<PreparedStatement>,
    /// Default batch size of [`fetchmany`](Self::fetchmany).
    pub arraysize: usize,
    copy_source: Option<Box<dyn Read + Send>>,
    copy_sink: Option<Box<dyn Write + Send>>,
    closed: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    pub fn new() -> Self {
        Self {
            rows: VecDeque::new(),
            row_count: -1,
            redshift_rowcount: -1,
            description: None,
            statement: Weak::new(),
            arraysize: 1,
            copy_source: None,
            copy_sink: None,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Interface("cursor is closed".to_string()));
        }
        Ok(())
    }

    /// Data streamed to the server by `COPY ... FROM STDIN`.
    pub fn set_copy_source(&mut self, source: Option<Box<dyn Read + Send>>) {
        self.copy_source = source;
    }

    /// Receives the output of `COPY ... TO STDOUT`.
    pub fn set_copy_sink(&mut self, sink: Option<Box<dyn Write + Send>>) {
        self.copy_sink = sink;
    }

    pub fn take_copy_sink(&mut self) -> Option<Box<dyn Write + Send>> {
        self.copy_sink.take()
    }

    /// Execute one statement, replacing the buffered result.
    ///
    /// On error the cursor keeps the result of the previous call.
    pub fn execute<S: Read + Write>(
        &mut self,
        conn: &mut Connection<S>,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<()> {
        self.ensure_open()?;
        let copy = CopyStreams {
            source: self.copy_source.as_deref_mut().map(|r| r as &mut dyn Read),
            sink: self.copy_sink.as_deref_mut().map(|w| w as &mut dyn Write),
        };
        let (statement, outcome) = conn.run(sql, params.into(), copy)?;

        self.description = statement
            .returns_rows()
            .then(|| statement.columns.iter().map(Description::from_column).collect());
        self.statement = Arc::downgrade(&statement);
        self.rows = outcome.rows;
        self.row_count = outcome.row_count;
        self.redshift_rowcount = outcome.redshift_rowcount;
        Ok(())
    }

    /// Execute the statement once per parameter set.
    ///
    /// `rowcount` is the sum of the individual counts, or -1 if any was
    /// unknown. Result rows are not kept.
    pub fn execute_many<S, I, P>(&mut self, conn: &mut Connection<S>, sql: &str, param_sets: I) -> Result<()>
    where
        S: Read + Write,
        I: IntoIterator<Item = P>,
        P: Into<Params>,
    {
        self.ensure_open()?;
        let mut total: Option<i64> = None;
        let mut last = None;
        for params in param_sets {
            let copy = CopyStreams {
                source: self.copy_source.as_deref_mut().map(|r| r as &mut dyn Read),
                sink: self.copy_sink.as_deref_mut().map(|w| w as &mut dyn Write),
            };
            let (statement, outcome) = conn.run(sql, params.into(), copy)?;
            total = match (total, outcome.row_count) {
                (_, -1) | (Some(-1), _) => Some(-1),
                (None, count) => Some(count),
                (Some(sum), count) => Some(sum + count),
            };
            last = Some(statement);
        }

        self.rows.clear();
        self.row_count = total.unwrap_or(-1);
        self.redshift_rowcount = self.row_count;
        self.description = last.as_ref().and_then(|s| {
            s.returns_rows()
                .then(|| s.columns.iter().map(Description::from_column).collect())
        });
        self.statement = last.as_ref().map_or_else(Weak::new, Arc::downgrade);
        Ok(())
    }

    fn ensure_result_set(&self) -> Result<()> {
        self.ensure_open()?;
        if self.description.is_none() {
            return Err(Error::Programming("no result set".to_string()));
        }
        Ok(())
    }

    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        self.ensure_result_set()?;
        Ok(self.rows.pop_front())
    }

    /// Up to `size` rows; `None` uses [`arraysize`](Self::arraysize).
    pub fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<Row>> {
        self.ensure_result_set()?;
        let n = size.unwrap_or(self.arraysize).min(self.rows.len());
        Ok(self.rows.drain(..n).collect())
    }

    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        self.ensure_result_set()?;
        Ok(self.rows.drain(..).collect())
    }

    /// Rows affected or returned by the last statement, -1 if the server
    /// did not report a count for its verb.
    pub fn rowcount(&self) -> i64 {
        self.row_count
    }

    /// Count reported by the server regardless of verb, falling back to the
    /// number of rows received.
    pub fn redshift_rowcount(&self) -> i64 {
        self.redshift_rowcount
    }

    pub fn description(&self) -> Option<&[Description]> {
        self.description.as_deref()
    }

    /// Server name of the cached statement behind the current result, while
    /// the cache still holds it.
    pub fn statement_name(&self) -> Option<String> {
        self.statement.upgrade().map(|s| s.name.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Discard buffered rows. Closing twice is allowed.
    pub fn close(&mut self) {
        self.closed = true;
        self.rows.clear();
        self.description = None;
        self.statement = Weak::new();
        self.copy_source = None;
        self.copy_sink = None;
    }
}
