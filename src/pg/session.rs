//! Per-connection protocol state and the backend message dispatcher.
//!
//! A [`Session`] owns the socket. Every request/response cycle ends with
//! [`Session::dispatch_until_ready`], which reads frames one at a time and
//! routes each [`BackendMessage`] to its handler until `ReadyForQuery`.
//! Server errors seen along the way are held back and returned only once the
//! stream is back in sync.

use std::collections::{HashMap, VecDeque};
use std::io::{BufReader, Read, Write};

use bytes::BytesMut;
use log::{debug, info, trace, warn};

use super::auth::{md5_password, CredentialSource, SaslClient, SaslFactory};
use super::error::ServerError;
use super::protocol::*;
use super::statement::Column;
use super::types::{ClientEncoding, CodecContext, Oid, Value};
use crate::error::{Error, Result};

/// One decoded result row.
pub type Row = Vec<Value>;

/// Kept notices and notifications per connection.
const MAX_QUEUED: usize = 100;

/// Bytes per CopyData frame when streaming a copy source.
const COPY_CHUNK: usize = 8192;

const COUNT_VERBS_PRE_8_2: &[&str] = &["INSERT", "DELETE", "UPDATE", "MOVE"];
const COUNT_VERBS_PRE_9_0: &[&str] = &["INSERT", "DELETE", "UPDATE", "MOVE", "FETCH", "COPY"];
const COUNT_VERBS: &[&str] = &["INSERT", "DELETE", "UPDATE", "MOVE", "FETCH", "COPY", "SELECT"];

/// Verbs whose completion makes every cached statement stale.
const INVALIDATING_VERBS: &[&str] = &["ALTER", "CREATE", "DROP", "ROLLBACK"];

/// An asynchronous `NOTIFY` delivered by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub process_id: i32,
    pub channel: String,
    pub payload: String,
}

/// What a Describe(statement) cycle reported.
#[derive(Debug, Default)]
pub(crate) struct Described {
    pub param_types: Vec<Oid>,
    /// `Some(empty)` after NoData.
    pub fields: Option<Vec<FieldDescription>>,
}

/// Rows and counts collected during one execute cycle.
#[derive(Debug)]
pub(crate) struct Outcome {
    pub rows: VecDeque<Row>,
    pub row_count: i64,
    pub redshift_rowcount: i64,
    /// DataRows since the last CommandComplete.
    rows_in_command: i64,
}

impl Outcome {
    pub fn new() -> Self {
        Self {
            rows: VecDeque::new(),
            row_count: -1,
            redshift_rowcount: -1,
            rows_in_command: 0,
        }
    }
}

/// Caller-provided streams for COPY FROM STDIN / COPY TO STDOUT.
#[derive(Default)]
pub(crate) struct CopyStreams<'a> {
    pub source: Option<&'a mut dyn Read>,
    pub sink: Option<&'a mut dyn Write>,
}

/// Authentication state for the startup cycle.
pub(crate) struct Handshake {
    pub user: String,
    pub credentials: Box<dyn CredentialSource>,
    pub sasl_factory: SaslFactory,
    pub sasl: Option<Box<dyn SaslClient>>,
}

/// Where the handlers put what they receive.
///
/// `'c` is the lifetime of the caller's copy streams, which outlive the
/// borrows of a single cycle.
pub(crate) enum Sink<'a, 'c> {
    /// Nothing expected beyond completion.
    Discard,
    Startup(&'a mut Handshake),
    Describe(&'a mut Described),
    Rows {
        columns: &'a [Column],
        outcome: &'a mut Outcome,
        copy: CopyStreams<'c>,
    },
}

/// Socket plus everything the server has told us about the session.
pub struct Session<S: Read + Write> {
    stream: BufReader<S>,
    write_buf: BytesMut,
    status: TransactionStatus,
    backend_pid: i32,
    backend_secret_key: i32,
    parameters: HashMap<String, String>,
    requested_protocol_version: i32,
    protocol_version: i32,
    codec_context: CodecContext,
    count_verbs: &'static [&'static str],
    pending_error: Option<Error>,
    invalidate: bool,
    notices: VecDeque<ServerError>,
    notifications: VecDeque<Notification>,
    broken: bool,
}

impl<S: Read + Write> Session<S> {
    pub(crate) fn new(stream: S, requested_protocol_version: i32) -> Self {
        Self {
            stream: BufReader::with_capacity(32 * 1024, stream),
            write_buf: BytesMut::with_capacity(8 * 1024),
            status: TransactionStatus::Idle,
            backend_pid: 0,
            backend_secret_key: 0,
            parameters: HashMap::new(),
            requested_protocol_version,
            // Servers that never announce server_protocol_version only
            // speak the base RowDescription layout.
            protocol_version: client_protocol::BASE_SERVER,
            codec_context: CodecContext::default(),
            count_verbs: COUNT_VERBS,
            pending_error: None,
            invalidate: false,
            notices: VecDeque::new(),
            notifications: VecDeque::new(),
            broken: false,
        }
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.status
    }

    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    pub fn backend_secret_key(&self) -> i32 {
        self.backend_secret_key
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Client protocol version in effect after negotiation.
    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    pub fn codec_context(&self) -> &CodecContext {
        &self.codec_context
    }

    pub fn notices(&self) -> &VecDeque<ServerError> {
        &self.notices
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    /// A socket error or an aborted cycle left the stream unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    /// Whether a DDL or ROLLBACK completed since the last call.
    pub(crate) fn take_invalidate(&mut self) -> bool {
        std::mem::take(&mut self.invalidate)
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Stage a frontend message; nothing is sent until [`flush`](Self::flush).
    pub(crate) fn queue<M: FrontendMessage>(&mut self, msg: &M) {
        trace!("-> {:?}", M::TAG as char);
        self.write_buf.extend_from_slice(&msg.encode());
    }

    /// Stage an untagged packet (startup, SSLRequest).
    pub(crate) fn queue_raw(&mut self, packet: &[u8]) {
        self.write_buf.extend_from_slice(packet);
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let buf = self.write_buf.split();
        let stream = self.stream.get_mut();
        let written = stream.write_all(&buf).and_then(|_| stream.flush());
        written.map_err(|e| {
            self.broken = true;
            Error::Io(e)
        })
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Read and handle frames until `ReadyForQuery`, then surface the first
    /// deferred error of the cycle, if any.
    ///
    /// An error returned before `ReadyForQuery` means the cycle was aborted
    /// and the session is marked broken.
    pub(crate) fn dispatch_until_ready(&mut self, sink: &mut Sink<'_, '_>) -> Result<()> {
        self.ensure_usable()?;
        self.pending_error = None;

        loop {
            let msg = match read_message(&mut self.stream, self.protocol_version) {
                Ok(msg) => msg,
                Err(e) => return Err(self.abort(e)),
            };
            trace!("<- {:?}", msg.tag() as char);
            match self.handle(msg, sink) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => return Err(self.abort(e)),
            }
        }

        match self.pending_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The server usually closes the socket right after a fatal
    /// ErrorResponse; that error is more useful than the EOF.
    fn abort(&mut self, e: Error) -> Error {
        self.broken = true;
        match (self.pending_error.take(), e) {
            (Some(pending), Error::ConnectionClosed | Error::Io(_)) => pending,
            (_, e) => e,
        }
    }

    fn defer(&mut self, e: Error) {
        if self.pending_error.is_none() {
            self.pending_error = Some(e);
        } else {
            debug!("additional error in cycle: {}", e);
        }
    }

    /// Returns `true` once the cycle is complete.
    fn handle(&mut self, msg: BackendMessage, sink: &mut Sink<'_, '_>) -> Result<bool> {
        match msg {
            BackendMessage::NoticeResponse { fields } => {
                let notice = ServerError::from_fields(fields);
                warn!("server notice: {}", notice);
                if self.notices.len() == MAX_QUEUED {
                    self.notices.pop_front();
                }
                self.notices.push_back(notice);
            }
            BackendMessage::Authentication(request) => match sink {
                Sink::Startup(handshake) => self.authenticate(request, handshake)?,
                _ => return Err(Error::protocol("authentication request outside startup")),
            },
            BackendMessage::ParameterStatus { name, value } => {
                self.set_parameter(name, value);
            }
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                self.backend_pid = process_id;
                self.backend_secret_key = secret_key;
            }
            BackendMessage::ReadyForQuery { status } => {
                self.status = status;
                return Ok(true);
            }
            BackendMessage::RowDescription { fields } => match sink {
                Sink::Describe(described) => described.fields = Some(fields),
                _ => debug!("ignoring RowDescription outside describe"),
            },
            BackendMessage::ErrorResponse { fields } => {
                self.defer(ServerError::from_fields(fields).into());
            }
            BackendMessage::EmptyQueryResponse => {
                self.defer(Error::Programming("query was empty".to_string()));
            }
            BackendMessage::DataRow { values } => match sink {
                Sink::Rows {
                    columns, outcome, ..
                } => match self.decode_row(columns, values) {
                    Ok(row) => {
                        outcome.rows.push_back(row);
                        outcome.rows_in_command += 1;
                    }
                    Err(e) => self.defer(e),
                },
                _ => warn!("unexpected DataRow"),
            },
            BackendMessage::CommandComplete { tag } => {
                self.command_complete(&tag, sink);
            }
            BackendMessage::ParseComplete
            | BackendMessage::BindComplete
            | BackendMessage::CloseComplete
            | BackendMessage::PortalSuspended
            | BackendMessage::CopyDone => {}
            BackendMessage::NoData => {
                if let Sink::Describe(described) = sink {
                    described.fields = Some(Vec::new());
                }
            }
            BackendMessage::ParameterDescription { type_oids } => {
                if let Sink::Describe(described) = sink {
                    described.param_types = type_oids;
                }
            }
            BackendMessage::NotificationResponse {
                process_id,
                channel,
                payload,
            } => {
                info!("notification on {:?} from backend {}", channel, process_id);
                if self.notifications.len() == MAX_QUEUED {
                    self.notifications.pop_front();
                }
                self.notifications.push_back(Notification {
                    process_id,
                    channel,
                    payload,
                });
            }
            BackendMessage::CopyData { data } => {
                let sink = match sink {
                    Sink::Rows { copy, .. } => copy.sink.as_deref_mut(),
                    _ => None,
                };
                // A missing sink was already reported at CopyOutResponse.
                if let Some(sink) = sink {
                    if let Err(e) = sink.write_all(&data) {
                        self.defer(Error::Interface(format!("copy sink failed: {}", e)));
                    }
                }
            }
            BackendMessage::CopyInResponse { .. } => {
                let source = match sink {
                    Sink::Rows { copy, .. } => copy.source.as_deref_mut(),
                    _ => None,
                };
                self.copy_in(source)?;
            }
            BackendMessage::CopyOutResponse { .. } => {
                let has_sink = matches!(sink, Sink::Rows { copy, .. } if copy.sink.is_some());
                if !has_sink {
                    self.defer(Error::Interface(
                        "COPY TO STDOUT requires a copy sink on the cursor".to_string(),
                    ));
                }
            }
        }
        Ok(false)
    }

    fn authenticate(&mut self, request: AuthRequest, handshake: &mut Handshake) -> Result<()> {
        match request {
            AuthRequest::Ok => {
                debug!("authenticated as {:?}", handshake.user);
            }
            AuthRequest::CleartextPassword => {
                debug!("server requested cleartext password");
                let password = handshake.credentials.password()?;
                self.queue(&PasswordMessage { password });
                self.flush()?;
            }
            AuthRequest::Md5Password { salt } => {
                debug!("server requested MD5 password");
                let password = handshake.credentials.password()?;
                let hashed = md5_password(&handshake.user, &password, &salt);
                self.queue(&PasswordMessage { password: hashed });
                self.flush()?;
            }
            AuthRequest::Sasl { mechanisms } => {
                let password = handshake.credentials.password()?;
                let mut client = (handshake.sasl_factory)(&handshake.user, &password);
                if !mechanisms.iter().any(|m| m == client.mechanism()) {
                    return Err(Error::Interface(format!(
                        "server offered SASL mechanisms {:?}, none of which is supported",
                        mechanisms
                    )));
                }
                debug!("starting SASL {}", client.mechanism());
                self.queue(&SaslInitialResponseMessage {
                    mechanism: client.mechanism().to_string(),
                    data: client.client_first(),
                });
                self.flush()?;
                handshake.sasl = Some(client);
            }
            AuthRequest::SaslContinue { data } => {
                let client = handshake
                    .sasl
                    .as_mut()
                    .ok_or_else(|| Error::protocol("SASL continue before SASL start"))?;
                let data = client.server_first(&data)?;
                self.queue(&SaslResponseMessage { data });
                self.flush()?;
            }
            AuthRequest::SaslFinal { data } => {
                let mut client = handshake
                    .sasl
                    .take()
                    .ok_or_else(|| Error::protocol("SASL final before SASL start"))?;
                client.server_final(&data)?;
            }
            AuthRequest::Unsupported { code } => {
                let method = match code {
                    2 => "Kerberos V5",
                    4 => "crypt",
                    6 => "SCM credentials",
                    7 => "GSSAPI",
                    8 => "GSSAPI continue",
                    9 => "SSPI",
                    _ => "unknown",
                };
                return Err(Error::Interface(format!(
                    "authentication method {} ({}) is not supported",
                    code, method
                )));
            }
        }
        Ok(())
    }

    fn set_parameter(&mut self, name: String, value: String) {
        debug!("parameter {} = {:?}", name, value);
        match name.as_str() {
            "client_encoding" => match ClientEncoding::from_server_name(&value) {
                Some(encoding) => self.codec_context.encoding = encoding,
                None => warn!("unsupported client_encoding {:?}, keeping {:?}", value, self.codec_context.encoding),
            },
            "integer_datetimes" => {
                self.codec_context.integer_datetimes = value.eq_ignore_ascii_case("on");
            }
            "server_version" => {
                self.count_verbs = count_verbs_for(&value);
            }
            "server_protocol_version" => match value.trim().parse::<i32>() {
                Ok(server) => {
                    self.protocol_version = self.requested_protocol_version.min(server);
                    debug!("negotiated client protocol version {}", self.protocol_version);
                }
                Err(_) => warn!("malformed server_protocol_version {:?}", value),
            },
            _ => {}
        }
        self.parameters.insert(name, value);
    }

    fn decode_row(&self, columns: &[Column], values: Vec<Option<bytes::Bytes>>) -> Result<Row> {
        if values.len() != columns.len() {
            return Err(Error::protocol(format!(
                "DataRow has {} columns, row description has {}",
                values.len(),
                columns.len()
            )));
        }
        values
            .iter()
            .zip(columns)
            .map(|(value, column)| match value {
                None => Ok(Value::Null),
                Some(data) => (column.decoder.decode)(data, &self.codec_context),
            })
            .collect()
    }

    fn command_complete(&mut self, tag: &str, sink: &mut Sink<'_, '_>) {
        let verb = tag.split_whitespace().next().unwrap_or_default();
        if INVALIDATING_VERBS
            .iter()
            .any(|v| verb.eq_ignore_ascii_case(v))
        {
            self.invalidate = true;
        }

        let Sink::Rows { outcome, .. } = sink else {
            return;
        };
        let reported = tag
            .rsplit(' ')
            .next()
            .and_then(|last| last.parse::<i64>().ok());

        if let Some(count) = reported {
            if self.count_verbs.contains(&verb) {
                outcome.row_count = accumulate(outcome.row_count, count);
            }
        }

        let received = std::mem::take(&mut outcome.rows_in_command);
        let out_of_band = reported.or((received > 0).then_some(received));
        if let Some(count) = out_of_band {
            outcome.redshift_rowcount = accumulate(outcome.redshift_rowcount, count);
        }
    }

    fn copy_in(&mut self, source: Option<&mut (dyn Read + '_)>) -> Result<()> {
        let Some(source) = source else {
            self.queue(&CopyFailMessage {
                message: "no copy source supplied".to_string(),
            });
            self.flush()?;
            self.defer(Error::Interface(
                "COPY FROM STDIN requires a copy source on the cursor".to_string(),
            ));
            return Ok(());
        };

        let mut chunk = vec![0u8; COPY_CHUNK];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => {
                    self.queue(&CopyDoneMessage);
                    break;
                }
                Ok(n) => {
                    self.queue(&CopyDataMessage { data: &chunk[..n] });
                    if self.write_buf.len() >= 4 * COPY_CHUNK {
                        self.flush()?;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.queue(&CopyFailMessage {
                        message: format!("copy source failed: {}", e),
                    });
                    self.defer(Error::Interface(format!("copy source failed: {}", e)));
                    break;
                }
            }
        }
        self.flush()
    }
}

fn accumulate(current: i64, count: i64) -> i64 {
    if current == -1 {
        count
    } else {
        current + count
    }
}

/// Leading numeric components of a `server_version` such as `8.0.2`.
fn parse_version(version: &str) -> (u32, u32, u32) {
    let mut parts = version.trim().split('.').map(|part| {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u32>().unwrap_or(0)
    });
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

fn count_verbs_for(server_version: &str) -> &'static [&'static str] {
    let version = parse_version(server_version);
    if version < (8, 2, 0) {
        COUNT_VERBS_PRE_8_2
    } else if version < (9, 0, 0) {
        COUNT_VERBS_PRE_9_0
    } else {
        COUNT_VERBS
    }
}
