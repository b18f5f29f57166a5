//! PostgreSQL v3 wire protocol message encoding and decoding.
//!
//! Every outbound message goes through [`pack`]; every inbound frame is read
//! with [`read_frame`] and turned into a [`BackendMessage`].
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use std::collections::HashMap;
use std::io::{self, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::types::Oid;
use crate::error::{Error, Result};

// ============================================================================
// Protocol Constants
// ============================================================================

/// PostgreSQL protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// Request code of the SSLRequest packet.
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Parse and Bind carry parameter counts as int16.
pub const MAX_PARAMETERS: usize = i16::MAX as usize;

/// Largest backend frame accepted, length word included.
pub const MAX_FRAME_LEN: i32 = 1 << 30;

/// Redshift client protocol versions, negotiated through the
/// `client_protocol_version` startup parameter.
pub mod client_protocol {
    pub const BASE_SERVER: i32 = 0;
    /// RowDescription carries schema/table/column/catalog names and flags.
    pub const EXTENDED_RESULT_METADATA: i32 = 1;
    pub const BINARY: i32 = 2;
}

/// Format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Format {
    Text = 0,
    Binary = 1,
}

impl Format {
    fn from_i16(code: i16) -> Self {
        if code == 0 {
            Format::Text
        } else {
            Format::Binary
        }
    }
}

/// Transaction status reported by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    Idle,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    Failed,
}

impl TryFrom<u8> for TransactionStatus {
    type Error = Error;

    fn try_from(b: u8) -> Result<Self> {
        match b {
            b'I' => Ok(TransactionStatus::Idle),
            b'T' => Ok(TransactionStatus::InTransaction),
            b'E' => Ok(TransactionStatus::Failed),
            other => Err(Error::protocol(format!(
                "unknown transaction status {:?}",
                other as char
            ))),
        }
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Frame a message body: `code ++ int32(len(body) + 4) ++ body`.
pub fn pack(code: u8, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(body.len() + 5);
    buf.put_u8(code);
    buf.put_i32(body.len() as i32 + 4);
    buf.put_slice(body);
    buf
}

fn eof_as_closed(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::Io(e)
    }
}

/// Read exactly one frame header: tag byte and length (including itself).
pub fn read_frame<R: Read>(stream: &mut R) -> Result<(u8, i32)> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).map_err(eof_as_closed)?;
    let length = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if !(4..=MAX_FRAME_LEN).contains(&length) {
        return Err(Error::protocol(format!(
            "invalid length {} for message {:?}",
            length, header[0] as char
        )));
    }
    Ok((header[0], length))
}

/// Read one complete frame and decode it.
pub fn read_message<R: Read>(stream: &mut R, protocol_version: i32) -> Result<BackendMessage> {
    let (code, length) = read_frame(stream)?;
    let mut body = vec![0u8; length as usize - 4];
    stream.read_exact(&mut body).map_err(eof_as_closed)?;
    BackendMessage::decode(code, Bytes::from(body), protocol_version)
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// A tagged frontend message; `encode` frames the body with [`pack`].
pub trait FrontendMessage {
    const TAG: u8;

    fn write_body(&self, body: &mut BytesMut);

    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        self.write_body(&mut body);
        pack(Self::TAG, &body)
    }
}

fn put_cstring(buf: &mut BytesMut, s: &[u8]) {
    buf.put_slice(s);
    buf.put_u8(0);
}

/// Startup message sent at connection start (untagged).
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub protocol_version: i32,
    pub params: Vec<(String, String)>,
}

impl StartupMessage {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        // Placeholder for length (filled in at the end)
        buf.put_i32(0);
        buf.put_i32(self.protocol_version);

        for (key, value) in &self.params {
            put_cstring(&mut buf, key.as_bytes());
            put_cstring(&mut buf, value.as_bytes());
        }
        buf.put_u8(0);

        let len = buf.len() as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());
        buf
    }
}

/// SSLRequest packet (untagged): `int32(8) ++ int32(80877103)`.
pub fn ssl_request() -> BytesMut {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_i32(8);
    buf.put_i32(SSL_REQUEST_CODE);
    buf
}

/// Password message (cleartext or MD5 digest)
#[derive(Debug, Clone)]
pub struct PasswordMessage {
    pub password: Vec<u8>,
}

impl FrontendMessage for PasswordMessage {
    const TAG: u8 = b'p';

    fn write_body(&self, body: &mut BytesMut) {
        put_cstring(body, &self.password);
    }
}

/// SASL Initial Response message ('p')
#[derive(Debug, Clone)]
pub struct SaslInitialResponseMessage {
    pub mechanism: String,
    pub data: Vec<u8>,
}

impl FrontendMessage for SaslInitialResponseMessage {
    const TAG: u8 = b'p';

    fn write_body(&self, body: &mut BytesMut) {
        put_cstring(body, self.mechanism.as_bytes());
        body.put_i32(self.data.len() as i32);
        body.put_slice(&self.data);
    }
}

/// SASL Response message ('p')
#[derive(Debug, Clone)]
pub struct SaslResponseMessage {
    pub data: Vec<u8>,
}

impl FrontendMessage for SaslResponseMessage {
    const TAG: u8 = b'p';

    fn write_body(&self, body: &mut BytesMut) {
        body.put_slice(&self.data);
    }
}

/// Parse message ('P') - creates a prepared statement
#[derive(Debug, Clone)]
pub struct ParseMessage {
    pub name: String,
    /// Statement text, already in the client encoding.
    pub query: Vec<u8>,
    pub param_types: Vec<Oid>,
}

impl FrontendMessage for ParseMessage {
    const TAG: u8 = b'P';

    fn write_body(&self, body: &mut BytesMut) {
        put_cstring(body, self.name.as_bytes());
        put_cstring(body, &self.query);
        body.put_i16(self.param_types.len() as i16);
        for oid in &self.param_types {
            body.put_i32(oid.as_i32());
        }
    }
}

/// Bind message ('B') - binds encoded parameters to a prepared statement
#[derive(Debug, Clone)]
pub struct BindMessage {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<Format>,
    /// Encoded parameter values; `None` is SQL NULL.
    pub params: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<Format>,
}

impl FrontendMessage for BindMessage {
    const TAG: u8 = b'B';

    fn write_body(&self, body: &mut BytesMut) {
        put_cstring(body, self.portal.as_bytes());
        put_cstring(body, self.statement.as_bytes());

        body.put_i16(self.param_formats.len() as i16);
        for fmt in &self.param_formats {
            body.put_i16(*fmt as i16);
        }

        body.put_i16(self.params.len() as i16);
        for param in &self.params {
            match param {
                None => body.put_i32(-1),
                Some(data) => {
                    body.put_i32(data.len() as i32);
                    body.put_slice(data);
                }
            }
        }

        body.put_i16(self.result_formats.len() as i16);
        for fmt in &self.result_formats {
            body.put_i16(*fmt as i16);
        }
    }
}

/// Execute message ('E') - executes a bound portal
#[derive(Debug, Clone)]
pub struct ExecuteMessage {
    pub portal: String,
    /// 0 = no limit
    pub max_rows: i32,
}

impl FrontendMessage for ExecuteMessage {
    const TAG: u8 = b'E';

    fn write_body(&self, body: &mut BytesMut) {
        put_cstring(body, self.portal.as_bytes());
        body.put_i32(self.max_rows);
    }
}

/// Target of a Describe or Close message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Statement,
    Portal,
}

impl Target {
    fn code(self) -> u8 {
        match self {
            Target::Statement => b'S',
            Target::Portal => b'P',
        }
    }
}

/// Describe message ('D')
#[derive(Debug, Clone)]
pub struct DescribeMessage {
    pub target: Target,
    pub name: String,
}

impl FrontendMessage for DescribeMessage {
    const TAG: u8 = b'D';

    fn write_body(&self, body: &mut BytesMut) {
        body.put_u8(self.target.code());
        put_cstring(body, self.name.as_bytes());
    }
}

/// Close message ('C') - releases a server-side statement or portal
#[derive(Debug, Clone)]
pub struct CloseMessage {
    pub target: Target,
    pub name: String,
}

impl FrontendMessage for CloseMessage {
    const TAG: u8 = b'C';

    fn write_body(&self, body: &mut BytesMut) {
        body.put_u8(self.target.code());
        put_cstring(body, self.name.as_bytes());
    }
}

/// Sync message ('S') - marks end of an extended query
#[derive(Debug, Clone, Copy)]
pub struct SyncMessage;

impl FrontendMessage for SyncMessage {
    const TAG: u8 = b'S';

    fn write_body(&self, _: &mut BytesMut) {}
}

/// Flush message ('H')
#[derive(Debug, Clone, Copy)]
pub struct FlushMessage;

impl FrontendMessage for FlushMessage {
    const TAG: u8 = b'H';

    fn write_body(&self, _: &mut BytesMut) {}
}

/// Terminate message ('X')
#[derive(Debug, Clone, Copy)]
pub struct TerminateMessage;

impl FrontendMessage for TerminateMessage {
    const TAG: u8 = b'X';

    fn write_body(&self, _: &mut BytesMut) {}
}

/// CopyData message ('d')
#[derive(Debug, Clone)]
pub struct CopyDataMessage<'a> {
    pub data: &'a [u8],
}

impl FrontendMessage for CopyDataMessage<'_> {
    const TAG: u8 = b'd';

    fn write_body(&self, body: &mut BytesMut) {
        body.put_slice(self.data);
    }
}

/// CopyDone message ('c')
#[derive(Debug, Clone, Copy)]
pub struct CopyDoneMessage;

impl FrontendMessage for CopyDoneMessage {
    const TAG: u8 = b'c';

    fn write_body(&self, _: &mut BytesMut) {}
}

/// CopyFail message ('f')
#[derive(Debug, Clone)]
pub struct CopyFailMessage {
    pub message: String,
}

impl FrontendMessage for CopyFailMessage {
    const TAG: u8 = b'f';

    fn write_body(&self, body: &mut BytesMut) {
        put_cstring(body, self.message.as_bytes());
    }
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Column metadata only sent under the extended-result-metadata protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedMetadata {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub catalog_name: String,
    pub nullable: bool,
    pub autoincrement: bool,
    pub read_only: bool,
    pub searchable: bool,
}

/// Field description in a RowDescription message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
    pub extended: Option<ExtendedMetadata>,
}

/// Payload of an AuthenticationRequest ('R').
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Sasl { mechanisms: Vec<String> },
    SaslContinue { data: Bytes },
    SaslFinal { data: Bytes },
    /// Kerberos, SCM, GSS, SSPI or anything newer; never answered.
    Unsupported { code: i32 },
}

/// Backend message types. One variant per tag the server may send.
#[derive(Debug, Clone)]
pub enum BackendMessage {
    NoticeResponse { fields: HashMap<u8, String> },
    Authentication(AuthRequest),
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery { status: TransactionStatus },
    RowDescription { fields: Vec<FieldDescription> },
    ErrorResponse { fields: HashMap<u8, String> },
    EmptyQueryResponse,
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    ParseComplete,
    BindComplete,
    CloseComplete,
    PortalSuspended,
    NoData,
    ParameterDescription { type_oids: Vec<Oid> },
    NotificationResponse { process_id: i32, channel: String, payload: String },
    CopyDone,
    CopyData { data: Bytes },
    CopyInResponse { format: Format, column_formats: Vec<Format> },
    CopyOutResponse { format: Format, column_formats: Vec<Format> },
}

impl BackendMessage {
    /// Decode the body of a frame with tag `code`.
    ///
    /// `protocol_version` is the negotiated Redshift client protocol version;
    /// it changes the layout of RowDescription.
    pub fn decode(code: u8, mut body: Bytes, protocol_version: i32) -> Result<Self> {
        let msg = match code {
            b'N' => BackendMessage::NoticeResponse {
                fields: read_error_fields(body)?,
            },
            b'R' => BackendMessage::Authentication(Self::decode_auth(body)?),
            b'S' => BackendMessage::ParameterStatus {
                name: read_cstring(&mut body)?,
                value: read_cstring(&mut body)?,
            },
            b'K' => BackendMessage::BackendKeyData {
                process_id: read_i32(&mut body)?,
                secret_key: read_i32(&mut body)?,
            },
            b'Z' => BackendMessage::ReadyForQuery {
                status: TransactionStatus::try_from(read_u8(&mut body)?)?,
            },
            b'T' => Self::decode_row_description(body, protocol_version)?,
            b'E' => BackendMessage::ErrorResponse {
                fields: read_error_fields(body)?,
            },
            b'I' => BackendMessage::EmptyQueryResponse,
            b'D' => Self::decode_data_row(body)?,
            b'C' => BackendMessage::CommandComplete {
                tag: read_cstring(&mut body)?,
            },
            b'1' => BackendMessage::ParseComplete,
            b'2' => BackendMessage::BindComplete,
            b'3' => BackendMessage::CloseComplete,
            b's' => BackendMessage::PortalSuspended,
            b'n' => BackendMessage::NoData,
            b't' => {
                let count = read_i16(&mut body)?.max(0) as usize;
                let mut type_oids = Vec::with_capacity(count);
                for _ in 0..count {
                    type_oids.push(Oid::from_i32(read_i32(&mut body)?));
                }
                BackendMessage::ParameterDescription { type_oids }
            }
            b'A' => BackendMessage::NotificationResponse {
                process_id: read_i32(&mut body)?,
                channel: read_cstring(&mut body)?,
                payload: read_cstring(&mut body)?,
            },
            b'c' => BackendMessage::CopyDone,
            b'd' => BackendMessage::CopyData { data: body },
            b'G' => {
                let (format, column_formats) = Self::decode_copy_formats(body)?;
                BackendMessage::CopyInResponse {
                    format,
                    column_formats,
                }
            }
            b'H' => {
                let (format, column_formats) = Self::decode_copy_formats(body)?;
                BackendMessage::CopyOutResponse {
                    format,
                    column_formats,
                }
            }
            other => {
                return Err(Error::protocol(format!(
                    "unknown message type {:?}",
                    other as char
                )))
            }
        };
        Ok(msg)
    }

    fn decode_auth(mut body: Bytes) -> Result<AuthRequest> {
        let auth_type = read_i32(&mut body)?;

        let request = match auth_type {
            0 => AuthRequest::Ok,
            3 => AuthRequest::CleartextPassword,
            5 => {
                let mut salt = [0u8; 4];
                ensure(&body, 4)?;
                body.copy_to_slice(&mut salt);
                AuthRequest::Md5Password { salt }
            }
            10 => {
                let mut mechanisms = Vec::new();
                while body.has_remaining() {
                    let mech = read_cstring(&mut body)?;
                    if mech.is_empty() {
                        break;
                    }
                    mechanisms.push(mech);
                }
                AuthRequest::Sasl { mechanisms }
            }
            11 => AuthRequest::SaslContinue { data: body },
            12 => AuthRequest::SaslFinal { data: body },
            code => AuthRequest::Unsupported { code },
        };
        Ok(request)
    }

    fn decode_row_description(mut body: Bytes, protocol_version: i32) -> Result<Self> {
        let num_fields = read_i16(&mut body)?.max(0) as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let name = read_cstring(&mut body)?;
            let table_oid = read_i32(&mut body)?;
            let column_attr = read_i16(&mut body)?;
            let type_oid = Oid::from_i32(read_i32(&mut body)?);
            let type_size = read_i16(&mut body)?;
            let type_modifier = read_i32(&mut body)?;
            let format = Format::from_i16(read_i16(&mut body)?);

            let extended = if protocol_version >= client_protocol::EXTENDED_RESULT_METADATA {
                let schema_name = read_cstring(&mut body)?;
                let table_name = read_cstring(&mut body)?;
                let column_name = read_cstring(&mut body)?;
                let catalog_name = read_cstring(&mut body)?;
                let flags = read_i16(&mut body)?;
                Some(ExtendedMetadata {
                    schema_name,
                    table_name,
                    column_name,
                    catalog_name,
                    nullable: flags & 0x1 != 0,
                    autoincrement: (flags >> 4) & 0x1 != 0,
                    read_only: (flags >> 8) & 0x1 != 0,
                    searchable: (flags >> 12) & 0x1 != 0,
                })
            } else {
                None
            };

            fields.push(FieldDescription {
                name,
                table_oid,
                column_attr,
                type_oid,
                type_size,
                type_modifier,
                format,
                extended,
            });
        }

        Ok(BackendMessage::RowDescription { fields })
    }

    fn decode_data_row(mut body: Bytes) -> Result<Self> {
        let num_cols = read_i16(&mut body)?.max(0) as usize;
        let mut values = Vec::with_capacity(num_cols);

        for _ in 0..num_cols {
            let len = read_i32(&mut body)?;
            if len < 0 {
                values.push(None);
            } else {
                ensure(&body, len as usize)?;
                values.push(Some(body.split_to(len as usize)));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }

    fn decode_copy_formats(mut body: Bytes) -> Result<(Format, Vec<Format>)> {
        let format = Format::from_i16(i16::from(read_u8(&mut body)?));
        let count = read_i16(&mut body)?.max(0) as usize;
        let mut column_formats = Vec::with_capacity(count);
        for _ in 0..count {
            column_formats.push(Format::from_i16(read_i16(&mut body)?));
        }
        Ok((format, column_formats))
    }

    /// The one-byte tag this message was sent with.
    pub fn tag(&self) -> u8 {
        match self {
            BackendMessage::NoticeResponse { .. } => b'N',
            BackendMessage::Authentication(_) => b'R',
            BackendMessage::ParameterStatus { .. } => b'S',
            BackendMessage::BackendKeyData { .. } => b'K',
            BackendMessage::ReadyForQuery { .. } => b'Z',
            BackendMessage::RowDescription { .. } => b'T',
            BackendMessage::ErrorResponse { .. } => b'E',
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::DataRow { .. } => b'D',
            BackendMessage::CommandComplete { .. } => b'C',
            BackendMessage::ParseComplete => b'1',
            BackendMessage::BindComplete => b'2',
            BackendMessage::CloseComplete => b'3',
            BackendMessage::PortalSuspended => b's',
            BackendMessage::NoData => b'n',
            BackendMessage::ParameterDescription { .. } => b't',
            BackendMessage::NotificationResponse { .. } => b'A',
            BackendMessage::CopyDone => b'c',
            BackendMessage::CopyData { .. } => b'd',
            BackendMessage::CopyInResponse { .. } => b'G',
            BackendMessage::CopyOutResponse { .. } => b'H',
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn ensure(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::protocol(format!(
            "message truncated: need {} bytes, have {}",
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn read_u8(buf: &mut Bytes) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_i16(buf: &mut Bytes) -> Result<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

fn read_i32(buf: &mut Bytes) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

/// Read a null-terminated string from the buffer.
/// Tries direct UTF-8 first, falls back to lossy only if invalid.
fn read_cstring(buf: &mut Bytes) -> Result<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::protocol("missing null terminator in string"))?;

    let s = std::str::from_utf8(&buf[..end])
        .map(|s| s.to_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(&buf[..end]).into_owned());

    buf.advance(end + 1);
    Ok(s)
}

/// Read error/notice response fields
fn read_error_fields(mut body: Bytes) -> Result<HashMap<u8, String>> {
    let mut fields = HashMap::new();

    while body.has_remaining() {
        let field_type = body.get_u8();
        if field_type == 0 {
            break;
        }
        let value = read_cstring(&mut body)?;
        fields.insert(field_type, value);
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_prefixes_code_and_length() {
        let framed = pack(b'Q', b"abc");
        assert_eq!(&framed[..], &[b'Q', 0, 0, 0, 7, b'a', b'b', b'c']);
        assert_eq!(&pack(b'S', b"")[..], &[b'S', 0, 0, 0, 4]);
    }

    #[test]
    fn test_read_frame_short_stream_is_closed() {
        let mut stream: &[u8] = &[b'Z', 0, 0];
        assert!(matches!(read_frame(&mut stream), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_read_frame_rejects_bad_length() {
        let mut stream: &[u8] = &[b'Z', 0, 0, 0, 2];
        assert!(matches!(read_frame(&mut stream), Err(Error::Interface(_))));
    }

    #[test]
    fn test_startup_message_structure() {
        let msg = StartupMessage {
            protocol_version: PROTOCOL_VERSION,
            params: vec![("user".to_string(), "test".to_string())],
        };

        let encoded = msg.encode();
        let len = i32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len as usize, encoded.len());
        assert_eq!(&encoded[8..], b"user\0test\0\0");
    }

    #[test]
    fn test_ssl_request_bytes() {
        assert_eq!(&ssl_request()[..], &[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);
    }

    #[test]
    fn test_unknown_tag_is_protocol_violation() {
        let err = BackendMessage::decode(b'?', Bytes::new(), 0).unwrap_err();
        assert!(err.to_string().contains("unknown message type"));
    }

    #[test]
    fn test_truncated_body_is_error_not_panic() {
        let err = BackendMessage::decode(b'K', Bytes::from_static(&[0, 0]), 0).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_unsupported_auth_code_decodes() {
        let msg = BackendMessage::decode(b'R', Bytes::from_static(&[0, 0, 0, 7]), 0).unwrap();
        assert!(matches!(
            msg,
            BackendMessage::Authentication(AuthRequest::Unsupported { code: 7 })
        ));
    }
}
