//! Parameter type inference and value encoding/decoding.
//!
//! The connection core never looks at value types itself: it asks a
//! [`TypeCodec`] which wire type a parameter has (`inspect`) and how to
//! decode a result column (`lookup`). [`DefaultCodec`] covers the common
//! scalar types, one-dimensional arrays and JSON.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use once_cell::sync::Lazy;

use super::protocol::Format;
use crate::error::{Error, Result};

// ============================================================================
// Type OIDs
// ============================================================================

/// Server type object identifiers (OIDs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    pub const BOOL: Oid = Oid(16);
    pub const BYTEA: Oid = Oid(17);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);
    pub const TEXT: Oid = Oid(25);
    pub const OID_TYPE: Oid = Oid(26);
    pub const JSON: Oid = Oid(114);
    pub const FLOAT4: Oid = Oid(700);
    pub const FLOAT8: Oid = Oid(701);
    /// Untyped literal; lets the server coerce the parameter.
    pub const UNKNOWN: Oid = Oid(705);
    pub const INT2_ARRAY: Oid = Oid(1005);
    pub const INT4_ARRAY: Oid = Oid(1007);
    pub const TEXT_ARRAY: Oid = Oid(1009);
    pub const VARCHAR_ARRAY: Oid = Oid(1015);
    pub const INT8_ARRAY: Oid = Oid(1016);
    pub const FLOAT8_ARRAY: Oid = Oid(1022);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);
    pub const DATE: Oid = Oid(1082);
    pub const TIME: Oid = Oid(1083);
    pub const TIMESTAMP: Oid = Oid(1114);
    pub const TIMESTAMPTZ: Oid = Oid(1184);
    pub const TIMETZ: Oid = Oid(1266);
    pub const NUMERIC: Oid = Oid(1700);
    pub const UUID: Oid = Oid(2950);
    pub const JSONB: Oid = Oid(3802);
    /// Redshift semi-structured `SUPER`.
    pub const SUPER: Oid = Oid(4000);

    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }

    pub fn is_text_like(self) -> bool {
        matches!(
            self,
            Oid::TEXT | Oid::VARCHAR | Oid::BPCHAR | Oid::CHAR | Oid::NAME | Oid::UNKNOWN
        )
    }
}

// ============================================================================
// Values
// ============================================================================

/// A parameter or result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    /// An integer whose wire width is chosen from its magnitude.
    Int(i64),
    Float4(f32),
    Float8(f64),
    /// Arbitrary precision number in its text form.
    Numeric(String),
    Text(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    /// One-dimensional array.
    Array(Vec<Value>),
}

/// The runtime type of a [`Value`], used for exact-type codec lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int2,
    Int4,
    Int8,
    Int,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytea,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Array,
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int2(_) => ValueKind::Int2,
            Value::Int4(_) => ValueKind::Int4,
            Value::Int8(_) => ValueKind::Int8,
            Value::Int(_) => ValueKind::Int,
            Value::Float4(_) => ValueKind::Float4,
            Value::Float8(_) => ValueKind::Float8,
            Value::Numeric(_) => ValueKind::Numeric,
            Value::Text(_) => ValueKind::Text,
            Value::Bytea(_) => ValueKind::Bytea,
            Value::Date(_) => ValueKind::Date,
            Value::Time(_) => ValueKind::Time,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::TimestampTz(_) => ValueKind::TimestampTz,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::Json(_) => ValueKind::Json,
            Value::Array(_) => ValueKind::Array,
        }
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int2(v) => Some(i64::from(*v)),
            Value::Int4(v) => Some(i64::from(*v)),
            Value::Int8(v) | Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float8(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

// ============================================================================
// Codec context
// ============================================================================

/// Character set the server uses for text on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientEncoding {
    #[default]
    Utf8,
    Latin1,
    /// `SQL_ASCII`: the server performs no conversion.
    SqlAscii,
}

impl ClientEncoding {
    /// Map a `client_encoding` parameter value.
    pub fn from_server_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "UTF8" | "UNICODE" => Some(ClientEncoding::Utf8),
            "LATIN1" | "ISO88591" => Some(ClientEncoding::Latin1),
            "SQLASCII" => Some(ClientEncoding::SqlAscii),
            _ => None,
        }
    }
}

/// Per-connection state that encode and decode functions read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecContext {
    pub encoding: ClientEncoding,
    /// Binary date/time values are int64 microseconds (`on`) or float8 seconds.
    pub integer_datetimes: bool,
}

impl Default for CodecContext {
    fn default() -> Self {
        Self {
            encoding: ClientEncoding::Utf8,
            integer_datetimes: true,
        }
    }
}

impl CodecContext {
    pub fn encode_str(&self, s: &str) -> Result<Vec<u8>> {
        match self.encoding {
            ClientEncoding::Utf8 | ClientEncoding::SqlAscii => Ok(s.as_bytes().to_vec()),
            ClientEncoding::Latin1 => s
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c))
                        .map_err(|_| Error::Data(format!("character {:?} is not LATIN1", c)))
                })
                .collect(),
        }
    }

    pub fn decode_str(&self, data: &[u8]) -> Result<String> {
        match self.encoding {
            ClientEncoding::Utf8 => std::str::from_utf8(data)
                .map(str::to_owned)
                .map_err(|e| Error::Data(format!("invalid UTF-8: {}", e))),
            ClientEncoding::Latin1 => Ok(data.iter().map(|&b| char::from(b)).collect()),
            ClientEncoding::SqlAscii => Ok(String::from_utf8_lossy(data).into_owned()),
        }
    }
}

// ============================================================================
// Codec capability
// ============================================================================

pub type EncodeFn = fn(&Value, &CodecContext) -> Result<Vec<u8>>;
pub type DecodeFn = fn(&[u8], &CodecContext) -> Result<Value>;
/// Value-dependent type inference; `None` means "not mine".
pub type Inspector = fn(&Value) -> Option<ParamEncoder>;

/// How one parameter is sent: declared type, format and encoder.
#[derive(Clone, Copy)]
pub struct ParamEncoder {
    pub oid: Oid,
    pub format: Format,
    pub encode: EncodeFn,
}

impl ParamEncoder {
    pub const fn new(oid: Oid, format: Format, encode: EncodeFn) -> Self {
        Self {
            oid,
            format,
            encode,
        }
    }
}

impl std::fmt::Debug for ParamEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamEncoder")
            .field("oid", &self.oid)
            .field("format", &self.format)
            .finish()
    }
}

/// How one result column is received.
#[derive(Clone, Copy)]
pub struct ColumnDecoder {
    pub format: Format,
    pub decode: DecodeFn,
}

impl std::fmt::Debug for ColumnDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnDecoder")
            .field("format", &self.format)
            .finish()
    }
}

/// Injected type mapping used by the query executor.
pub trait TypeCodec: Send + Sync {
    /// Wire type for a parameter value; `NotSupported` if none applies.
    fn inspect(&self, value: &Value) -> Result<ParamEncoder>;

    /// Result format and decoder for a column type.
    fn lookup(&self, oid: Oid) -> ColumnDecoder;
}

/// Table-driven codec: exact kind lookup, then ordered inspectors.
pub struct DefaultCodec {
    exact: HashMap<ValueKind, ParamEncoder>,
    inspectors: Vec<Inspector>,
    decoders: HashMap<Oid, ColumnDecoder>,
}

static SHARED: Lazy<Arc<DefaultCodec>> = Lazy::new(|| Arc::new(DefaultCodec::new()));

impl DefaultCodec {
    pub fn new() -> Self {
        let mut codec = Self {
            exact: HashMap::new(),
            inspectors: Vec::new(),
            decoders: HashMap::new(),
        };

        use Format::{Binary, Text};
        let exact = [
            (ValueKind::Null, ParamEncoder::new(Oid::UNKNOWN, Text, encode_null)),
            (ValueKind::Bool, ParamEncoder::new(Oid::BOOL, Binary, encode_bool)),
            (ValueKind::Int2, ParamEncoder::new(Oid::INT2, Binary, encode_int)),
            (ValueKind::Int4, ParamEncoder::new(Oid::INT4, Binary, encode_int)),
            (ValueKind::Int8, ParamEncoder::new(Oid::INT8, Binary, encode_int)),
            (ValueKind::Float4, ParamEncoder::new(Oid::FLOAT4, Binary, encode_float)),
            (ValueKind::Float8, ParamEncoder::new(Oid::FLOAT8, Binary, encode_float)),
            (ValueKind::Numeric, ParamEncoder::new(Oid::NUMERIC, Text, encode_text)),
            (ValueKind::Text, ParamEncoder::new(Oid::UNKNOWN, Text, encode_text)),
            (ValueKind::Bytea, ParamEncoder::new(Oid::BYTEA, Binary, encode_bytea)),
            (ValueKind::Date, ParamEncoder::new(Oid::DATE, Binary, encode_date)),
            (ValueKind::Time, ParamEncoder::new(Oid::TIME, Binary, encode_time)),
            (ValueKind::Timestamp, ParamEncoder::new(Oid::TIMESTAMP, Binary, encode_timestamp)),
            (ValueKind::TimestampTz, ParamEncoder::new(Oid::TIMESTAMPTZ, Binary, encode_timestamp)),
            (ValueKind::Uuid, ParamEncoder::new(Oid::UUID, Binary, encode_uuid)),
            (ValueKind::Json, ParamEncoder::new(Oid::JSON, Text, encode_text)),
        ];
        codec.exact.extend(exact);

        codec.inspectors.push(inspect_int);
        codec.inspectors.push(inspect_array);

        let decoders: [(Oid, Format, DecodeFn); 27] = [
            (Oid::BOOL, Binary, decode_bool),
            (Oid::INT2, Binary, decode_int2),
            (Oid::INT4, Binary, decode_int4),
            (Oid::OID_TYPE, Binary, decode_int4),
            (Oid::INT8, Binary, decode_int8),
            (Oid::FLOAT4, Binary, decode_float4),
            (Oid::FLOAT8, Binary, decode_float8),
            (Oid::NUMERIC, Text, decode_numeric),
            (Oid::TEXT, Text, decode_text),
            (Oid::VARCHAR, Text, decode_text),
            (Oid::BPCHAR, Text, decode_text),
            (Oid::CHAR, Text, decode_text),
            (Oid::NAME, Text, decode_text),
            (Oid::UNKNOWN, Text, decode_text),
            (Oid::BYTEA, Binary, decode_bytea),
            (Oid::DATE, Binary, decode_date),
            (Oid::TIME, Binary, decode_time),
            (Oid::TIMESTAMP, Binary, decode_timestamp),
            (Oid::TIMESTAMPTZ, Binary, decode_timestamptz),
            (Oid::UUID, Binary, decode_uuid),
            (Oid::JSON, Text, decode_json),
            (Oid::JSONB, Text, decode_json),
            (Oid::INT4_ARRAY, Text, decode_int_array),
            (Oid::INT8_ARRAY, Text, decode_int_array),
            (Oid::INT2_ARRAY, Text, decode_int_array),
            (Oid::TEXT_ARRAY, Text, decode_text_array),
            (Oid::VARCHAR_ARRAY, Text, decode_text_array),
        ];
        for (oid, format, decode) in decoders {
            codec.decoders.insert(oid, ColumnDecoder { format, decode });
        }

        codec
    }

    /// The process-wide default instance.
    pub fn shared() -> Arc<DefaultCodec> {
        Arc::clone(&SHARED)
    }

    /// Override the encoder used for every value of `kind`.
    pub fn register_exact(&mut self, kind: ValueKind, encoder: ParamEncoder) {
        self.exact.insert(kind, encoder);
    }

    /// Append a fallback inspector, consulted after the built-in ones.
    pub fn register_inspector(&mut self, inspector: Inspector) {
        self.inspectors.push(inspector);
    }

    pub fn register_decoder(&mut self, oid: Oid, decoder: ColumnDecoder) {
        self.decoders.insert(oid, decoder);
    }
}

impl Default for DefaultCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeCodec for DefaultCodec {
    fn inspect(&self, value: &Value) -> Result<ParamEncoder> {
        if let Some(encoder) = self.exact.get(&value.kind()) {
            return Ok(*encoder);
        }
        self.inspectors
            .iter()
            .find_map(|inspect| inspect(value))
            .ok_or_else(|| {
                Error::NotSupported(format!("type {:?} not mapped to a server type", value.kind()))
            })
    }

    fn lookup(&self, oid: Oid) -> ColumnDecoder {
        self.decoders.get(&oid).copied().unwrap_or(ColumnDecoder {
            format: Format::Text,
            decode: decode_text,
        })
    }
}

// ============================================================================
// Inspectors
// ============================================================================

fn inspect_int(value: &Value) -> Option<ParamEncoder> {
    let Value::Int(v) = value else {
        return None;
    };
    let oid = if i16::try_from(*v).is_ok() {
        Oid::INT2
    } else if i32::try_from(*v).is_ok() {
        Oid::INT4
    } else {
        Oid::INT8
    };
    Some(ParamEncoder::new(oid, Format::Binary, encode_int))
}

fn inspect_array(value: &Value) -> Option<ParamEncoder> {
    let Value::Array(items) = value else {
        return None;
    };
    let mut elements = items.iter().filter(|v| !v.is_null());
    let oid = match elements.next()? {
        Value::Int2(_) | Value::Int4(_) | Value::Int8(_) | Value::Int(_) => Oid::INT8_ARRAY,
        Value::Float4(_) | Value::Float8(_) => Oid::FLOAT8_ARRAY,
        Value::Text(_) => Oid::TEXT_ARRAY,
        _ => return None,
    };
    let homogeneous = elements.all(|v| match oid {
        Oid::INT8_ARRAY => v.as_integer().is_some(),
        Oid::FLOAT8_ARRAY => matches!(v, Value::Float4(_) | Value::Float8(_)),
        _ => matches!(v, Value::Text(_)),
    });
    homogeneous.then(|| ParamEncoder::new(oid, Format::Text, encode_array))
}

// ============================================================================
// Encoders
// ============================================================================

fn mismatch(expected: &str, value: &Value) -> Error {
    Error::Data(format!("expected {} value, got {:?}", expected, value.kind()))
}

fn encode_null(_: &Value, _: &CodecContext) -> Result<Vec<u8>> {
    Ok(Vec::new())
}

fn encode_bool(value: &Value, _: &CodecContext) -> Result<Vec<u8>> {
    match value {
        Value::Bool(v) => Ok(vec![u8::from(*v)]),
        other => Err(mismatch("bool", other)),
    }
}

fn encode_int(value: &Value, _: &CodecContext) -> Result<Vec<u8>> {
    match value {
        Value::Int2(v) => Ok(v.to_be_bytes().to_vec()),
        Value::Int4(v) => Ok(v.to_be_bytes().to_vec()),
        Value::Int8(v) => Ok(v.to_be_bytes().to_vec()),
        Value::Int(v) => {
            // Width must match the OID chosen by `inspect_int`.
            if let Ok(small) = i16::try_from(*v) {
                Ok(small.to_be_bytes().to_vec())
            } else if let Ok(mid) = i32::try_from(*v) {
                Ok(mid.to_be_bytes().to_vec())
            } else {
                Ok(v.to_be_bytes().to_vec())
            }
        }
        other => Err(mismatch("integer", other)),
    }
}

fn encode_float(value: &Value, _: &CodecContext) -> Result<Vec<u8>> {
    match value {
        Value::Float4(v) => Ok(v.to_be_bytes().to_vec()),
        Value::Float8(v) => Ok(v.to_be_bytes().to_vec()),
        other => Err(mismatch("float", other)),
    }
}

fn encode_text(value: &Value, ctx: &CodecContext) -> Result<Vec<u8>> {
    match value {
        Value::Text(s) | Value::Numeric(s) => ctx.encode_str(s),
        Value::Json(v) => {
            let s = serde_json::to_string(v).map_err(|e| Error::Data(e.to_string()))?;
            ctx.encode_str(&s)
        }
        other => Err(mismatch("text", other)),
    }
}

fn encode_bytea(value: &Value, _: &CodecContext) -> Result<Vec<u8>> {
    match value {
        Value::Bytea(v) => Ok(v.clone()),
        other => Err(mismatch("bytea", other)),
    }
}

fn encode_uuid(value: &Value, _: &CodecContext) -> Result<Vec<u8>> {
    match value {
        Value::Uuid(v) => Ok(v.as_bytes().to_vec()),
        other => Err(mismatch("uuid", other)),
    }
}

/// 2000-01-01, the origin of binary date/time values.
fn pg_epoch() -> NaiveDateTime {
    DateTime::<Utc>::UNIX_EPOCH.naive_utc() + Duration::seconds(946_684_800)
}

fn encode_micros(micros: i64, ctx: &CodecContext) -> Vec<u8> {
    if ctx.integer_datetimes {
        micros.to_be_bytes().to_vec()
    } else {
        (micros as f64 / 1_000_000.0).to_be_bytes().to_vec()
    }
}

fn encode_date(value: &Value, _: &CodecContext) -> Result<Vec<u8>> {
    match value {
        Value::Date(d) => {
            let days = d.signed_duration_since(pg_epoch().date()).num_days();
            let days = i32::try_from(days).map_err(|_| Error::Data(format!("date {} out of range", d)))?;
            Ok(days.to_be_bytes().to_vec())
        }
        other => Err(mismatch("date", other)),
    }
}

fn encode_time(value: &Value, ctx: &CodecContext) -> Result<Vec<u8>> {
    match value {
        Value::Time(t) => {
            let micros = i64::from(t.num_seconds_from_midnight()) * 1_000_000
                + i64::from(t.nanosecond() / 1_000);
            Ok(encode_micros(micros, ctx))
        }
        other => Err(mismatch("time", other)),
    }
}

fn encode_timestamp(value: &Value, ctx: &CodecContext) -> Result<Vec<u8>> {
    let naive = match value {
        Value::Timestamp(ts) => *ts,
        Value::TimestampTz(ts) => ts.naive_utc(),
        other => return Err(mismatch("timestamp", other)),
    };
    let micros = naive
        .signed_duration_since(pg_epoch())
        .num_microseconds()
        .ok_or_else(|| Error::Data(format!("timestamp {} out of range", naive)))?;
    Ok(encode_micros(micros, ctx))
}

fn encode_array(value: &Value, ctx: &CodecContext) -> Result<Vec<u8>> {
    let Value::Array(items) = value else {
        return Err(mismatch("array", value));
    };
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            Value::Null => out.push_str("NULL"),
            Value::Text(s) => {
                out.push('"');
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            }
            Value::Float4(v) => out.push_str(&v.to_string()),
            Value::Float8(v) => out.push_str(&v.to_string()),
            other => match other.as_integer() {
                Some(v) => out.push_str(&v.to_string()),
                None => return Err(mismatch("array element", other)),
            },
        }
    }
    out.push('}');
    ctx.encode_str(&out)
}

// ============================================================================
// Decoders
// ============================================================================

fn fixed<const N: usize>(data: &[u8], name: &str) -> Result<[u8; N]> {
    data.try_into()
        .map_err(|_| Error::Data(format!("invalid {} length: {}", name, data.len())))
}

fn decode_bool(data: &[u8], _: &CodecContext) -> Result<Value> {
    let [b] = fixed::<1>(data, "BOOL")?;
    Ok(Value::Bool(b != 0))
}

fn decode_int2(data: &[u8], _: &CodecContext) -> Result<Value> {
    Ok(Value::Int2(i16::from_be_bytes(fixed(data, "INT2")?)))
}

fn decode_int4(data: &[u8], _: &CodecContext) -> Result<Value> {
    Ok(Value::Int4(i32::from_be_bytes(fixed(data, "INT4")?)))
}

fn decode_int8(data: &[u8], _: &CodecContext) -> Result<Value> {
    Ok(Value::Int8(i64::from_be_bytes(fixed(data, "INT8")?)))
}

fn decode_float4(data: &[u8], _: &CodecContext) -> Result<Value> {
    Ok(Value::Float4(f32::from_be_bytes(fixed(data, "FLOAT4")?)))
}

fn decode_float8(data: &[u8], _: &CodecContext) -> Result<Value> {
    Ok(Value::Float8(f64::from_be_bytes(fixed(data, "FLOAT8")?)))
}

fn decode_text(data: &[u8], ctx: &CodecContext) -> Result<Value> {
    ctx.decode_str(data).map(Value::Text)
}

fn decode_numeric(data: &[u8], ctx: &CodecContext) -> Result<Value> {
    ctx.decode_str(data).map(Value::Numeric)
}

fn decode_bytea(data: &[u8], _: &CodecContext) -> Result<Value> {
    Ok(Value::Bytea(data.to_vec()))
}

fn decode_uuid(data: &[u8], _: &CodecContext) -> Result<Value> {
    Ok(Value::Uuid(uuid::Uuid::from_bytes(fixed(data, "UUID")?)))
}

fn decode_json(data: &[u8], ctx: &CodecContext) -> Result<Value> {
    let text = ctx.decode_str(data)?;
    serde_json::from_str(&text)
        .map(Value::Json)
        .map_err(|e| Error::Data(format!("invalid JSON: {}", e)))
}

fn decode_micros(data: &[u8], ctx: &CodecContext, name: &str) -> Result<i64> {
    let raw: [u8; 8] = fixed(data, name)?;
    if ctx.integer_datetimes {
        Ok(i64::from_be_bytes(raw))
    } else {
        Ok((f64::from_be_bytes(raw) * 1_000_000.0).round() as i64)
    }
}

fn decode_date(data: &[u8], _: &CodecContext) -> Result<Value> {
    let days = i32::from_be_bytes(fixed(data, "DATE")?);
    pg_epoch()
        .date()
        .checked_add_signed(Duration::days(i64::from(days)))
        .map(Value::Date)
        .ok_or_else(|| Error::Data(format!("date offset {} out of range", days)))
}

fn decode_time(data: &[u8], ctx: &CodecContext) -> Result<Value> {
    let micros = decode_micros(data, ctx, "TIME")?;
    let secs = u32::try_from(micros.div_euclid(1_000_000))
        .map_err(|_| Error::Data(format!("time {} out of range", micros)))?;
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .map(Value::Time)
        .ok_or_else(|| Error::Data(format!("time {} out of range", micros)))
}

fn timestamp_from_micros(micros: i64) -> Result<NaiveDateTime> {
    pg_epoch()
        .checked_add_signed(Duration::microseconds(micros))
        .ok_or_else(|| Error::Data(format!("timestamp offset {} out of range", micros)))
}

fn decode_timestamp(data: &[u8], ctx: &CodecContext) -> Result<Value> {
    let micros = decode_micros(data, ctx, "TIMESTAMP")?;
    timestamp_from_micros(micros).map(Value::Timestamp)
}

fn decode_timestamptz(data: &[u8], ctx: &CodecContext) -> Result<Value> {
    let micros = decode_micros(data, ctx, "TIMESTAMPTZ")?;
    let naive = timestamp_from_micros(micros)?;
    Ok(Value::TimestampTz(Utc.from_utc_datetime(&naive)))
}

/// Split the text form of a one-dimensional array into its elements.
/// `None` elements are SQL NULLs.
fn split_array(text: &str) -> Result<Vec<Option<String>>> {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| Error::Data(format!("malformed array literal: {}", text)))?;
    let mut items = Vec::new();
    if inner.is_empty() {
        return Ok(items);
    }

    let mut chars = inner.chars().peekable();
    loop {
        let mut item = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') => item.extend(chars.next()),
                    Some('"') => break,
                    Some(c) => item.push(c),
                    None => return Err(Error::Data(format!("unterminated array element: {}", text))),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                item.push(c);
                chars.next();
            }
        }
        if !quoted && item.eq_ignore_ascii_case("NULL") {
            items.push(None);
        } else {
            items.push(Some(item));
        }
        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(c) => return Err(Error::Data(format!("unexpected {:?} in array literal", c))),
        }
    }
    Ok(items)
}

fn decode_int_array(data: &[u8], ctx: &CodecContext) -> Result<Value> {
    let text = ctx.decode_str(data)?;
    split_array(&text)?
        .into_iter()
        .map(|item| match item {
            None => Ok(Value::Null),
            Some(s) => s
                .parse::<i64>()
                .map(Value::Int8)
                .map_err(|e| Error::Data(format!("invalid array integer {:?}: {}", s, e))),
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn decode_text_array(data: &[u8], ctx: &CodecContext) -> Result<Value> {
    let text = ctx.decode_str(data)?;
    Ok(Value::Array(
        split_array(&text)?
            .into_iter()
            .map(|item| item.map_or(Value::Null, Value::Text))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CodecContext {
        CodecContext::default()
    }

    #[test]
    fn test_exact_lookup_before_inspectors() {
        let codec = DefaultCodec::new();
        let enc = codec.inspect(&Value::Int4(7)).unwrap();
        assert_eq!(enc.oid, Oid::INT4);
        assert_eq!(enc.format, Format::Binary);

        let enc = codec.inspect(&Value::Text("x".into())).unwrap();
        assert_eq!(enc.oid, Oid::UNKNOWN);
        assert_eq!(enc.format, Format::Text);
    }

    #[test]
    fn test_int_width_follows_magnitude() {
        let codec = DefaultCodec::new();
        assert_eq!(codec.inspect(&Value::Int(5)).unwrap().oid, Oid::INT2);
        assert_eq!(codec.inspect(&Value::Int(100_000)).unwrap().oid, Oid::INT4);
        assert_eq!(codec.inspect(&Value::Int(1 << 40)).unwrap().oid, Oid::INT8);

        let enc = codec.inspect(&Value::Int(100_000)).unwrap();
        assert_eq!((enc.encode)(&Value::Int(100_000), &ctx()).unwrap(), 100_000i32.to_be_bytes());
    }

    #[test]
    fn test_unmappable_values_are_not_supported() {
        let codec = DefaultCodec::new();
        let err = codec.inspect(&Value::Array(vec![])).unwrap_err();
        assert_eq!(err.kind(), super::super::error::ErrorKind::NotSupported);

        let mixed = Value::Array(vec![Value::Int(1), Value::Text("a".into())]);
        assert!(matches!(codec.inspect(&mixed), Err(Error::NotSupported(_))));
    }

    #[test]
    fn test_array_text_encoding() {
        let codec = DefaultCodec::new();
        let value = Value::Array(vec![Value::Text("a\"b".into()), Value::Null]);
        let enc = codec.inspect(&value).unwrap();
        assert_eq!(enc.oid, Oid::TEXT_ARRAY);
        assert_eq!((enc.encode)(&value, &ctx()).unwrap(), br#"{"a\"b",NULL}"#.to_vec());
    }

    #[test]
    fn test_array_text_decoding() {
        let decoded = decode_text_array(br#"{plain,"with space",NULL,"NULL"}"#, &ctx()).unwrap();
        assert_eq!(
            decoded,
            Value::Array(vec![
                Value::Text("plain".into()),
                Value::Text("with space".into()),
                Value::Null,
                Value::Text("NULL".into()),
            ])
        );
        assert_eq!(decode_int_array(b"{}", &ctx()).unwrap(), Value::Array(vec![]));
    }

    #[test]
    fn test_unknown_oid_decodes_as_text() {
        let codec = DefaultCodec::new();
        let dec = codec.lookup(Oid(999_999));
        assert_eq!(dec.format, Format::Text);
        assert_eq!((dec.decode)(b"abc", &ctx()).unwrap(), Value::Text("abc".into()));
    }

    #[test]
    fn test_timestamp_binary_both_datetime_modes() {
        let ts = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(12, 30, 15, 250)
            .unwrap();
        for integer_datetimes in [true, false] {
            let ctx = CodecContext {
                integer_datetimes,
                ..CodecContext::default()
            };
            let bytes = encode_timestamp(&Value::Timestamp(ts), &ctx).unwrap();
            assert_eq!(decode_timestamp(&bytes, &ctx).unwrap(), Value::Timestamp(ts));
        }
    }

    #[test]
    fn test_epoch_date_is_zero() {
        let date = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert_eq!(encode_date(&Value::Date(date), &ctx()).unwrap(), 0i32.to_be_bytes());
        assert_eq!(decode_date(&(-1i32).to_be_bytes(), &ctx()).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()));
    }

    #[test]
    fn test_latin1_encoding() {
        let ctx = CodecContext {
            encoding: ClientEncoding::Latin1,
            ..CodecContext::default()
        };
        assert_eq!(ctx.encode_str("café").unwrap(), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(ctx.decode_str(&[b'c', 0xE9]).unwrap(), "cé");
        assert!(ctx.encode_str("€").is_err());
    }

    #[test]
    fn test_client_encoding_names() {
        assert_eq!(ClientEncoding::from_server_name("UTF8"), Some(ClientEncoding::Utf8));
        assert_eq!(ClientEncoding::from_server_name("unicode"), Some(ClientEncoding::Utf8));
        assert_eq!(ClientEncoding::from_server_name("ISO_8859_1"), Some(ClientEncoding::Latin1));
        assert_eq!(ClientEncoding::from_server_name("SQL_ASCII"), Some(ClientEncoding::SqlAscii));
        assert_eq!(ClientEncoding::from_server_name("EUC_JP"), None);
    }

    #[test]
    fn test_fixed_width_length_checked() {
        assert!(matches!(decode_int4(&[0, 1], &ctx()), Err(Error::Data(_))));
        assert_eq!(decode_int4(&42i32.to_be_bytes(), &ctx()).unwrap(), Value::Int4(42));
    }
}
