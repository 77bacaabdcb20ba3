//! Argument encoding and reply decoding for the script entry point.
//!
//! Every call has the positional layout
//! `QUALIFIER, opcode, timestamp, args...`. Replies come back as one of
//! the [`Reply`] shapes and are decoded by the typed helpers below, each of
//! which names the opcode in its errors.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{QlessError, Result};

/// Leading numeric qualifier of every invocation.
pub const QUALIFIER: i64 = 0;

/// Payload sent by the no-data variants in place of the job's data.
pub const NO_DATA_SENTINEL: &str = r#"{"finish":"yes"}"#;

/// Encoded form of an absent or empty payload.
pub const EMPTY_PAYLOAD: &str = "{}";

/// Logical operations dispatched through the script entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Put,
    Pop,
    Peek,
    Get,
    Fail,
    Heartbeat,
    Complete,
    Cancel,
    Track,
    Tag,
    Retry,
    Depends,
    Recur,
    ConfigGet,
    ConfigSet,
    ConfigUnset,
    Queues,
    Jobs,
}

impl Opcode {
    /// Wire name of the opcode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::Put => "put",
            Opcode::Pop => "pop",
            Opcode::Peek => "peek",
            Opcode::Get => "get",
            Opcode::Fail => "fail",
            Opcode::Heartbeat => "heartbeat",
            Opcode::Complete => "complete",
            Opcode::Cancel => "cancel",
            Opcode::Track => "track",
            Opcode::Tag => "tag",
            Opcode::Retry => "retry",
            Opcode::Depends => "depends",
            Opcode::Recur => "recur",
            Opcode::ConfigGet => "config.get",
            Opcode::ConfigSet => "config.set",
            Opcode::ConfigUnset => "config.unset",
            Opcode::Queues => "queues",
            Opcode::Jobs => "jobs",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Int(i64),
    Str(String),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(n) => write!(f, "{}", n),
            Arg::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Str(value.clone())
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(i64::from(value))
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::Int(i64::from(value))
    }
}

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg::Int(value as i64)
    }
}

/// A raw reply from the script runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Bytes(Vec<u8>),
    Status(String),
    Okay,
    Array(Vec<Reply>),
}

impl Reply {
    /// Name of the reply shape, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Nil => "nil",
            Reply::Int(_) => "integer",
            Reply::Bytes(_) => "bytes",
            Reply::Status(_) => "status",
            Reply::Okay => "ok",
            Reply::Array(_) => "array",
        }
    }

    /// Convenience constructor for byte-string replies.
    pub fn bytes(value: impl AsRef<[u8]>) -> Self {
        Reply::Bytes(value.as_ref().to_vec())
    }

    fn raw(&self) -> Vec<u8> {
        match self {
            Reply::Bytes(b) => b.clone(),
            Reply::Status(s) => s.as_bytes().to_vec(),
            other => format!("{:?}", other).into_bytes(),
        }
    }
}

/// An operation together with its operation-specific arguments.
///
/// The qualifier and timestamp are only added by [`Invocation::encode`],
/// so the same invocation can be replayed with the clock it was issued at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    opcode: Opcode,
    args: Vec<Arg>,
}

impl Invocation {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument from an iterator.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Builds the full positional argument list.
    pub fn encode(&self, now: i64) -> Vec<Arg> {
        let mut out = Vec::with_capacity(self.args.len() + 3);
        out.push(Arg::Int(QUALIFIER));
        out.push(Arg::from(self.opcode.as_str()));
        out.push(Arg::Int(now));
        out.extend(self.args.iter().cloned());
        out
    }
}

/// JSON-encodes a payload; null encodes as the empty payload.
pub fn encode_payload(data: &Value) -> String {
    match data {
        Value::Null => EMPTY_PAYLOAD.to_string(),
        other => other.to_string(),
    }
}

/// The canonical empty payload.
pub fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

fn normalize_payload(value: Value) -> Value {
    match value {
        Value::Null => empty_payload(),
        Value::String(s) if s.is_empty() => empty_payload(),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Null) => empty_payload(),
            Ok(decoded) => decoded,
            Err(_) => Value::String(s),
        },
        other => other,
    }
}

/// Serde helper for payload fields.
///
/// The runtime stores payloads as JSON text, so a string value is decoded
/// once more. Absent, null and empty payloads all become `{}`.
pub fn deserialize_payload<'de, D>(deserializer: D) -> std::result::Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(normalize_payload(value.unwrap_or(Value::Null)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringListRepr {
    List(Vec<String>),
    // Empty tables are encoded as `{}` by the runtime.
    Table(serde_json::Map<String, Value>),
}

/// Serde helper for string sets that may arrive as `[]`, `{}` or null.
pub fn deserialize_string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<StringListRepr>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(StringListRepr::List(items)) => Ok(items),
        Some(StringListRepr::Table(map)) => Ok(map
            .into_iter()
            .filter_map(|(_, v)| v.as_str().map(str::to_string))
            .collect()),
    }
}

/// Decodes a byte-string reply. A nil reply means the record is absent.
pub fn decode_bytes(op: &str, reply: Reply) -> Result<Vec<u8>> {
    match reply {
        Reply::Bytes(bytes) => Ok(bytes),
        Reply::Status(s) => Ok(s.into_bytes()),
        Reply::Nil => Err(QlessError::NotFound(format!("'{}' returned no record", op))),
        other => Err(QlessError::decode(
            op,
            other.raw(),
            format!("expected bytes, got {}", other.kind()),
        )),
    }
}

/// Decodes a UTF-8 string reply.
pub fn decode_string(op: &str, reply: Reply) -> Result<String> {
    match reply {
        Reply::Int(n) => Ok(n.to_string()),
        Reply::Okay => Ok("OK".to_string()),
        other => {
            let bytes = decode_bytes(op, other)?;
            String::from_utf8(bytes)
                .map_err(|e| QlessError::decode(op, e.as_bytes().to_vec(), e.to_string()))
        }
    }
}

/// Decodes an integer reply, accepting numeric byte strings.
pub fn decode_integer(op: &str, reply: Reply) -> Result<i64> {
    match reply {
        Reply::Int(n) => Ok(n),
        Reply::Bytes(ref bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| QlessError::decode(op, bytes.clone(), e.to_string()))?;
            parse_number(text).ok_or_else(|| {
                QlessError::decode(op, bytes.clone(), format!("'{}' is not a number", text))
            })
        }
        Reply::Nil => Err(QlessError::NotFound(format!("'{}' returned no value", op))),
        other => Err(QlessError::decode(
            op,
            other.raw(),
            format!("expected integer, got {}", other.kind()),
        )),
    }
}

fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().map(|f| f as i64))
}

/// Decodes a truthy reply: nil, `0`, `false` and empty strings are false.
pub fn decode_bool(op: &str, reply: Reply) -> Result<bool> {
    match reply {
        Reply::Nil => Ok(false),
        Reply::Okay => Ok(true),
        Reply::Int(n) => Ok(n != 0),
        Reply::Bytes(_) | Reply::Status(_) => {
            let text = decode_string(op, reply)?;
            Ok(!matches!(text.trim(), "" | "0" | "false"))
        }
        other => Err(QlessError::decode(
            op,
            other.raw(),
            format!("expected boolean, got {}", other.kind()),
        )),
    }
}

/// Decodes a JSON byte-string reply into `T`.
pub fn decode_json<T: DeserializeOwned>(op: &str, reply: Reply) -> Result<T> {
    let bytes = decode_bytes(op, reply)?;
    serde_json::from_slice(&bytes).map_err(|e| QlessError::decode(op, bytes.clone(), e.to_string()))
}

/// Decodes an array-of-strings reply.
pub fn decode_string_list(op: &str, reply: Reply) -> Result<Vec<String>> {
    match reply {
        Reply::Array(items) => items
            .into_iter()
            .map(|item| decode_string(op, item))
            .collect(),
        Reply::Nil => Ok(Vec::new()),
        // Some list opcodes answer with a JSON array instead.
        Reply::Bytes(_) => decode_json::<Vec<String>>(op, reply),
        other => Err(QlessError::decode(
            op,
            other.raw(),
            format!("expected array, got {}", other.kind()),
        )),
    }
}

/// A configuration value as stored by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Text(String),
    Integer(i64),
}

impl ConfigValue {
    /// Probes the reply shape and decodes accordingly.
    pub fn from_reply(option: &str, reply: Reply) -> Result<Self> {
        match reply {
            Reply::Bytes(_) | Reply::Status(_) => {
                Ok(ConfigValue::Text(decode_string(Opcode::ConfigGet.as_str(), reply)?))
            }
            Reply::Int(n) => Ok(ConfigValue::Integer(n)),
            other => Err(QlessError::UnsupportedConfigType {
                option: option.to_string(),
                kind: other.kind().to_string(),
            }),
        }
    }

    /// String form: text verbatim, integers in base 10.
    pub fn into_string(self) -> String {
        match self {
            ConfigValue::Text(s) => s,
            ConfigValue::Integer(n) => n.to_string(),
        }
    }
}
