use crate::prelude::*;

use bytes::Bytes;
use nom::number::complete::{be_u16, be_u32};
use serde::Serialize;
use std::fmt;

use crate::error::Error;
use crate::omnik::field::{FieldSpec, Layout, PostFilter, TEMPERATURE};

pub const REQUEST_LEN: usize = 16;
pub const MAX_RESPONSE_LEN: usize = 1024;

const HEADER: [u8; 4] = [0x68, 0x02, 0x40, 0x30];
const TRAILER: [u8; 2] = [0x01, 0x00];
const END: u8 = 0x16;
const CHECKSUM_BASE: u32 = 115;

// raw u16 the inverter sends when a sensor has nothing to report
const NO_SIGNAL: u16 = 0xFFFF;

// Value {{{
/// A decoded reading. Absence is `Option::None` at the call sites, never a
/// variant here, so "no data" can't be confused with zero.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    // text from the portal: numbers become numbers, anything else stays as-is
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        match text.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Float(f),
            _ => Self::Text(text.to_owned()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
} // }}}

// Request {{{
/// The 16 byte frame that asks the inverter for its statistics.
///
/// ```text
/// 68 02 40 30 | s3 s2 s1 s0 s3 s2 s1 s0 | 01 00 | cs | 16
/// ```
///
/// where `s0..s3` are the big-endian bytes of the serial number and `cs` is
/// `(s0 + s1 + s2 + s3) * 2 + 115`, truncated to a byte.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Request([u8; REQUEST_LEN]);

impl Request {
    pub fn new(serial: Serial) -> Self {
        let raw = serial.to_bytes();
        let mut reversed = raw;
        reversed.reverse();

        let mut r = [0; REQUEST_LEN];
        r[0..4].copy_from_slice(&HEADER);
        r[4..8].copy_from_slice(&reversed);
        r[8..12].copy_from_slice(&reversed);
        r[12..14].copy_from_slice(&TRAILER);
        r[14] = Self::checksum(&raw);
        r[15] = END;

        Self(r)
    }

    pub fn checksum(raw: &[u8; 4]) -> u8 {
        let sum: u32 = raw.iter().map(|b| u32::from(*b)).sum();
        ((sum * 2 + CHECKSUM_BASE) & 0xff) as u8
    }

    pub fn bytes(&self) -> &[u8; REQUEST_LEN] {
        &self.0
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request({})", hex::encode(self.0))
    }
}

/// Builds the polling frame for a raw serial number.
pub fn build_request(serial: u64) -> Result<[u8; REQUEST_LEN], Error> {
    let serial = Serial::try_from(serial)?;
    Ok(*Request::new(serial).bytes())
} // }}}

// Response {{{
/// Whatever came back from one poll of the inverter.
///
/// All reads are bounds-checked against the received bytes; a short or garbled
/// frame only makes the affected fields absent. An absent buffer (the inverter
/// could not be reached) makes every field absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    raw: Option<Bytes>,
}

impl Response {
    pub fn new(raw: Option<Bytes>) -> Self {
        Self { raw }
    }

    pub fn absent() -> Self {
        Self { raw: None }
    }

    pub fn is_present(&self) -> bool {
        self.raw.is_some()
    }

    fn tail(&self, begin: usize) -> Option<&[u8]> {
        self.raw.as_ref()?.get(begin..)
    }

    pub fn read_string(&self, begin: usize, end: usize) -> Option<String> {
        let bytes = self.raw.as_ref()?.get(begin..end)?;
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }

    /// Big-endian u16 at `begin` divided by `divider`.
    ///
    /// The no-signal sentinel 0xFFFF comes back as `Int(-1)` whatever the divider.
    pub fn read_scaled_u16(&self, begin: usize, divider: u32) -> Option<Value> {
        let (_, raw) = be_u16::<_, nom::error::Error<&[u8]>>(self.tail(begin)?).ok()?;

        if raw == NO_SIGNAL {
            return Some(Value::Int(-1));
        }

        Self::scale(u64::from(raw), divider)
    }

    pub fn read_scaled_u32(&self, begin: usize, divider: u32) -> Option<Value> {
        let (_, raw) = be_u32::<_, nom::error::Error<&[u8]>>(self.tail(begin)?).ok()?;

        Self::scale(u64::from(raw), divider)
    }

    fn scale(raw: u64, divider: u32) -> Option<Value> {
        if divider == 0 {
            return None;
        }
        Some(Value::Float(raw as f64 / f64::from(divider)))
    }

    pub fn decode(&self, spec: &FieldSpec) -> Option<Value> {
        let value = match spec.layout {
            Layout::Text { end } => self.read_string(spec.offset, end).map(Value::Text),
            Layout::U16 { divider } => self.read_scaled_u16(spec.offset, divider),
            Layout::U32 { divider } => self.read_scaled_u32(spec.offset, divider),
        }?;

        match (spec.post, value) {
            (PostFilter::Integer, Value::Float(f)) => Some(Value::Int(f as i64)),
            (PostFilter::Ceiling(limit), Value::Float(f)) if f > limit => None,
            (_, value) => Some(value),
        }
    }

    /// Inverter temperature; absent when the inverter is powered down.
    pub fn temperature(&self) -> Option<Value> {
        self.decode(&TEMPERATURE)
    }

    pub fn is_online(&self) -> bool {
        self.temperature().is_some()
    }

    pub fn status(&self) -> Value {
        let status = if self.is_online() { "Online" } else { "Offline" };
        Value::Text(status.to_owned())
    }
} // }}}
