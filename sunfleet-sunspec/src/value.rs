//! Register decoding and encoding for SunSpec point types.
//!
//! Multi-register values are big-endian, most significant register first.

use std::fmt;

use serde::{Deserialize, Serialize};
use sunfleet_core::ProtocolError;

use crate::field::PointKind;

/// A decoded SunSpec point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SunSpecValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
    /// The device reports the point as not implemented.
    NotImplemented,
}

impl SunSpecValue {
    pub fn is_implemented(&self) -> bool {
        !matches!(self, Self::NotImplemented)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Unsigned(v) => Some(*v as f64),
            Self::Signed(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) | Self::NotImplemented => None,
        }
    }

    /// Apply a SunSpec scale factor (`value * 10^sf`).
    pub fn scaled(&self, sf: i16) -> Option<f64> {
        self.as_f64().map(|v| v * 10f64.powi(i32::from(sf)))
    }

    /// Parse a command payload for a point of `kind`.
    pub fn parse(kind: PointKind, text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        let invalid = |e: String| {
            ProtocolError::Encode(format!("invalid {} value {:?}: {}", kind, text, e))
        };
        let value = match kind {
            PointKind::Uint16
            | PointKind::Enum16
            | PointKind::Bitfield16
            | PointKind::Uint32
            | PointKind::Acc32
            | PointKind::Enum32
            | PointKind::Bitfield32
            | PointKind::Uint64
            | PointKind::Acc64 => Self::Unsigned(text.parse::<u64>().map_err(|e| invalid(e.to_string()))?),
            PointKind::Int16 | PointKind::Sunssf | PointKind::Int32 | PointKind::Int64 => {
                Self::Signed(text.parse::<i64>().map_err(|e| invalid(e.to_string()))?)
            }
            PointKind::Float32 => Self::Float(text.parse::<f64>().map_err(|e| invalid(e.to_string()))?),
            PointKind::String(_) => Self::Text(text.to_string()),
        };
        Ok(value)
    }
}

impl fmt::Display for SunSpecValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Signed(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::NotImplemented => f.write_str("n/a"),
        }
    }
}

fn join(regs: &[u16]) -> u64 {
    regs.iter().fold(0u64, |acc, r| (acc << 16) | u64::from(*r))
}

fn split(value: u64, count: usize) -> Vec<u16> {
    (0..count)
        .rev()
        .map(|i| (value >> (16 * i)) as u16)
        .collect()
}

/// Decode a value of `kind` from exactly `kind.registers()` registers.
pub fn decode(kind: PointKind, regs: &[u16]) -> Result<SunSpecValue, ProtocolError> {
    if regs.len() != usize::from(kind.registers()) {
        return Err(ProtocolError::Decode(format!(
            "{} needs {} registers, got {}",
            kind,
            kind.registers(),
            regs.len()
        )));
    }
    let raw = match kind {
        PointKind::String(_) => 0,
        _ => join(regs),
    };

    let value = match kind {
        PointKind::Uint16 | PointKind::Enum16 | PointKind::Bitfield16 if raw == 0xFFFF => {
            SunSpecValue::NotImplemented
        }
        PointKind::Uint16 | PointKind::Enum16 | PointKind::Bitfield16 => {
            SunSpecValue::Unsigned(raw)
        }
        PointKind::Int16 | PointKind::Sunssf if raw == 0x8000 => SunSpecValue::NotImplemented,
        PointKind::Int16 | PointKind::Sunssf => SunSpecValue::Signed(i64::from(raw as u16 as i16)),
        PointKind::Uint32 | PointKind::Enum32 | PointKind::Bitfield32 if raw == 0xFFFF_FFFF => {
            SunSpecValue::NotImplemented
        }
        PointKind::Uint32 | PointKind::Enum32 | PointKind::Bitfield32 => {
            SunSpecValue::Unsigned(raw)
        }
        PointKind::Int32 if raw == 0x8000_0000 => SunSpecValue::NotImplemented,
        PointKind::Int32 => SunSpecValue::Signed(i64::from(raw as u32 as i32)),
        PointKind::Acc32 | PointKind::Acc64 if raw == 0 => SunSpecValue::NotImplemented,
        PointKind::Acc32 | PointKind::Acc64 => SunSpecValue::Unsigned(raw),
        PointKind::Float32 => {
            let v = f32::from_bits(raw as u32);
            if v.is_nan() {
                SunSpecValue::NotImplemented
            } else {
                SunSpecValue::Float(f64::from(v))
            }
        }
        PointKind::Uint64 if raw == u64::MAX => SunSpecValue::NotImplemented,
        PointKind::Uint64 => SunSpecValue::Unsigned(raw),
        PointKind::Int64 if raw == 0x8000_0000_0000_0000 => SunSpecValue::NotImplemented,
        PointKind::Int64 => SunSpecValue::Signed(raw as i64),
        PointKind::String(_) => {
            let text = decode_string(regs);
            if text.is_empty() {
                SunSpecValue::NotImplemented
            } else {
                SunSpecValue::Text(text)
            }
        }
    };
    Ok(value)
}

/// Two ASCII bytes per register, trimmed of NULs and spaces.
pub fn decode_string(regs: &[u16]) -> String {
    let bytes: Vec<u8> = regs.iter().flat_map(|r| r.to_be_bytes()).collect();
    String::from_utf8_lossy(&bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Encode `value` as `kind.registers()` registers.
pub fn encode(kind: PointKind, value: &SunSpecValue) -> Result<Vec<u16>, ProtocolError> {
    let count = usize::from(kind.registers());
    let mismatch =
        || ProtocolError::Encode(format!("cannot encode {:?} as {}", value, kind));
    let out_of_range =
        || ProtocolError::Encode(format!("{} is out of range for {}", value, kind));

    let regs = match (kind, value) {
        (PointKind::String(len), SunSpecValue::Text(text)) => {
            let bytes = text.as_bytes();
            if !text.is_ascii() || bytes.len() > usize::from(len) * 2 {
                return Err(out_of_range());
            }
            let mut padded = bytes.to_vec();
            padded.resize(usize::from(len) * 2, 0);
            padded
                .chunks(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect()
        }
        (PointKind::Float32, v) => {
            let v = v.as_f64().ok_or_else(mismatch)?;
            split(u64::from((v as f32).to_bits()), count)
        }
        (
            PointKind::Int16 | PointKind::Sunssf | PointKind::Int32 | PointKind::Int64,
            SunSpecValue::Signed(_) | SunSpecValue::Unsigned(_),
        ) => {
            let v = match value {
                SunSpecValue::Signed(v) => *v,
                SunSpecValue::Unsigned(v) => i64::try_from(*v).map_err(|_| out_of_range())?,
                _ => return Err(mismatch()),
            };
            let bits = 16 * count as u32;
            if bits < 64 {
                let limit = 1i64 << (bits - 1);
                if v < -limit || v >= limit {
                    return Err(out_of_range());
                }
            }
            split(v as u64, count)
        }
        (PointKind::String(_), _) | (_, SunSpecValue::Text(_) | SunSpecValue::NotImplemented) => {
            return Err(mismatch());
        }
        (_, SunSpecValue::Float(_)) => return Err(mismatch()),
        (_, SunSpecValue::Signed(v)) if *v < 0 => return Err(out_of_range()),
        (_, SunSpecValue::Signed(v)) => encode_unsigned(*v as u64, count).ok_or_else(out_of_range)?,
        (_, SunSpecValue::Unsigned(v)) => encode_unsigned(*v, count).ok_or_else(out_of_range)?,
    };
    Ok(regs)
}

fn encode_unsigned(value: u64, count: usize) -> Option<Vec<u16>> {
    let bits = 16 * count as u32;
    if bits < 64 && value >> bits != 0 {
        return None;
    }
    Some(split(value, count))
}
