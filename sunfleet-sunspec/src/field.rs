//! SunSpec point addressing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire type of a SunSpec point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PointKind {
    Uint16,
    Int16,
    Enum16,
    Bitfield16,
    /// Scale factor (signed power of ten).
    Sunssf,
    Uint32,
    Int32,
    Acc32,
    Enum32,
    Bitfield32,
    Float32,
    Uint64,
    Int64,
    Acc64,
    /// Fixed-length ASCII string of the given number of registers.
    String(u16),
}

impl PointKind {
    /// Number of 16-bit registers a value occupies.
    pub fn registers(&self) -> u16 {
        match self {
            Self::Uint16 | Self::Int16 | Self::Enum16 | Self::Bitfield16 | Self::Sunssf => 1,
            Self::Uint32 | Self::Int32 | Self::Acc32 | Self::Enum32 | Self::Bitfield32 => 2,
            Self::Float32 => 2,
            Self::Uint64 | Self::Int64 | Self::Acc64 => 4,
            Self::String(len) => *len,
        }
    }

    /// Whether values of this kind can carry a scale factor.
    pub fn is_scalable(&self) -> bool {
        matches!(
            self,
            Self::Uint16
                | Self::Int16
                | Self::Uint32
                | Self::Int32
                | Self::Acc32
                | Self::Float32
                | Self::Uint64
                | Self::Int64
                | Self::Acc64
        )
    }

    /// Whether values name a symbol rather than a quantity.
    pub fn is_enum(&self) -> bool {
        matches!(self, Self::Enum16 | Self::Enum32)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Enum16 => "enum16",
            Self::Bitfield16 => "bitfield16",
            Self::Sunssf => "sunssf",
            Self::Uint32 => "uint32",
            Self::Int32 => "int32",
            Self::Acc32 => "acc32",
            Self::Enum32 => "enum32",
            Self::Bitfield32 => "bitfield32",
            Self::Float32 => "float32",
            Self::Uint64 => "uint64",
            Self::Int64 => "int64",
            Self::Acc64 => "acc64",
            Self::String(_) => "string",
        }
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(len) => write!(f, "string{}", len),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Unrecognized point type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown point type: {0}")]
pub struct ParseKindError(String);

impl FromStr for PointKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_lowercase().as_str() {
            "uint16" => Self::Uint16,
            "int16" => Self::Int16,
            "enum16" => Self::Enum16,
            "bitfield16" => Self::Bitfield16,
            "sunssf" => Self::Sunssf,
            "uint32" => Self::Uint32,
            "int32" => Self::Int32,
            "acc32" => Self::Acc32,
            "enum32" => Self::Enum32,
            "bitfield32" => Self::Bitfield32,
            "float32" => Self::Float32,
            "uint64" => Self::Uint64,
            "int64" => Self::Int64,
            "acc64" => Self::Acc64,
            other => {
                // string8, string(8), string:8
                let len = other
                    .strip_prefix("string")
                    .map(|rest| rest.trim_matches(|c| c == '(' || c == ')' || c == ':'))
                    .and_then(|len| len.parse::<u16>().ok())
                    .filter(|len| *len > 0);
                match len {
                    Some(len) => Self::String(len),
                    None => return Err(ParseKindError(s.to_string())),
                }
            }
        };
        Ok(kind)
    }
}

impl TryFrom<String> for PointKind {
    type Error = ParseKindError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PointKind> for String {
    fn from(kind: PointKind) -> Self {
        kind.to_string()
    }
}

/// Location of one point in a device's SunSpec layout.
///
/// `offset` counts registers from the first data register of the model
/// block, i.e. after its two header registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SunSpecField {
    /// Model id (e.g. 802 for a lithium-ion battery).
    pub model: u16,
    /// Which occurrence of the model, counting from 0.
    #[serde(default)]
    pub instance: u16,
    pub offset: u16,
    #[serde(rename = "type")]
    pub kind: PointKind,
}

impl SunSpecField {
    pub fn new(model: u16, instance: u16, offset: u16, kind: PointKind) -> Self {
        Self {
            model,
            instance,
            offset,
            kind,
        }
    }

    /// A `uint16` point, the most common kind.
    pub fn uint16(model: u16, instance: u16, offset: u16) -> Self {
        Self::new(model, instance, offset, PointKind::Uint16)
    }

    /// Registers occupied by this point.
    pub fn len(&self) -> u16 {
        self.kind.registers()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exclusive end offset within the model block.
    pub fn end(&self) -> u32 {
        u32::from(self.offset) + u32::from(self.len())
    }
}

impl fmt::Display for SunSpecField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]+{}:{}",
            self.model, self.instance, self.offset, self.kind
        )
    }
}
