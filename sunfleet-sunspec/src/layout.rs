//! SunSpec model discovery.
//!
//! A SunSpec device exposes the marker `SunS` at a well-known base address,
//! followed by a chain of model blocks. Each block starts with two header
//! registers `(id, length)`; the chain ends with id `0xFFFF`.

use async_trait::async_trait;
use sunfleet_core::{DeviceIdentity, ProtocolError};
use tracing::debug;

use crate::field::SunSpecField;
use crate::value::decode_string;

/// `SunS` in two registers.
pub const SUNS_MARKER: [u16; 2] = [0x5375, 0x6e53];

/// Base addresses probed for the marker, in order.
pub const BASE_ADDRESSES: [u16; 3] = [40000, 0, 50000];

/// Model id terminating the chain.
pub const END_MODEL_ID: u16 = 0xFFFF;

/// Id of the common (identity) model.
pub const COMMON_MODEL_ID: u16 = 1;

/// Largest register count a single Modbus read may request.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Something registers can be read from.
#[async_trait]
pub trait RegisterSource: Send {
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, ProtocolError>;
}

/// Header of one model block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelHeader {
    pub id: u16,
    /// Occurrence of this model id, counting from 0.
    pub instance: u16,
    /// Address of the id register.
    pub start: u16,
    /// Number of data registers after the header.
    pub len: u16,
}

impl ModelHeader {
    /// Address of the first data register.
    pub fn data_start(&self) -> u16 {
        self.start + 2
    }
}

/// A device's discovered model chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub base: u16,
    pub models: Vec<ModelHeader>,
}

impl Layout {
    /// Header of the `instance`-th occurrence of `model`.
    pub fn model(&self, id: u16, instance: u16) -> Option<&ModelHeader> {
        self.models
            .iter()
            .find(|m| m.id == id && m.instance == instance)
    }

    /// Absolute address of `field`, checking it lies inside its model block.
    pub fn address(&self, field: &SunSpecField) -> Result<u16, ProtocolError> {
        let model = self
            .model(field.model, field.instance)
            .ok_or_else(|| ProtocolError::UnknownPoint(format!("{}: no such model", field)))?;
        if field.end() > u32::from(model.len) {
            return Err(ProtocolError::UnknownPoint(format!(
                "{}: outside model of {} registers",
                field, model.len
            )));
        }
        Ok(model.data_start() + field.offset)
    }
}

/// Find the SunSpec base address and walk the model chain.
pub async fn discover<R: RegisterSource + ?Sized>(source: &mut R) -> Result<Layout, ProtocolError> {
    let base = find_base(source).await?;
    let mut models: Vec<ModelHeader> = Vec::new();

    let mut address = base
        .checked_add(2)
        .ok_or_else(|| ProtocolError::Decode("model chain overflows".into()))?;
    loop {
        let header = source.read_registers(address, 2).await?;
        let &[id, len] = header.as_slice() else {
            return Err(ProtocolError::Decode(format!(
                "short model header at {}",
                address
            )));
        };
        if id == END_MODEL_ID {
            break;
        }

        let instance = models.iter().filter(|m| m.id == id).count() as u16;
        debug!(model = id, instance, address, len, "Found model");
        models.push(ModelHeader {
            id,
            instance,
            start: address,
            len,
        });

        address = address
            .checked_add(2)
            .and_then(|a| a.checked_add(len))
            .ok_or_else(|| ProtocolError::Decode("model chain overflows".into()))?;
    }

    Ok(Layout { base, models })
}

async fn find_base<R: RegisterSource + ?Sized>(source: &mut R) -> Result<u16, ProtocolError> {
    for base in BASE_ADDRESSES {
        match source.read_registers(base, 2).await {
            Ok(regs) if regs[..] == SUNS_MARKER => return Ok(base),
            Ok(_) | Err(ProtocolError::Exception(_)) => {
                debug!(base, "No SunSpec marker");
            }
            Err(e) => return Err(e),
        }
    }
    Err(ProtocolError::Decode("SunSpec marker not found".into()))
}

/// Read `len` registers from `start`, in requests of at most
/// [`MAX_READ_REGISTERS`].
pub async fn read_block<R: RegisterSource + ?Sized>(
    source: &mut R,
    start: u16,
    len: u16,
) -> Result<Vec<u16>, ProtocolError> {
    let mut regs = Vec::with_capacity(usize::from(len));
    let mut offset = 0u16;
    while offset < len {
        let count = (len - offset).min(MAX_READ_REGISTERS);
        let chunk = source.read_registers(start + offset, count).await?;
        if chunk.len() != usize::from(count) {
            return Err(ProtocolError::Decode(format!(
                "asked for {} registers at {}, got {}",
                count,
                start + offset,
                chunk.len()
            )));
        }
        regs.extend(chunk);
        offset += count;
    }
    Ok(regs)
}

/// Read the identity block of the first common model.
pub async fn read_identity<R: RegisterSource + ?Sized>(
    source: &mut R,
    layout: &Layout,
) -> Result<DeviceIdentity, ProtocolError> {
    let common = layout
        .model(COMMON_MODEL_ID, 0)
        .ok_or_else(|| ProtocolError::UnknownPoint("common model not found".into()))?;
    if common.len < 64 {
        return Err(ProtocolError::Decode(format!(
            "common model too short: {} registers",
            common.len
        )));
    }

    let regs = read_block(source, common.data_start(), 64).await?;
    let text = |range: std::ops::Range<usize>| {
        regs.get(range)
            .map(decode_string)
            .ok_or_else(|| ProtocolError::Decode("common model block truncated".into()))
    };
    Ok(DeviceIdentity {
        manufacturer: text(0..16)?,
        model: text(16..32)?,
        options: text(32..40)?,
        version: text(40..48)?,
        serial_number: text(48..64)?,
    })
}
