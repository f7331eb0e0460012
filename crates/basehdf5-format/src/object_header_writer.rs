//! Object header writer for the v1 format.
//!
//! Messages are laid out in insertion order with payloads padded to eight
//! bytes. The primary block has a fixed size chosen when the object was
//! created; whatever does not fit moves to a continuation block, and any
//! space left in a block is covered by a single Nil message.

use log::debug;

use crate::allocation::{AllocationKind, FileAllocation};
use crate::error::FormatError;
use crate::fields::{pad8, write_offset};
use crate::message_type::MessageType;
use crate::object_header::{MESSAGE_HEADER_SIZE, PREFIX_SIZE};

/// Writer for v1 object headers.
#[derive(Debug, Clone, Default)]
pub struct ObjectHeaderWriter {
    messages: Vec<(MessageType, Vec<u8>, u8)>, // (type, data, msg_flags)
}

/// Encoded blocks of one object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedHeader {
    /// `(address, bytes)` of the primary block and any continuation block.
    pub blocks: Vec<(u64, Vec<u8>)>,
}

fn encoded_len(data: &[u8]) -> usize {
    MESSAGE_HEADER_SIZE + pad8(data.len())
}

/// The 16-bit size field a message payload of `len` bytes is written with.
pub fn message_size_field(len: usize) -> Result<u16, FormatError> {
    let padded = pad8(len);
    u16::try_from(padded).map_err(|_| FormatError::MessageTooLarge {
        what: "header message",
        size: padded,
    })
}

fn push_message(
    buf: &mut Vec<u8>,
    msg_type: MessageType,
    data: &[u8],
    flags: u8,
) -> Result<(), FormatError> {
    let size = message_size_field(data.len())?;
    let padded = usize::from(size);
    buf.extend_from_slice(&msg_type.to_u16().to_le_bytes());
    buf.extend_from_slice(&size.to_le_bytes());
    buf.push(flags);
    buf.extend_from_slice(&[0u8; 3]);
    buf.extend_from_slice(data);
    buf.resize(buf.len() + padded - data.len(), 0);
    Ok(())
}

/// Cover `remaining` bytes with one Nil message. Returns false when there
/// is nothing to cover.
fn push_nil(buf: &mut Vec<u8>, remaining: usize) -> Result<bool, FormatError> {
    if remaining < MESSAGE_HEADER_SIZE {
        return Ok(false);
    }
    push_message(
        buf,
        MessageType::Nil,
        &vec![0u8; remaining - MESSAGE_HEADER_SIZE],
        0,
    )?;
    Ok(true)
}

impl ObjectHeaderWriter {
    /// Create a new empty object header writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to the header with default flags (0).
    pub fn add_message(&mut self, msg_type: MessageType, data: Vec<u8>) {
        self.messages.push((msg_type, data, 0));
    }

    /// Add a message with specific flags.
    pub fn add_message_with_flags(&mut self, msg_type: MessageType, data: Vec<u8>, flags: u8) {
        self.messages.push((msg_type, data, flags));
    }

    /// Bytes needed to hold every message in a single block, prefix included.
    pub fn encoded_size(&self) -> u64 {
        (PREFIX_SIZE + self.messages.iter().map(|(_, d, _)| encoded_len(d)).sum::<usize>()) as u64
    }

    /// Lay out the header in a primary block of `block_size` bytes at
    /// `address`, spilling to a continuation block when needed.
    pub fn finish(
        &self,
        address: u64,
        block_size: u64,
        alloc: &mut FileAllocation,
        offset_size: u8,
        length_size: u8,
    ) -> Result<EncodedHeader, FormatError> {
        let area = (block_size as usize).saturating_sub(PREFIX_SIZE);
        let cont_len = MESSAGE_HEADER_SIZE + pad8(offset_size as usize + length_size as usize);
        let total: usize = self.messages.iter().map(|(_, d, _)| encoded_len(d)).sum();

        let split = if total <= area {
            self.messages.len()
        } else {
            let mut used = 0;
            let mut n = 0;
            for (_, data, _) in &self.messages {
                if used + encoded_len(data) + cont_len > area {
                    break;
                }
                used += encoded_len(data);
                n += 1;
            }
            if used + cont_len > area {
                return Err(FormatError::InconsistentSize {
                    what: "object header block too small for a continuation",
                    value: block_size,
                });
            }
            n
        };

        let mut count = 0usize;
        let mut primary = Vec::with_capacity(block_size as usize);
        primary.resize(PREFIX_SIZE, 0);
        for (msg_type, data, flags) in &self.messages[..split] {
            push_message(&mut primary, *msg_type, data, *flags)?;
            count += 1;
        }

        let mut blocks = Vec::new();
        if split < self.messages.len() {
            let rest = &self.messages[split..];
            let length: usize = rest.iter().map(|(_, d, _)| encoded_len(d)).sum();
            let cont_address = alloc.allocate(AllocationKind::Continuation, length as u64)?;
            debug!(
                "object header {address:#x}: {} messages spill to continuation {cont_address:#x}",
                rest.len()
            );

            let mut payload = Vec::new();
            write_offset(&mut payload, cont_address, offset_size);
            write_offset(&mut payload, length as u64, length_size);
            push_message(&mut primary, MessageType::Continuation, &payload, 0)?;
            count += 1;

            let mut cont = Vec::with_capacity(length);
            for (msg_type, data, flags) in rest {
                push_message(&mut cont, *msg_type, data, *flags)?;
                count += 1;
            }
            blocks.push((cont_address, cont));
        }

        let remaining = (PREFIX_SIZE + area).saturating_sub(primary.len());
        if push_nil(&mut primary, remaining)? {
            count += 1;
        }

        primary[0] = 1;
        primary[2..4].copy_from_slice(&(count as u16).to_le_bytes());
        primary[4..8].copy_from_slice(&1u32.to_le_bytes());
        primary[8..12].copy_from_slice(&(area as u32).to_le_bytes());
        blocks.insert(0, (address, primary));
        Ok(EncodedHeader { blocks })
    }
}
