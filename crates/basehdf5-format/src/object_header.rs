//! HDF5 version 1 object header parsing.
//!
//! The header prefix records how many messages the object has in total.
//! Reading walks the primary block and any continuation blocks in order and
//! stops once that many messages have been seen.

use std::collections::{HashSet, VecDeque};

use byteorder::{ByteOrder, LittleEndian};
use log::{trace, warn};

use crate::error::FormatError;
use crate::fields::{check_range, ensure_len, read_length, read_offset};
use crate::message_type::MessageType;

/// Size of the v1 prefix, including its alignment padding.
pub const PREFIX_SIZE: usize = 16;

/// Size of a message's type/size/flags header.
pub const MESSAGE_HEADER_SIZE: usize = 8;

/// Message flag: the message must be understood to use the object.
pub const FLAG_MUST_UNDERSTAND: u8 = 0x08;

/// Message flag: the message is constant.
pub const FLAG_CONSTANT: u8 = 0x01;

/// A single parsed header message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMessage {
    /// The message type.
    pub msg_type: MessageType,
    /// Message flags byte.
    pub flags: u8,
    /// Raw message data bytes, padding included.
    pub data: Vec<u8>,
}

/// A Continuation message: where the next block of messages lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    pub address: u64,
    pub length: u64,
}

impl Continuation {
    pub fn parse(data: &[u8], offset_size: u8, length_size: u8) -> Result<Continuation, FormatError> {
        Ok(Continuation {
            address: read_offset(data, 0, offset_size)?,
            length: read_length(data, offset_size as usize, length_size)?,
        })
    }
}

/// Parsed v1 object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Object reference count.
    pub reference_count: u32,
    /// All non-NIL messages from all blocks, in file order.
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    /// Parse an object header at the given offset in the data buffer.
    ///
    /// `offset_size` and `length_size` come from the superblock.
    pub fn parse(
        data: &[u8],
        offset: usize,
        offset_size: u8,
        length_size: u8,
    ) -> Result<ObjectHeader, FormatError> {
        ensure_len(data, offset, PREFIX_SIZE)?;

        let version = data[offset];
        if version != 1 {
            return Err(FormatError::InvalidObjectHeaderVersion(version));
        }

        let num_messages = LittleEndian::read_u16(&data[offset + 2..]) as usize;
        let reference_count = LittleEndian::read_u32(&data[offset + 4..]);
        let header_data_size = u64::from(LittleEndian::read_u32(&data[offset + 8..]));

        let mut blocks = VecDeque::new();
        blocks.push_back(Continuation {
            address: (offset + PREFIX_SIZE) as u64,
            length: header_data_size,
        });
        let mut seen_blocks = HashSet::new();
        let mut messages = Vec::new();
        let mut count = 0usize;

        while let Some(block) = blocks.pop_front() {
            if count >= num_messages {
                break;
            }
            if !seen_blocks.insert(block.address) {
                return Err(FormatError::CycleDetected(block.address));
            }
            check_range(block.address, block.length, data.len())?;
            let mut pos = block.address as usize;
            let end = pos + block.length as usize;

            while count < num_messages && pos + MESSAGE_HEADER_SIZE <= end {
                let msg_type = MessageType::from_u16(LittleEndian::read_u16(&data[pos..]));
                let size = LittleEndian::read_u16(&data[pos + 2..]) as usize;
                let flags = data[pos + 4];
                pos += MESSAGE_HEADER_SIZE;
                if pos + size > end {
                    return Err(FormatError::InconsistentSize {
                        what: "header message size",
                        value: size as u64,
                    });
                }
                count += 1;
                trace!("object header {offset:#x}: {msg_type:?} ({size} bytes)");

                match msg_type {
                    MessageType::Nil => {}
                    MessageType::Unknown(id) if flags & FLAG_MUST_UNDERSTAND != 0 => {
                        return Err(FormatError::UnsupportedMessage(id));
                    }
                    MessageType::Unknown(id) => {
                        warn!("object header {offset:#x}: unknown message type {id:#06x} kept as raw bytes");
                    }
                    MessageType::Continuation => {
                        blocks.push_back(Continuation::parse(
                            &data[pos..pos + size],
                            offset_size,
                            length_size,
                        )?);
                    }
                    _ => {}
                }
                if msg_type != MessageType::Nil {
                    messages.push(HeaderMessage {
                        msg_type,
                        flags,
                        data: data[pos..pos + size].to_vec(),
                    });
                }
                pos += size;
            }
        }

        if count < num_messages {
            warn!(
                "object header {offset:#x}: expected {num_messages} messages, found {count}"
            );
        }

        Ok(ObjectHeader {
            reference_count,
            messages,
        })
    }

    /// The first message of `msg_type`, if any.
    pub fn find_message(&self, msg_type: MessageType) -> Option<&HeaderMessage> {
        self.messages.iter().find(|m| m.msg_type == msg_type)
    }

    /// Every message of `msg_type`, in order.
    pub fn messages_of(&self, msg_type: MessageType) -> impl Iterator<Item = &HeaderMessage> {
        self.messages.iter().filter(move |m| m.msg_type == msg_type)
    }
}
