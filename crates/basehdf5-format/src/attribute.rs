//! HDF5 Attribute message parsing (message type 0x000C).

use std::collections::BTreeSet;

use byteorder::{ByteOrder, LittleEndian};

use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::FormatError;
use crate::fields::{ensure_len, pad8};
use crate::global_heap::HeapAccess;
use crate::message_type::MessageType;
use crate::object_header::ObjectHeader;
use crate::object_header_writer::message_size_field;
use crate::value::Value;

/// A parsed HDF5 attribute message.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMessage {
    /// Attribute name.
    pub name: String,
    /// Attribute datatype.
    pub datatype: Datatype,
    /// Attribute dataspace.
    pub dataspace: Dataspace,
    /// Raw attribute value data.
    pub raw_data: Vec<u8>,
}

impl AttributeMessage {
    /// Parse an attribute message from raw message bytes.
    ///
    /// `length_size` is needed for dataspace dimension parsing.
    pub fn parse(data: &[u8], length_size: u8) -> Result<AttributeMessage, FormatError> {
        ensure_len(data, 0, 8)?;
        let version = data[0];
        let name_size = LittleEndian::read_u16(&data[2..]) as usize;
        let datatype_size = LittleEndian::read_u16(&data[4..]) as usize;
        let dataspace_size = LittleEndian::read_u16(&data[6..]) as usize;

        // v1 pads each field to 8 bytes; v3 adds a name encoding byte
        let (mut pos, align): (usize, fn(usize) -> usize) = match version {
            1 => (8, pad8),
            2 => (8, |n| n),
            3 => (9, |n| n),
            _ => return Err(FormatError::InvalidAttributeVersion(version)),
        };

        ensure_len(data, pos, name_size)?;
        let name = extract_name(&data[pos..pos + name_size]);
        pos += align(name_size);

        ensure_len(data, pos, datatype_size)?;
        let (datatype, _) = Datatype::parse(&data[pos..pos + datatype_size])?;
        pos += align(datatype_size);

        ensure_len(data, pos, dataspace_size)?;
        let dataspace = Dataspace::parse(&data[pos..pos + dataspace_size], length_size)?;
        pos += align(dataspace_size);

        let raw_len = (dataspace.num_elements() as usize)
            .checked_mul(datatype.size() as usize)
            .ok_or(FormatError::InconsistentSize {
                what: "attribute data size",
                value: dataspace.num_elements(),
            })?;
        ensure_len(data, pos, raw_len)?;

        Ok(AttributeMessage {
            name,
            datatype,
            dataspace,
            raw_data: data[pos..pos + raw_len].to_vec(),
        })
    }

    /// Serialize as a version 1 attribute message.
    ///
    /// Fails when a field, or the whole message, is too large for the
    /// 16-bit size fields of the header.
    pub fn serialize(&self, length_size: u8) -> Result<Vec<u8>, FormatError> {
        let name_len = self.name.len() + 1;
        let dt_bytes = self.datatype.serialize();
        let ds_bytes = self.dataspace.serialize(length_size);
        let field = |what, size: usize| {
            u16::try_from(size).map_err(|_| FormatError::MessageTooLarge { what, size })
        };
        let name_field = field("attribute name", name_len)?;
        let dt_field = field("attribute datatype", dt_bytes.len())?;
        let ds_field = field("attribute dataspace", ds_bytes.len())?;

        let mut buf = Vec::with_capacity(
            8 + pad8(name_len) + pad8(dt_bytes.len()) + pad8(ds_bytes.len()) + self.raw_data.len(),
        );
        buf.push(1); // version
        buf.push(0); // reserved
        buf.extend_from_slice(&name_field.to_le_bytes());
        buf.extend_from_slice(&dt_field.to_le_bytes());
        buf.extend_from_slice(&ds_field.to_le_bytes());
        // the padding after the name supplies its terminator
        buf.extend_from_slice(self.name.as_bytes());
        buf.resize(8 + pad8(name_len), 0);
        for field in [&dt_bytes, &ds_bytes] {
            let start = buf.len();
            buf.extend_from_slice(field);
            buf.resize(start + pad8(field.len()), 0);
        }
        buf.extend_from_slice(&self.raw_data);
        message_size_field(buf.len()).map_err(|_| FormatError::MessageTooLarge {
            what: "attribute message",
            size: buf.len(),
        })?;
        Ok(buf)
    }

    /// Decode every element of the attribute.
    pub fn read_values(&self, heap: &dyn HeapAccess) -> Result<Vec<Value>, FormatError> {
        let size = self.datatype.size() as usize;
        if size == 0 {
            return Ok(Vec::new());
        }
        self.raw_data
            .chunks(size)
            .map(|c| self.datatype.read_value(c, heap))
            .collect()
    }

    /// Global heap collections the attribute's values live in.
    pub fn heap_references(&self) -> Result<BTreeSet<u64>, FormatError> {
        let mut out = BTreeSet::new();
        let size = self.datatype.size() as usize;
        if size > 0 && self.datatype.uses_global_heap() {
            for c in self.raw_data.chunks(size) {
                self.datatype.heap_references(c, &mut out)?;
            }
        }
        Ok(out)
    }
}

/// Extract a name from raw bytes, stripping null terminator.
fn extract_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Extract all attribute messages from an object header.
pub fn extract_attributes(
    header: &ObjectHeader,
    length_size: u8,
) -> Result<Vec<AttributeMessage>, FormatError> {
    header
        .messages_of(MessageType::Attribute)
        .map(|msg| AttributeMessage::parse(&msg.data, length_size))
        .collect()
}

/// Find a specific attribute by name.
pub fn find_attribute<'a>(
    attrs: &'a [AttributeMessage],
    name: &str,
) -> Option<&'a AttributeMessage> {
    attrs.iter().find(|a| a.name == name)
}
