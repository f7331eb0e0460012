//! Header message type codes.

/// Message types the baseline engine reads or writes. Every other code is
/// carried as [`MessageType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Nil,
    Dataspace,
    Datatype,
    FillValue,
    DataLayout,
    Attribute,
    Continuation,
    SymbolTable,
    ModificationTime,
    /// A code outside the baseline set, kept raw.
    Unknown(u16),
}

const KNOWN: [MessageType; 9] = [
    MessageType::Nil,
    MessageType::Dataspace,
    MessageType::Datatype,
    MessageType::FillValue,
    MessageType::DataLayout,
    MessageType::Attribute,
    MessageType::Continuation,
    MessageType::SymbolTable,
    MessageType::ModificationTime,
];

impl MessageType {
    pub fn from_u16(code: u16) -> MessageType {
        KNOWN
            .into_iter()
            .find(|t| t.to_u16() == code)
            .unwrap_or(MessageType::Unknown(code))
    }

    pub fn to_u16(self) -> u16 {
        match self {
            MessageType::Nil => 0x0000,
            MessageType::Dataspace => 0x0001,
            MessageType::Datatype => 0x0003,
            MessageType::FillValue => 0x0005,
            MessageType::DataLayout => 0x0008,
            MessageType::Attribute => 0x000C,
            MessageType::Continuation => 0x0010,
            MessageType::SymbolTable => 0x0011,
            MessageType::ModificationTime => 0x0012,
            MessageType::Unknown(code) => code,
        }
    }
}
