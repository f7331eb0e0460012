//! Error types for HDF5 format parsing and serialization.

use thiserror::Error;

/// Coarse classification of a [`FormatError`].
///
/// Callers that only need to know *how bad* a failure is match on this
/// instead of the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input does not carry an HDF5 signature.
    NotAnHdfFile,
    /// A structure is malformed or uses an unsupported version.
    Format,
    /// An offset or size field points outside the file or contradicts another.
    CorruptFile,
    /// A value does not fit, or cannot be produced from, its declared datatype.
    Datatype,
    /// A local or global heap reference does not resolve.
    HeapReference,
    /// An element index or count disagrees with the dataspace.
    Bounds,
}

/// Errors that can occur when reading or writing HDF5 binary structures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The HDF5 magic signature was not found at any valid offset.
    #[error("HDF5 signature not found at any valid offset")]
    SignatureNotFound,

    /// The superblock version is not supported.
    #[error("unsupported superblock version: {0}")]
    UnsupportedVersion(u8),
    /// Invalid offset size (must be 2, 4, or 8).
    #[error("invalid offset size: {0} (must be 2, 4, or 8)")]
    InvalidOffsetSize(u8),
    /// Invalid length size (must be 2, 4, or 8).
    #[error("invalid length size: {0} (must be 2, 4, or 8)")]
    InvalidLengthSize(u8),
    /// Object header version other than 1.
    #[error("invalid object header version: {0}")]
    InvalidObjectHeaderVersion(u8),
    /// Unknown message type that is marked as must-understand.
    #[error("unsupported message type {0:#06x} marked as must-understand")]
    UnsupportedMessage(u16),
    /// A header message carries a version this crate does not read.
    #[error("message type {msg_type:#06x} has unsupported version {version}")]
    InvalidMessageVersion {
        /// Raw message type.
        msg_type: u16,
        /// Version byte found.
        version: u8,
    },
    /// Local heap block did not start with `HEAP`.
    #[error("invalid local heap signature")]
    InvalidLocalHeapSignature,
    /// Local heap version other than 0.
    #[error("invalid local heap version: {0}")]
    InvalidLocalHeapVersion(u8),
    /// Global heap block did not start with `GCOL`.
    #[error("invalid global heap signature")]
    InvalidGlobalHeapSignature,
    /// Global heap version other than 1.
    #[error("invalid global heap version: {0}")]
    InvalidGlobalHeapVersion(u8),
    /// B-tree node did not start with `TREE`.
    #[error("invalid B-tree signature")]
    InvalidBTreeSignature,
    /// B-tree node type other than 0 (group nodes).
    #[error("invalid B-tree node type: {0}")]
    InvalidBTreeNodeType(u8),
    /// Symbol table node did not start with `SNOD`.
    #[error("invalid symbol table node signature")]
    InvalidSymbolTableNodeSignature,
    /// Symbol table node version other than 1.
    #[error("invalid symbol table node version: {0}")]
    InvalidSymbolTableNodeVersion(u8),
    /// Datatype class outside the supported set.
    #[error("invalid or unsupported datatype class: {0}")]
    InvalidDatatypeClass(u8),
    /// Datatype class/version combination not understood.
    #[error("invalid datatype version {version} for class {class}")]
    InvalidDatatypeVersion {
        /// Datatype class.
        class: u8,
        /// Datatype version.
        version: u8,
    },
    /// Floating-point byte order bits use the reserved pattern.
    #[error("invalid floating-point byte order bits: {0:#04x}")]
    InvalidByteOrder(u8),
    /// Reference type other than object or dataset region.
    #[error("invalid reference type: {0}")]
    InvalidReferenceType(u8),
    /// String padding type outside 0..=2.
    #[error("invalid string padding type: {0}")]
    InvalidStringPadding(u8),
    /// Character set outside 0..=1.
    #[error("invalid character set: {0}")]
    InvalidCharacterSet(u8),
    /// Dataspace version other than 1 or 2.
    #[error("invalid dataspace version: {0}")]
    InvalidDataspaceVersion(u8),
    /// Dataspace type outside scalar/simple/null.
    #[error("invalid dataspace type: {0}")]
    InvalidDataspaceType(u8),
    /// Data layout version other than 1, 2 or 3.
    #[error("invalid data layout version: {0}")]
    InvalidLayoutVersion(u8),
    /// Data layout class outside compact/contiguous/chunked.
    #[error("invalid data layout class: {0}")]
    InvalidLayoutClass(u8),
    /// Chunked storage is outside the baseline this crate implements.
    #[error("chunked storage is not supported")]
    ChunkedLayoutUnsupported,
    /// Attribute message version other than 1.
    #[error("invalid attribute message version: {0}")]
    InvalidAttributeVersion(u8),
    /// A dataset object header has no datatype message.
    #[error("dataset object header has no datatype message")]
    DatasetMissingDatatype,
    /// A dataset object header has no dataspace message.
    #[error("dataset object header has no dataspace message")]
    DatasetMissingShape,
    /// A dataset object header has no data layout message.
    #[error("dataset object header has no data layout message")]
    DatasetMissingLayout,
    /// A header message or one of its fields exceeds its 16-bit size field.
    #[error("{what} of {size} bytes exceeds the 65535-byte limit")]
    MessageTooLarge {
        /// Which field overflowed.
        what: &'static str,
        /// Encoded size.
        size: usize,
    },
    /// Two links in one group share a name.
    #[error("duplicate link name in group: {0}")]
    DuplicateLinkName(String),
    /// A link name is empty or contains `/`.
    #[error("invalid link name: {0:?}")]
    InvalidLinkName(String),

    /// Unexpected end of data.
    #[error("unexpected EOF: need {expected} bytes, have {available}")]
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// A recorded address lies past the end of the file.
    #[error("address {address:#x} is past end of file ({file_len} bytes)")]
    AddressOutOfBounds {
        /// Address found in the file.
        address: u64,
        /// Length of the file.
        file_len: u64,
    },
    /// A size field contradicts the structure that holds it.
    #[error("inconsistent {what}: {value}")]
    InconsistentSize {
        /// Which field is inconsistent.
        what: &'static str,
        /// Value found.
        value: u64,
    },
    /// A node or header was reached twice while walking the file.
    #[error("cycle detected at address {0:#x}")]
    CycleDetected(u64),

    /// A floating-point size other than 4 or 8 bytes.
    #[error("unsupported floating-point size: {0} bytes")]
    UnsupportedFloatSize(u32),
    /// A fixed-point precision or field size the codec cannot handle.
    #[error("unsupported fixed-point layout: {size} bytes, {precision} bits at offset {offset}")]
    UnsupportedPrecision {
        /// Field size in bytes.
        size: u32,
        /// Bit precision.
        precision: u16,
        /// Bit offset.
        offset: u16,
    },
    /// VAX byte order is recognised but not decoded.
    #[error("VAX byte order is not supported")]
    UnsupportedByteOrder,
    /// A byte window does not match the datatype's size.
    #[error("value size mismatch: datatype needs {expected} bytes, got {actual}")]
    ValueSizeMismatch {
        /// Bytes required by the datatype.
        expected: usize,
        /// Bytes provided.
        actual: usize,
    },
    /// An integer does not fit the declared precision.
    #[error("value {value} does not fit in {precision} bits")]
    ValueOutOfRange {
        /// The value, rendered for the message.
        value: String,
        /// Declared precision.
        precision: u16,
    },
    /// A value variant does not match the datatype it is written with.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// What the datatype needs.
        expected: &'static str,
        /// What the caller passed.
        found: &'static str,
    },
    /// A string does not fit its fixed-size datatype.
    #[error("string of {len} bytes does not fit a {size}-byte string type")]
    StringTooLong {
        /// Encoded length.
        len: usize,
        /// Declared size.
        size: usize,
    },
    /// String bytes are not valid in the declared character set.
    #[error("string is not valid {0}")]
    InvalidStringEncoding(&'static str),
    /// A compound value lacks a member its datatype declares.
    #[error("compound value has no member {0:?}")]
    MissingCompoundMember(String),
    /// An array value does not match the dimensions of its datatype.
    #[error("array value has {actual} elements where the datatype needs {expected}")]
    ArrayShapeMismatch {
        /// Elements the datatype declares along this dimension.
        expected: usize,
        /// Elements found.
        actual: usize,
    },

    /// A global heap object does not exist in its collection.
    #[error("global heap object {index} not found in collection {collection:#x}")]
    GlobalHeapObjectNotFound {
        /// Collection address.
        collection: u64,
        /// Object index.
        index: u32,
    },
    /// A global heap collection was referenced before it was resolved.
    #[error("global heap collection {0:#x} has not been resolved")]
    GlobalHeapCollectionNotLoaded(u64),
    /// A referenced global heap collection could not be parsed.
    #[error("global heap collection {collection:#x} cannot be read: {cause}")]
    GlobalHeapCollectionUnreadable {
        /// Collection address.
        collection: u64,
        /// Why parsing the collection failed.
        cause: Box<FormatError>,
    },
    /// A local heap offset lies outside the data segment.
    #[error("local heap offset {offset} outside data segment of {size} bytes")]
    LocalHeapOffsetOutOfRange {
        /// Offset requested.
        offset: u64,
        /// Data segment size.
        size: u64,
    },

    /// An element index past the end of the dataspace.
    #[error("element {index} out of bounds for {len} elements")]
    ElementOutOfBounds {
        /// Requested element.
        index: u64,
        /// Number of elements in the dataspace.
        len: u64,
    },
    /// A value count disagrees with the dataspace.
    #[error("element count mismatch: dataspace holds {expected}, got {actual}")]
    ElementCountMismatch {
        /// Elements declared by the dataspace.
        expected: u64,
        /// Elements provided.
        actual: u64,
    },
    /// Raw data for a dataset was already written.
    #[error("dataset {0:?} already has data")]
    DataAlreadyWritten(String),
    /// A group or dataset handle does not belong to this writer.
    #[error("unknown handle: {0}")]
    InvalidHandle(usize),
}

impl FormatError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use FormatError::*;
        match self {
            SignatureNotFound => ErrorKind::NotAnHdfFile,
            UnexpectedEof { .. }
            | AddressOutOfBounds { .. }
            | InconsistentSize { .. }
            | CycleDetected(_) => ErrorKind::CorruptFile,
            UnsupportedFloatSize(_)
            | UnsupportedPrecision { .. }
            | UnsupportedByteOrder
            | ValueSizeMismatch { .. }
            | ValueOutOfRange { .. }
            | TypeMismatch { .. }
            | StringTooLong { .. }
            | InvalidStringEncoding(_)
            | MissingCompoundMember(_)
            | ArrayShapeMismatch { .. } => ErrorKind::Datatype,
            GlobalHeapObjectNotFound { .. }
            | GlobalHeapCollectionNotLoaded(_)
            | GlobalHeapCollectionUnreadable { .. }
            | LocalHeapOffsetOutOfRange { .. } => ErrorKind::HeapReference,
            ElementOutOfBounds { .. }
            | ElementCountMismatch { .. }
            | DataAlreadyWritten(_)
            | InvalidHandle(_) => ErrorKind::Bounds,
            _ => ErrorKind::Format,
        }
    }
}
