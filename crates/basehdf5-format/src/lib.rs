//! Pure-Rust HDF5 baseline format engine.
//!
//! This crate reads and writes the structures of the HDF5 baseline layout:
//! v0/v1 superblocks, symbol table groups indexed by v1 B-trees, local and
//! global heaps, v1 object headers and the datatype system that maps raw
//! bytes to [`value::Value`]s. Everything works on byte slices; file access
//! lives in the `basehdf5` crate.

pub mod allocation;
pub mod attribute;
pub mod btree_v1;
pub mod byte_order;
pub mod data_layout;
pub mod data_source;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod fields;
pub mod file_writer;
pub mod fill_value;
pub mod fixed_point;
pub mod float_point;
pub mod global_heap;
pub mod group_btree;
pub mod group_v1;
pub mod hdf_string;
pub mod local_heap;
pub mod message_type;
pub mod modification_time;
pub mod object_header;
pub mod object_header_writer;
pub mod signature;
pub mod superblock;
pub mod symbol_table;
pub mod type_builders;
pub mod value;

pub use error::{ErrorKind, FormatError};
pub use value::{FromValue, IntoValue, Value};
