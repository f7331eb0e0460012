//! High-level API for reading and writing baseline HDF5 files.
//!
//! This crate provides an ergonomic interface on top of `basehdf5-format`.
//!
//! # Reading
//!
//! ```no_run
//! use basehdf5::File;
//!
//! let file = File::open("data.h5").unwrap();
//! let ds = file.find_dataset("sensors/temperature").unwrap();
//! let values: Vec<f64> = file.read(ds).unwrap().typed().unwrap();
//! println!("shape: {:?}, data: {:?}", ds.shape(), values);
//! ```
//!
//! # Writing
//!
//! ```no_run
//! use basehdf5::{make_f64_type, Dataspace, FileBuilder};
//!
//! let mut builder = FileBuilder::create("output.h5").unwrap();
//! let root = builder.root();
//! let sensors = builder.create_group(root, "sensors").unwrap();
//! let ds = builder
//!     .create_dataset(sensors, "temperature", make_f64_type(), Dataspace::simple(&[3]))
//!     .unwrap();
//! builder.write_values(ds, [22.5, 23.1, 21.8]).unwrap();
//! builder.close().unwrap();
//! ```

pub mod error;
pub mod reader;
pub mod types;
pub mod writer;

pub use error::Error;
pub use reader::{Dataset, File, Group};
pub use types::{AttrValue, DType};
pub use writer::FileBuilder;

// Re-export useful types from basehdf5-format for advanced users
pub use basehdf5_format::data_source::TypedDataSource;
pub use basehdf5_format::dataspace::Dataspace;
pub use basehdf5_format::datatype::Datatype;
pub use basehdf5_format::error::{ErrorKind, FormatError};
pub use basehdf5_format::file_writer::{DatasetId, GroupId, Timestamp, WriterConfig};
pub use basehdf5_format::hdf_string::{CharacterSet, StringPadding};
pub use basehdf5_format::type_builders::{
    make_array_type, make_f32_type, make_f64_type, make_fixed_string_type, make_i16_type,
    make_i32_type, make_i64_type, make_i8_type, make_u16_type, make_u32_type, make_u64_type,
    make_u8_type, make_vl_sequence_type, make_vl_string_type, CompoundTypeBuilder,
};
pub use basehdf5_format::value::{FromValue, IntoValue, Value};
