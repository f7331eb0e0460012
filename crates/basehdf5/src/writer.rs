//! Writing API: FileBuilder for creating HDF5 files.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;

use basehdf5_format::dataspace::Dataspace;
use basehdf5_format::datatype::Datatype;
use basehdf5_format::file_writer::{DatasetId, FileWriter, GroupId, WriterConfig};
use basehdf5_format::value::{flatten_values, IntoValue, Value};

use crate::error::Error;
use crate::types::AttrValue;

/// Builder for a new HDF5 file.
///
/// Groups and datasets are addressed by the ids the builder hands out, or
/// looked up again by absolute path. Nothing touches the disk until
/// [`close`](Self::close).
///
/// # Example
///
/// ```no_run
/// use basehdf5::{make_i32_type, AttrValue, Dataspace, FileBuilder};
///
/// let mut builder = FileBuilder::create("output.h5").unwrap();
/// let root = builder.root();
/// let ds = builder
///     .create_dataset(root, "counts", make_i32_type(), Dataspace::simple(&[3]))
///     .unwrap();
/// builder.write_values(ds, [10i32, 20, 30]).unwrap();
/// builder.set_attribute(ds, "units", &AttrValue::String("items".into())).unwrap();
/// builder.close().unwrap();
/// ```
pub struct FileBuilder {
    writer: FileWriter,
    output: Option<(PathBuf, fs::File)>,
    group_paths: HashMap<GroupId, String>,
    groups: HashMap<String, GroupId>,
    datasets: HashMap<String, DatasetId>,
}

impl FileBuilder {
    /// An in-memory builder with the default layout.
    pub fn new() -> Result<Self, Error> {
        Self::with_config(WriterConfig::default())
    }

    /// An in-memory builder with an explicit layout.
    pub fn with_config(config: WriterConfig) -> Result<Self, Error> {
        let writer = FileWriter::new(config)?;
        let root = writer.root();
        Ok(FileBuilder {
            writer,
            output: None,
            group_paths: HashMap::from([(root, "/".to_string())]),
            groups: HashMap::from([("/".to_string(), root)]),
            datasets: HashMap::new(),
        })
    }

    /// Create (or truncate) `path` and build a file that [`close`](Self::close)
    /// writes there.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::create_with_config(path, WriterConfig::default())
    }

    pub fn create_with_config<P: AsRef<Path>>(
        path: P,
        config: WriterConfig,
    ) -> Result<Self, Error> {
        let mut builder = Self::with_config(config)?;
        let file = fs::File::create(path.as_ref())?;
        builder.output = Some((path.as_ref().to_path_buf(), file));
        Ok(builder)
    }

    pub fn config(&self) -> &WriterConfig {
        self.writer.config()
    }

    /// The root group.
    pub fn root(&self) -> GroupId {
        self.writer.root()
    }

    fn path_under(&self, parent: GroupId, name: &str) -> String {
        match self.group_paths.get(&parent).map(String::as_str) {
            Some("/") | None => format!("/{name}"),
            Some(p) => format!("{p}/{name}"),
        }
    }

    /// Create an empty group `name` inside `parent`.
    pub fn create_group(&mut self, parent: GroupId, name: &str) -> Result<GroupId, Error> {
        let id = self.writer.create_group(parent, name)?;
        let path = self.path_under(parent, name);
        self.group_paths.insert(id, path.clone());
        self.groups.insert(path, id);
        Ok(id)
    }

    /// Create dataset `name` inside `parent`.
    pub fn create_dataset(
        &mut self,
        parent: GroupId,
        name: &str,
        datatype: Datatype,
        dataspace: Dataspace,
    ) -> Result<DatasetId, Error> {
        let id = self.writer.create_dataset(parent, name, datatype, dataspace)?;
        let path = self.path_under(parent, name);
        debug!("dataset {path} created");
        self.datasets.insert(path, id);
        Ok(id)
    }

    /// Write the dataset's elements in row-major order.
    pub fn write_values<I>(&mut self, id: DatasetId, values: I) -> Result<(), Error>
    where
        I: IntoIterator,
        I::Item: IntoValue,
    {
        let values: Vec<Value> = values.into_iter().map(IntoValue::into_value).collect();
        Ok(self.writer.write_values(id, &values)?)
    }

    /// Write the dataset from nested arrays that follow its dimensions,
    /// e.g. `vec![vec![1, 2, 3], vec![4, 5, 6]]` for a 2x3 dataset.
    pub fn write_nested(&mut self, id: DatasetId, value: impl IntoValue) -> Result<(), Error> {
        let dims = self.writer.dataspace(id)?.dimensions.clone();
        let values = flatten_values(value.into_value(), &dims)?;
        Ok(self.writer.write_values(id, &values)?)
    }

    /// Attach an attribute to a dataset, replacing one of the same name.
    pub fn set_attribute(
        &mut self,
        id: DatasetId,
        name: &str,
        value: &AttrValue,
    ) -> Result<(), Error> {
        Ok(self.writer.set_attribute(id, name, value)?)
    }

    /// The group created at absolute `path`.
    pub fn group(&self, path: &str) -> Result<GroupId, Error> {
        self.groups
            .get(&normalize(path))
            .copied()
            .ok_or_else(|| Error::UnknownGroup(path.to_string()))
    }

    /// The dataset created at absolute `path`.
    pub fn dataset(&self, path: &str) -> Result<DatasetId, Error> {
        self.datasets
            .get(&normalize(path))
            .copied()
            .ok_or_else(|| Error::UnknownDataset(path.to_string()))
    }

    /// Serialize the file to bytes in memory.
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        Ok(self.writer.finish()?)
    }

    /// Serialize the file and write it to the path given to
    /// [`create`](Self::create).
    pub fn close(mut self) -> Result<(), Error> {
        let (path, mut file) = self.output.take().ok_or(Error::NoOutputPath)?;
        let bytes = self.writer.finish()?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        debug!("wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

/// Absolute form of a builder path: leading `/`, no empty components.
fn normalize(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", parts.join("/"))
}
