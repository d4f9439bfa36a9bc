//! Reading and writing of `qmembed` configuration and result files, and of the external file
//! formats of the calculator.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{self, format_err};
use serde::{de::DeserializeOwned, Serialize};
use serde_yaml;

pub mod aims;
pub(crate) mod format;
pub mod numeric;


/// Reads a `qmembed` configuration YAML file and deserialises it into an appropriate structure.
///
/// # Arguments
///
/// * `name` - The name of the file to be read in (with its `.yml` or `.yaml` extension).
///
/// # Returns
///
/// A `Result` containing the structure deserialised from the read-in file.
pub fn read_qmembed_yaml<T, P: AsRef<Path>>(name: P) -> Result<T, anyhow::Error>
where
    T: DeserializeOwned,
{
    let mut reader = BufReader::new(File::open(&name).map_err(|err| {
        format_err!("Unable to open `{}`: {err}", name.as_ref().display())
    })?);
    serde_yaml::from_reader(&mut reader).map_err(|err| format_err!(err))
}

/// The path of the YAML file written for `name`.
///
/// Any extension of `name` is replaced by `.yml`.
pub fn qmembed_yaml_path<P: AsRef<Path>>(name: P) -> PathBuf {
    let mut path = name.as_ref().to_path_buf();
    path.set_extension("yml");
    path
}

/// Serialises a structure and writes it into a YAML file.
///
/// # Arguments
///
/// * `name` - The name of the YAML file to be written (without extensions). The resulting file
/// will have the `.yml` extension.
///
/// # Returns
///
/// The path of the written file.
pub fn write_qmembed_yaml<T, P: AsRef<Path>>(name: P, value: &T) -> Result<PathBuf, anyhow::Error>
where
    T: Serialize,
{
    let path = qmembed_yaml_path(name);
    let mut writer = BufWriter::new(File::create(&path).map_err(|err| {
        format_err!("Unable to create `{}`: {err}", path.display())
    })?);
    serde_yaml::to_writer(&mut writer, value).map_err(|err| format_err!(err))?;
    Ok(path)
}
