pub mod ramsnap;

use crate::core::geometry::TriclinicBox;
use crate::core::models::shape::Shape;
use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Auxiliary key-value pairs stored alongside a snapshot (step sizes, cycle
/// numbers); kept sorted so that output is deterministic.
pub type AuxInfo = BTreeMap<String, String>;

/// A packing configuration as persisted on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotData {
    pub simulation_box: TriclinicBox,
    pub shapes: Vec<Shape>,
    pub aux: AuxInfo,
}

/// Defines the interface for reading and writing snapshot file formats.
///
/// Implementors handle format-specific parsing and serialization; the
/// path-based helpers wrap buffered file I/O around them.
pub trait SnapshotFile {
    /// The error type for I/O operations.
    type Error: Error + From<io::Error>;

    /// Reads a snapshot from a buffered reader.
    fn read_from(reader: &mut impl BufRead) -> Result<SnapshotData, Self::Error>;

    /// Writes a snapshot to a writer.
    fn write_to(data: &SnapshotData, writer: &mut impl Write) -> Result<(), Self::Error>;

    /// Reads a snapshot from a file path.
    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<SnapshotData, Self::Error> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }

    /// Writes a snapshot to a file path.
    fn write_to_path<P: AsRef<Path>>(data: &SnapshotData, path: P) -> Result<(), Self::Error> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Self::write_to(data, &mut writer)?;
        Ok(())
    }
}
