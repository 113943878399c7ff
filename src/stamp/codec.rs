//! Binary stamp-library format.
//!
//! Layout (all integers and floats big-endian):
//! magic `0xFEED0001` (u32), version `100` (u16), stamp count (i32),
//! description (u16 byte length + UTF-8), then per stamp: size-class tag
//! (i32, the dense side length), dbh (f32), hd-ratio (f32), crown radius
//! (f32), offset (i32), size^2 f32 values row-major. A stamp with dbh = 0
//! is a reader stamp. Save -> load -> save round-trips byte-identically.

use super::Stamp;
use super::StampContainer;
use crate::STAMP_MAGIC;
use crate::STAMP_VERSION;
use crate::error::Result;
use crate::error::SylvaError;
use byteorder::BE;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::Path;

impl StampContainer {
    /// load a stamp library from a file
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let file = File::open(path)
            .map_err(|e| SylvaError::input(format!("stamp file {}: {}", path.display(), e)))?;
        log::debug!("loading stamp file {}", path.display());
        Self::load(&mut BufReader::new(file), name.as_str()).map_err(|e| match e {
            SylvaError::Io(io) => SylvaError::input(format!("stamp file {}: {}", name, io)),
            other => other,
        })
    }

    /// decode a stamp library and finalize its lookup table
    pub fn load(reader: &mut impl Read, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let magic = reader.read_u32::<BE>()?;
        if magic != STAMP_MAGIC {
            return Err(SylvaError::input(format!("{}: invalid file type", name)));
        }
        let version = reader.read_u16::<BE>()?;
        if version != STAMP_VERSION {
            return Err(SylvaError::input(format!(
                "{}: invalid file version {}",
                name, version
            )));
        }
        let count = reader.read_i32::<BE>()?;
        let desc = read_string(reader)?;
        log::debug!("{}: {} stamps to read, notes: {}", name, count, desc);
        let mut container = StampContainer::new(name.clone());
        container.set_desc(desc);
        for _ in 0..count {
            let size = reader.read_i32::<BE>()?;
            let dbh = reader.read_f32::<BE>()?;
            let hd = reader.read_f32::<BE>()?;
            let crown_radius = reader.read_f32::<BE>()?;
            let offset = reader.read_i32::<BE>()?;
            let mut stamp = Stamp::with_size(size.max(0) as usize, 0.)?;
            stamp.set_offset(offset.max(0) as usize);
            for value in stamp.data_mut() {
                *value = reader.read_f32::<BE>()?;
            }
            if dbh > 0. {
                container.add_writer(stamp, dbh, hd, crown_radius)?;
            } else {
                container.add_reader(stamp, crown_radius)?;
            }
        }
        if container.is_empty() {
            return Err(SylvaError::input(format!("{}: no stamps loaded", name)));
        }
        container.finalize();
        Ok(container)
    }

    /// encode the container in insertion order
    pub fn save(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_u32::<BE>(STAMP_MAGIC)?;
        writer.write_u16::<BE>(STAMP_VERSION)?;
        writer.write_i32::<BE>(self.len() as i32)?;
        write_string(writer, self.desc())?;
        for index in 0..self.len() {
            let item = self.item(index);
            let stamp = self.get(index);
            writer.write_i32::<BE>(stamp.size() as i32)?;
            writer.write_f32::<BE>(item.dbh)?;
            writer.write_f32::<BE>(item.hd)?;
            writer.write_f32::<BE>(item.crown_radius)?;
            writer.write_i32::<BE>(stamp.offset() as i32)?;
            for &value in stamp.data() {
                writer.write_f32::<BE>(value)?;
            }
        }
        Ok(())
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.save(&mut writer)
    }
}

fn read_string(reader: &mut impl Read) -> Result<String> {
    let length = reader.read_u16::<BE>()? as usize;
    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer)?;
    String::from_utf8(buffer).map_err(|_| SylvaError::input("malformed description string"))
}

fn write_string(writer: &mut impl Write, text: &str) -> Result<()> {
    writer.write_u16::<BE>(text.len() as u16)?;
    writer.write_all(text.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> StampContainer {
        let mut readers = StampContainer::new("readers");
        let mut reader = Stamp::new_reader(5).unwrap();
        for y in 0..5 {
            for x in 0..5 {
                reader.set_value(x, y, 0.04 * (1 + x + y) as f32);
            }
        }
        readers.add_reader(reader, 2.5).unwrap();
        let mut container = StampContainer::new("writers");
        container.set_desc("unit test library");
        let mut writer = Stamp::new_writer(5).unwrap();
        for y in 0..5 {
            for x in 0..5 {
                writer.set_value(x, y, 0.8);
            }
        }
        container.add_writer(writer, 12., 80., 2.5).unwrap();
        let second = Stamp::new_writer(3).unwrap();
        container.add_writer(second, 6., 55., 1.1).unwrap();
        container.finalize();
        container.attach_readers(&readers);
        container
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let container = library();
        let mut first = Vec::new();
        container.save(&mut first).unwrap();
        let loaded = StampContainer::load(&mut first.as_slice(), "loaded").unwrap();
        assert_eq!(loaded.len(), container.len());
        assert_eq!(loaded.desc(), container.desc());
        let mut second = Vec::new();
        loaded.save(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn reader_stamps_survive_the_round_trip() {
        let mut readers = StampContainer::new("readers");
        readers
            .add_reader(Stamp::new_reader(5).unwrap(), 2.5)
            .unwrap();
        let mut bytes = Vec::new();
        readers.save(&mut bytes).unwrap();
        let loaded = StampContainer::load(&mut bytes.as_slice(), "loaded").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.item(0).dbh, 0.);
        assert_eq!(loaded.item(0).crown_radius, 2.5);
        assert_eq!(loaded.reader(2.5), Some(0));
    }

    #[test]
    fn invalid_magic_is_fatal() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xDEADBEEFu32.to_be_bytes());
        bytes.extend_from_slice(&100u16.to_be_bytes());
        assert!(StampContainer::load(&mut bytes.as_slice(), "bad").is_err());
    }

    #[test]
    fn zero_count_is_fatal() {
        let empty = StampContainer::new("empty");
        let mut bytes = Vec::new();
        empty.save(&mut bytes).unwrap();
        assert!(StampContainer::load(&mut bytes.as_slice(), "empty").is_err());
    }

    #[test]
    fn truncated_file_is_fatal() {
        let container = library();
        let mut bytes = Vec::new();
        container.save(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 7);
        assert!(StampContainer::load(&mut bytes.as_slice(), "cut").is_err());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("writers.bin");
        let second = dir.path().join("copy.bin");
        library().save_file(&first).unwrap();
        let loaded = StampContainer::load_file(&first).unwrap();
        loaded.save_file(&second).unwrap();
        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );
    }

    #[test]
    fn missing_file_is_input_error() {
        let err = StampContainer::load_file("/nonexistent/stamps.bin").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
