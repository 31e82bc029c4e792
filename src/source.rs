//! Byte sources that zones are carved out of.
//!
//! A [`Source`] is a random-access view of a file's bytes, addressed by file
//! offset. Zones, checkpoints and instruction addresses in this crate are all
//! file offsets into some `Source`.
//!
//! [`Source`]: trait.Source.html

use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;

/// Random access to the bytes of a file.
pub trait Source {
  /// Returns the total length of this source, in bytes.
  fn len(&self) -> u64;

  /// Returns whether this source is empty.
  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Reads exactly `len` bytes starting at `offset`.
  ///
  /// A short read is an error.
  fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

  /// Reads up to `len` bytes starting at `offset`, stopping early at the end
  /// of the source.
  fn read_clamped(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
    let avail = self.len().saturating_sub(offset);
    let len = (len as u64).min(avail) as usize;
    if len == 0 {
      return Ok(Vec::new());
    }
    self.read(offset, len)
  }
}

fn short_read(offset: u64, len: usize, avail: u64) -> Error {
  Error::new(ErrorKind::Read {
    offset,
    len,
    reason: format!("only {} bytes available", avail),
  })
}

impl Source for [u8] {
  fn len(&self) -> u64 {
    <[u8]>::len(self) as u64
  }

  fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
    let avail = Source::len(self).saturating_sub(offset);
    if (len as u64) > avail {
      return Err(short_read(offset, len, avail));
    }
    let start = offset as usize;
    Ok(self[start..start + len].to_vec())
  }
}

impl Source for Vec<u8> {
  fn len(&self) -> u64 {
    Source::len(self.as_slice())
  }

  fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
    Source::read(self.as_slice(), offset, len)
  }
}

/// A `Source` reading from an open file on demand.
#[derive(Debug)]
pub struct FileSource {
  file: File,
  len: u64,
}

impl FileSource {
  /// Opens the file at `path`.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    Ok(FileSource { file, len })
  }
}

impl Source for FileSource {
  fn len(&self) -> u64 {
    self.len
  }

  fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
    let avail = self.len.saturating_sub(offset);
    if (len as u64) > avail {
      return Err(short_read(offset, len, avail));
    }

    let mut buf = vec![0; len];
    let mut file = &self.file;
    file
      .seek(SeekFrom::Start(offset))
      .and_then(|_| file.read_exact(&mut buf))
      .map_err(|e| {
        Error::new(ErrorKind::Read {
          offset,
          len,
          reason: e.to_string(),
        })
      })?;
    Ok(buf)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn slices() {
    let bytes: Vec<u8> = (0..16).collect();
    assert_eq!(bytes.read(4, 3).unwrap(), vec![4, 5, 6]);
    assert_eq!(bytes.read(16, 0).unwrap(), Vec::<u8>::new());
    assert!(matches!(
      bytes.read(14, 4).unwrap_err().kind(),
      ErrorKind::Read { offset: 14, len: 4, .. }
    ));
    assert_eq!(bytes.read_clamped(14, 4).unwrap(), vec![14, 15]);
    assert_eq!(bytes.read_clamped(40, 4).unwrap(), Vec::<u8>::new());
  }

  #[test]
  fn files() {
    let path = std::env::temp_dir().join("zonedis-source-test.bin");
    std::fs::write(&path, [0xaa, 0xbb, 0xcc, 0xdd]).unwrap();
    let src = FileSource::open(&path).unwrap();
    assert_eq!(src.len(), 4);
    assert_eq!(src.read(1, 2).unwrap(), vec![0xbb, 0xcc]);
    assert!(src.read(3, 2).is_err());
    std::fs::remove_file(&path).unwrap();
  }
}
