//! Symbol collaborators: memory-mapping tables, hashed function names, and
//! translation between file offsets and virtual addresses.
//!
//! None of these are required to view a zone; when they are absent, targets
//! simply get synthesized labels. The CLI loads them from a json5 [`Symbols`]
//! file.
//!
//! [`Symbols`]: struct.Symbols.html

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;

/// The kind of memory a [`Mapping`] describes.
///
/// [`Mapping`]: struct.Mapping.html
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
  /// Executable code; usually a function entry.
  Function,
  /// Anything that is not code.
  Data,
}

/// A named region of memory.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
pub struct Mapping {
  /// The region's display name.
  pub name: String,
  /// What the region contains.
  pub kind: MappingKind,
}

/// A table of known memory regions, keyed by address.
pub trait MemoryMap {
  /// Finds the mapping starting at `address`, if there is one.
  fn lookup(&self, address: u64) -> Option<&Mapping>;
}

impl MemoryMap for BTreeMap<u64, Mapping> {
  fn lookup(&self, address: u64) -> Option<&Mapping> {
    self.get(&address)
  }
}

impl MemoryMap for HashMap<u64, Mapping> {
  fn lookup(&self, address: u64) -> Option<&Mapping> {
    self.get(&address)
  }
}

/// A precomputed table of function names, keyed by a hash of the name.
///
/// Used to recognize well-known imports by the name a mapping carries.
pub trait NameHash {
  /// Hashes `bytes` into a lookup token.
  fn hash(&self, bytes: &[u8]) -> u32;

  /// Returns the function name recorded for `token`, if any.
  fn function_name_for(&self, token: u32) -> Option<&str>;
}

/// Converts between file offsets and the addresses a binary uses at runtime.
pub trait Translator {
  /// Maps a virtual address to the file offset backing it.
  fn to_file_offset(&self, address: u64) -> Option<u64>;

  /// Maps a file offset to the virtual address it is loaded at.
  fn from_file_offset(&self, offset: u64) -> Option<u64>;
}

/// A `Translator` for raw images, where addresses are file offsets.
#[derive(Copy, Clone, Default, Debug)]
pub struct Identity;

impl Translator for Identity {
  fn to_file_offset(&self, address: u64) -> Option<u64> {
    Some(address)
  }

  fn from_file_offset(&self, offset: u64) -> Option<u64> {
    Some(offset)
  }
}

/// A contiguous range of a file loaded at some virtual address.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct Region {
  /// The first file offset in this region.
  pub file_offset: u64,
  /// The virtual address `file_offset` is loaded at.
  pub address: u64,
  /// The length of this region, in bytes.
  pub len: u64,
}

/// A `Translator` over a list of loaded [`Region`]s, much like a section
/// table. Regions may not overlap.
///
/// [`Region`]: struct.Region.html
#[derive(Clone, Default, Debug)]
pub struct Regions(pub Vec<Region>);

impl Translator for Regions {
  fn to_file_offset(&self, address: u64) -> Option<u64> {
    self.0.iter().find_map(|r| {
      let delta = address.checked_sub(r.address)?;
      if delta < r.len {
        Some(r.file_offset + delta)
      } else {
        None
      }
    })
  }

  fn from_file_offset(&self, offset: u64) -> Option<u64> {
    self.0.iter().find_map(|r| {
      let delta = offset.checked_sub(r.file_offset)?;
      if delta < r.len {
        Some(r.address + delta)
      } else {
        None
      }
    })
  }
}

/// Symbol information for a binary, as stored in a json5 file:
///
/// ```text
/// {
///   mappings: [
///     [0x401000, { name: "main", kind: "function" }],
///   ],
///   regions: [
///     { file_offset: 0x400, address: 0x401000, len: 0x1000 },
///   ],
/// }
/// ```
#[derive(Clone, Default, Debug, Deserialize, Serialize)]
pub struct Symbols {
  /// Known memory regions, keyed by address.
  #[serde(default)]
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  #[serde(with = "kv_pairs")]
  pub mappings: BTreeMap<u64, Mapping>,
  /// Loaded file regions. When empty, addresses are file offsets.
  #[serde(default)]
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub regions: Vec<Region>,
}

impl Symbols {
  /// Parses a symbol file from json5 text.
  pub fn from_json5(text: &str) -> Result<Self> {
    json5::from_str(text).map_err(|e| Error::new(ErrorKind::Config(e.to_string())))
  }

  /// Reads and parses the symbol file at `path`.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
      Error::new(ErrorKind::Config(format!("{}: {}", path.display(), e)))
    })?;
    Self::from_json5(&text)
  }

  /// Builds the translator these symbols describe.
  pub fn translator(&self) -> Box<dyn Translator> {
    if self.regions.is_empty() {
      Box::new(Identity)
    } else {
      Box::new(Regions(self.regions.clone()))
    }
  }
}

/// Serde serializer/deserializer for (de)serializing a map as a sequence of
/// key-value pairs.
mod kv_pairs {
  use std::fmt;
  use std::marker::PhantomData;

  use serde::de;
  use serde::Deserialize;
  use serde::Deserializer;
  use serde::Serialize;
  use serde::Serializer;

  pub fn serialize<K, V, Map, S>(map: Map, ser: S) -> Result<S::Ok, S::Error>
  where
    K: Serialize,
    V: Serialize,
    Map: IntoIterator<Item = (K, V)>,
    S: Serializer,
  {
    ser.collect_seq(map)
  }

  pub fn deserialize<'de, K, V, Map, D>(de: D) -> Result<Map, D::Error>
  where
    K: Deserialize<'de>,
    V: Deserialize<'de>,
    Map: Default + Extend<(K, V)>,
    D: Deserializer<'de>,
  {
    struct PairsVisitor<K, V, Map>(PhantomData<(K, V, Map)>);
    impl<'de, K, V, Map> de::Visitor<'de> for PairsVisitor<K, V, Map>
    where
      K: Deserialize<'de>,
      V: Deserialize<'de>,
      Map: Default + Extend<(K, V)>,
    {
      type Value = Map;

      fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a list of [address, mapping] pairs")
      }

      fn visit_seq<A>(self, mut seq: A) -> Result<Map, A::Error>
      where
        A: de::SeqAccess<'de>,
      {
        let mut map = Map::default();
        while let Some(pair) = seq.next_element::<(K, V)>()? {
          map.extend(Some(pair));
        }
        Ok(map)
      }
    }

    de.deserialize_seq(PairsVisitor(PhantomData))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn regions() {
    let t = Regions(vec![
      Region {
        file_offset: 0x400,
        address: 0x401000,
        len: 0x1000,
      },
      Region {
        file_offset: 0x1400,
        address: 0x403000,
        len: 0x200,
      },
    ]);
    assert_eq!(t.to_file_offset(0x401010), Some(0x410));
    assert_eq!(t.to_file_offset(0x403010), Some(0x1410));
    assert_eq!(t.to_file_offset(0x402000), None);
    assert_eq!(t.from_file_offset(0x410), Some(0x401010));
    assert_eq!(t.from_file_offset(0x10), None);
    assert_eq!(Identity.to_file_offset(7), Some(7));
  }

  #[test]
  fn symbol_file() {
    let syms = Symbols::from_json5(
      r#"{
        // Comments are fine.
        mappings: [
          [4096, { name: "main", kind: "function" }],
          [8192, { name: "g_table", kind: "data" }],
        ],
        regions: [{ file_offset: 0, address: 4096, len: 256 }],
      }"#,
    )
    .unwrap();

    assert_eq!(
      syms.mappings.lookup(4096),
      Some(&Mapping {
        name: "main".into(),
        kind: MappingKind::Function,
      })
    );
    assert_eq!(syms.mappings.lookup(8192).unwrap().kind, MappingKind::Data);
    assert_eq!(syms.mappings.lookup(1), None);
    assert_eq!(syms.translator().to_file_offset(4100), Some(4));

    let empty = Symbols::from_json5("{}").unwrap();
    assert!(empty.mappings.is_empty());
    assert_eq!(empty.translator().to_file_offset(4100), Some(4100));

    assert!(matches!(
      Symbols::from_json5("{ mappings: 3 }").unwrap_err().kind(),
      ErrorKind::Config(_)
    ));
  }
}
