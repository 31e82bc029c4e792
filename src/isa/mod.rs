//! The x86 instruction set, as seen through a decoding backend.
//!
//! This crate does not decode instructions itself. Instead, an [`Isa`]
//! provides [`Decoder`]s for a given [`Arch`], and each decoder turns a window
//! of bytes into one [`Insn`] at a time. [`Stream`] drives a decoder over a
//! whole window, the way every pass in this crate consumes code.
//!
//! [`Isa`]: trait.Isa.html
//! [`Decoder`]: trait.Decoder.html
//! [`Arch`]: enum.Arch.html
//! [`Insn`]: struct.Insn.html
//! [`Stream`]: struct.Stream.html

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::int;

mod cs;
mod flow;

pub use cs::CapstoneDecoder;
pub use cs::CapstoneIsa;
pub use flow::Flow;

/// A target architecture for a disassembly zone.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Arch {
  /// 32-bit x86.
  X86,
  /// 64-bit x86.
  X64,
  /// Anything else; no backend in this crate can decode it.
  Other(String),
}

impl Arch {
  /// The number of hex digits in a full-width address.
  pub fn address_nibbles(&self) -> usize {
    match self {
      Self::X86 => 8,
      Self::X64 | Self::Other(_) => 16,
    }
  }

  /// A mask covering every bit of a full-width address.
  pub fn address_mask(&self) -> u64 {
    match self {
      Self::X86 => u32::MAX as u64,
      Self::X64 | Self::Other(_) => u64::MAX,
    }
  }
}

impl FromStr for Arch {
  type Err = std::convert::Infallible;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    Ok(Arch::from(s.to_string()))
  }
}

impl From<String> for Arch {
  fn from(s: String) -> Self {
    match s.to_ascii_lowercase().as_str() {
      "x86" | "i386" | "x86-32" | "32" => Arch::X86,
      "x64" | "x86_64" | "x86-64" | "amd64" | "64" => Arch::X64,
      _ => Arch::Other(s),
    }
  }
}

impl From<Arch> for String {
  fn from(arch: Arch) -> Self {
    arch.to_string()
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Self::X86 => f.write_str("x86"),
      Self::X64 => f.write_str("x64"),
      Self::Other(name) => f.write_str(name),
    }
  }
}

/// A single decoded instruction.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Insn {
  /// The address the instruction was decoded at. In this crate, that is
  /// always its file offset.
  pub address: u64,
  /// The instruction's encoding; at most fifteen bytes on x86.
  pub bytes: Vec<u8>,
  /// The mnemonic, in lowercase: `call`, `jne`, `push`.
  pub mnemonic: String,
  /// The operand text, as printed by the decoder.
  pub operands: String,
}

impl Insn {
  /// Returns the encoded length of this instruction.
  pub fn len(&self) -> u64 {
    self.bytes.len() as u64
  }

  /// Returns the address just past this instruction.
  pub fn end(&self) -> u64 {
    self.address + self.len()
  }

  /// Returns whether `offset` falls inside this instruction's encoding.
  pub fn contains(&self, offset: u64) -> bool {
    self.address <= offset && offset < self.end()
  }

  /// Classifies this instruction by its mnemonic.
  pub fn flow(&self) -> Flow {
    Flow::of(&self.mnemonic)
  }

  /// Returns the literal operand of this instruction, if it has exactly one.
  pub fn literal(&self, arch: &Arch) -> Option<u64> {
    int::parse_literal(&self.operands, arch)
  }

  /// Returns the target of this instruction if it is a call or jump to a
  /// literal address.
  pub fn branch_target(&self, arch: &Arch) -> Option<u64> {
    if self.flow().is_branch() {
      self.literal(arch)
    } else {
      None
    }
  }

  /// Returns whether this instruction looks like zero-filled padding that the
  /// decoder has misread as code: `add byte ptr [rax], al` and friends.
  pub fn is_filler(&self) -> bool {
    self.mnemonic == "add"
      && self.operands.starts_with("byte ptr [")
      && self.operands.ends_with("], al")
  }
}

/// A decoding backend.
pub trait Isa {
  /// The decoder handle type this backend produces.
  type Decoder: Decoder;

  /// Returns whether this backend can decode `arch` at all.
  fn supports(&self, arch: &Arch) -> bool;

  /// Opens a decoder for `arch`.
  fn open(&self, arch: &Arch) -> Result<Self::Decoder>;
}

/// A decoder handle, which turns bytes into instructions one at a time.
pub trait Decoder {
  /// Decodes one instruction from the front of `code`, which starts at
  /// `address`.
  ///
  /// Returns `Ok(None)` if `code` is empty, and an error if the bytes do not
  /// form a valid instruction.
  fn decode(&mut self, code: &[u8], address: u64) -> Result<Option<Insn>>;
}

impl<D: Decoder + ?Sized> Decoder for &mut D {
  fn decode(&mut self, code: &[u8], address: u64) -> Result<Option<Insn>> {
    (**self).decode(code, address)
  }
}

/// An iterator decoding instructions back-to-back out of a window of bytes.
///
/// A `Stream` yields at most one error, after which it is exhausted: x86 does
/// not resynchronize, so nothing after an undecodable byte can be trusted.
pub struct Stream<'a, D: ?Sized> {
  decoder: &'a mut D,
  code: &'a [u8],
  base: u64,
  pos: usize,
}

impl<'a, D: Decoder + ?Sized> Stream<'a, D> {
  /// Creates a new `Stream` over `code`, whose first byte lives at `base`.
  pub fn new(decoder: &'a mut D, code: &'a [u8], base: u64) -> Self {
    Stream {
      decoder,
      code,
      base,
      pos: 0,
    }
  }

  /// Returns the address of the next instruction to be decoded.
  pub fn next_address(&self) -> u64 {
    self.base + self.pos as u64
  }
}

impl<D: Decoder + ?Sized> Iterator for Stream<'_, D> {
  type Item = Result<Insn>;

  fn next(&mut self) -> Option<Self::Item> {
    let rest = self.code.get(self.pos..).unwrap_or(&[]);
    if rest.is_empty() {
      return None;
    }

    let address = self.next_address();
    match self.decoder.decode(rest, address) {
      Ok(Some(insn)) if !insn.bytes.is_empty() && insn.bytes.len() <= rest.len() => {
        self.pos += insn.bytes.len();
        Some(Ok(insn))
      }
      Ok(Some(_)) => {
        self.pos = self.code.len();
        Some(Err(Error::new(ErrorKind::Decode {
          offset: address,
          reason: "decoder returned a malformed instruction".into(),
        })))
      }
      Ok(None) => {
        self.pos = self.code.len();
        None
      }
      Err(e) => {
        self.pos = self.code.len();
        Some(Err(e))
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn insn(mnemonic: &str, operands: &str) -> Insn {
    Insn {
      address: 0x1000,
      bytes: vec![0x90; 2],
      mnemonic: mnemonic.into(),
      operands: operands.into(),
    }
  }

  #[test]
  fn arch_names() {
    assert_eq!("x86_64".parse::<Arch>(), Ok(Arch::X64));
    assert_eq!("X86".parse::<Arch>(), Ok(Arch::X86));
    assert_eq!("arm64".parse::<Arch>(), Ok(Arch::Other("arm64".into())));
    assert_eq!(Arch::X64.to_string(), "x64");
  }

  #[test]
  fn filler() {
    assert!(insn("add", "byte ptr [rax], al").is_filler());
    assert!(insn("add", "byte ptr [eax], al").is_filler());
    assert!(!insn("add", "byte ptr [rax], bl").is_filler());
    assert!(!insn("add", "eax, 1").is_filler());
    assert!(!insn("nop", "").is_filler());
  }

  #[test]
  fn branch_targets() {
    assert_eq!(insn("call", "0x1030").branch_target(&Arch::X64), Some(0x1030));
    assert_eq!(insn("jne", "0x20").branch_target(&Arch::X64), Some(0x20));
    assert_eq!(insn("push", "0x20").branch_target(&Arch::X64), None);
    assert_eq!(insn("call", "rax").branch_target(&Arch::X64), None);
    assert!(insn("jmp", "0x20").contains(0x1001));
    assert!(!insn("jmp", "0x20").contains(0x1002));
  }

  #[test]
  fn stream_stops_after_error() {
    let mut cs = CapstoneIsa.open(&Arch::X64).unwrap();
    // nop; nop; (invalid in 64-bit mode) push es; nop
    let code = [0x90, 0x90, 0x06, 0x90];
    let mut stream = Stream::new(&mut cs, &code, 0x100);
    assert_eq!(stream.next_address(), 0x100);
    assert_eq!(stream.next().unwrap().unwrap().address, 0x100);
    assert_eq!(stream.next().unwrap().unwrap().address, 0x101);
    assert_eq!(stream.next_address(), 0x102);
    let err = stream.next().unwrap().unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Decode { offset: 0x102, .. }));
    assert!(stream.next().is_none());
  }
}
