//! Integer handling for operand text and command-line arguments.
//!
//! The decoder hands us operands as text, so any numeric target an instruction
//! refers to has to be recovered by parsing it back out. This module does that
//! carefully: anything that does not look exactly like a single literal, or
//! that has more digits than the architecture's address width allows, is
//! rejected rather than guessed at.

use std::num::ParseIntError;

use lazy_static::lazy_static;
use regex::Regex;

use crate::isa::Arch;

lazy_static! {
  /// A lone numeric operand: `0x1f40` or `8000`.
  static ref LITERAL: Regex =
    Regex::new(r"^(?:0[xX]([0-9a-fA-F]+)|([0-9]+))$").unwrap();
}

/// Extracts a literal numeric operand from `operands`, if it is one.
///
/// Hex literals must carry a `0x` prefix and may have at most as many digits
/// as `arch` has nibbles in an address. Decimal literals must fit in an
/// address of `arch`'s width.
///
/// Returns `None` for anything else, including memory operands, registers,
/// lists of operands, and truncated text.
pub fn parse_literal(operands: &str, arch: &Arch) -> Option<u64> {
  let caps = LITERAL.captures(operands.trim())?;
  let value = if let Some(hex) = caps.get(1) {
    if hex.as_str().len() > arch.address_nibbles() {
      return None;
    }
    u64::from_str_radix(hex.as_str(), 16).ok()?
  } else {
    caps.get(2)?.as_str().parse::<u64>().ok()?
  };

  if value > arch.address_mask() {
    return None;
  }
  Some(value)
}

/// Parses an integer from the command line.
///
/// Accepts decimal, `0x`-prefixed hex, and `$`-prefixed hex.
pub fn parse_u64(s: &str) -> Result<u64, ParseIntError> {
  let s = s.trim();
  if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
    u64::from_str_radix(hex, 16)
  } else if let Some(hex) = s.strip_prefix('$') {
    u64::from_str_radix(hex, 16)
  } else {
    s.parse()
  }
}

/// Formats a synthesized label for `address`, e.g. `sub_0x00401000`.
pub fn label(prefix: &str, address: u64) -> String {
  format!("{}{:08x}", prefix, address)
}

#[cfg(test)]
mod test {
  use super::*;

  macro_rules! assert_literal {
    ($arch:expr, $text:literal => None) => {
      assert_eq!(parse_literal($text, &$arch), None, "{:?}", $text);
    };
    ($arch:expr, $text:literal => $expected:literal) => {
      assert_eq!(parse_literal($text, &$arch), Some($expected), "{:?}", $text);
    };
  }

  #[test]
  fn literals() {
    assert_literal!(Arch::X64, "0x1030" => 0x1030);
    assert_literal!(Arch::X64, " 0x401000 " => 0x401000);
    assert_literal!(Arch::X64, "0xFFFFFFFFFFFFFFF0" => 0xffff_ffff_ffff_fff0);
    assert_literal!(Arch::X64, "0" => 0);
    assert_literal!(Arch::X64, "7" => 7);
    assert_literal!(Arch::X86, "0xffffffff" => 0xffff_ffff);
  }

  #[test]
  fn rejects_non_literals() {
    assert_literal!(Arch::X64, "" => None);
    assert_literal!(Arch::X64, "0x" => None);
    assert_literal!(Arch::X64, "rax" => None);
    assert_literal!(Arch::X64, "qword ptr [rip + 0x20]" => None);
    assert_literal!(Arch::X64, "0x10, 0x20" => None);
    assert_literal!(Arch::X64, "0x12g4" => None);
    assert_literal!(Arch::X64, "0x10000000000000000" => None);
    assert_literal!(Arch::X86, "0x100000000" => None);
    assert_literal!(Arch::X86, "4294967296" => None);
    assert_literal!(Arch::X64, "99999999999999999999999" => None);
  }

  #[test]
  fn cli_integers() {
    assert_eq!(parse_u64("4096"), Ok(4096));
    assert_eq!(parse_u64("0x1000"), Ok(4096));
    assert_eq!(parse_u64("$1000"), Ok(4096));
    assert!(parse_u64("0xzz").is_err());
  }

  #[test]
  fn labels() {
    assert_eq!(label("sub_0x", 0x1030), "sub_0x00001030");
    assert_eq!(label("offset_0x", 0x401000), "offset_0x00401000");
  }
}
