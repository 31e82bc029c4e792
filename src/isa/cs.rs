//! The Capstone decoding backend.

use capstone::prelude::*;
use capstone::Capstone;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::isa::Arch;
use crate::isa::Decoder;
use crate::isa::Insn;
use crate::isa::Isa;

/// An [`Isa`] backed by the Capstone engine, in Intel syntax.
///
/// [`Isa`]: trait.Isa.html
#[derive(Copy, Clone, Default, Debug)]
pub struct CapstoneIsa;

impl Isa for CapstoneIsa {
  type Decoder = CapstoneDecoder;

  fn supports(&self, arch: &Arch) -> bool {
    matches!(arch, Arch::X86 | Arch::X64)
  }

  fn open(&self, arch: &Arch) -> Result<CapstoneDecoder> {
    let mode = match arch {
      Arch::X86 => arch::x86::ArchMode::Mode32,
      Arch::X64 => arch::x86::ArchMode::Mode64,
      Arch::Other(_) => {
        return Err(Error::new(ErrorKind::UnsupportedArch(arch.clone())))
      }
    };

    let cs = Capstone::new()
      .x86()
      .mode(mode)
      .syntax(arch::x86::ArchSyntax::Intel)
      .detail(false)
      .build()
      .map_err(|e| Error::new(ErrorKind::DecoderInit(e.to_string())))?;
    Ok(CapstoneDecoder { cs })
  }
}

/// A live Capstone handle.
pub struct CapstoneDecoder {
  cs: Capstone,
}

impl Decoder for CapstoneDecoder {
  fn decode(&mut self, code: &[u8], address: u64) -> Result<Option<Insn>> {
    if code.is_empty() {
      return Ok(None);
    }

    let insns = self.cs.disasm_count(code, address, 1).map_err(|e| {
      Error::new(ErrorKind::Decode {
        offset: address,
        reason: e.to_string(),
      })
    })?;

    let insn = insns.as_ref().iter().next().ok_or_else(|| {
      Error::new(ErrorKind::Decode {
        offset: address,
        reason: format!("invalid instruction byte 0x{:02x}", code[0]),
      })
    })?;

    Ok(Some(Insn {
      address: insn.address(),
      bytes: insn.bytes().to_vec(),
      mnemonic: insn.mnemonic().unwrap_or("").to_string(),
      operands: insn.op_str().unwrap_or("").to_string(),
    }))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn unsupported() {
    let arm = Arch::Other("arm".into());
    assert!(!CapstoneIsa.supports(&arm));
    let err = CapstoneIsa.open(&arm).err().unwrap();
    assert_eq!(err.kind(), &ErrorKind::UnsupportedArch(arm));
  }

  #[test]
  fn decodes_one() {
    let mut cs = CapstoneIsa.open(&Arch::X64).unwrap();
    // call 0x1030, from 0x1050.
    let code = [0xe8, 0xdb, 0xff, 0xff, 0xff, 0x90];
    let insn = cs.decode(&code, 0x1050).unwrap().unwrap();
    assert_eq!(insn.address, 0x1050);
    assert_eq!(insn.len(), 5);
    assert_eq!(insn.mnemonic, "call");
    assert_eq!(insn.operands, "0x1030");
    assert_eq!(insn.branch_target(&Arch::X64), Some(0x1030));

    assert_eq!(cs.decode(&[], 0x1050).unwrap(), None);
  }

  #[test]
  fn zeros_are_filler() {
    let mut cs = CapstoneIsa.open(&Arch::X64).unwrap();
    let insn = cs.decode(&[0, 0, 0, 0], 0).unwrap().unwrap();
    assert!(insn.is_filler(), "{:?}", insn);

    let mut cs = CapstoneIsa.open(&Arch::X86).unwrap();
    let insn = cs.decode(&[0, 0, 0, 0], 0).unwrap().unwrap();
    assert!(insn.is_filler(), "{:?}", insn);
  }
}
