//! Flat text export of a zone.

use std::io;

use crate::error::Action;
use crate::error::Result;
use crate::isa::Decoder;
use crate::isa::Stream;
use crate::source::Source;
use crate::zone::Index;
use crate::zone::Zone;

/// The number of opcode bytes the mnemonic column is aligned past.
const BYTES_COLUMN: usize = 8;

/// Dumps every indexed instruction of `zone` in the style of `objdump` to
/// `w`, ignoring annotations.
///
/// If decoding fails partway through, a comment saying so is written and the
/// dump ends there.
pub fn export(
  zone: &Zone,
  index: &Index,
  source: &(impl Source + ?Sized),
  decoder: &mut impl Decoder,
  w: impl io::Write,
) -> Result<()> {
  export_inner(zone, index, source, decoder, w).map_err(|e| e.during(Action::Exporting))
}

fn export_inner(
  zone: &Zone,
  index: &Index,
  source: &(impl Source + ?Sized),
  decoder: &mut impl Decoder,
  mut w: impl io::Write,
) -> Result<()> {
  let start = index.true_start();
  let end = index.code_end();
  writeln!(
    w,
    "; zone 0x{:x}..0x{:x} ({}), entry 0x{:x}, {} instructions",
    zone.start,
    zone.end(),
    zone.arch,
    zone.entry,
    index.line_count()
  )?;

  let code = source.read(start, (end - start) as usize)?;
  for insn in Stream::new(decoder, &code, start).take(index.line_count() as usize) {
    let insn = match insn {
      Ok(insn) => insn,
      Err(e) => {
        writeln!(w, "; {}", e)?;
        return Ok(());
      }
    };

    write!(w, "{:08x}:", insn.address)?;
    for byte in &insn.bytes {
      write!(w, " {:02x}", byte)?;
    }
    let padding = BYTES_COLUMN.saturating_sub(insn.bytes.len()) * 3;
    write!(w, "{:width$}  ", "", width = padding)?;
    let text = format!("{:<6} {}", insn.mnemonic, insn.operands);
    writeln!(w, "{}", text.trim_end())?;
  }

  if end < zone.end() {
    writeln!(w, "; 0x{:x}..0x{:x} is not code", end, zone.end())?;
  }
  Ok(())
}
