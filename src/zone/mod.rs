//! Disassembly zones and their checkpoint index.
//!
//! A [`Zone`] is a byte range of a file that is believed to contain code.
//! Because x86 instructions have variable length, the only way to know where
//! the `n`th instruction of a zone starts is to decode every instruction
//! before it. An [`Index`] makes this cheap by sampling the decode stream
//! every few hundred bytes: each [`Checkpoint`] records an instruction
//! boundary and its line number, so a seek only has to decode forward from
//! the nearest checkpoint.
//!
//! Where decoding starts matters just as much. A zone's entry point is not
//! necessarily the earliest code in it; a backwards call can land before it.
//! [`Index::build()`] first walks the zone looking for such branches, and
//! moves the start of decoding back until no branch reaches further.
//!
//! [`Zone`]: struct.Zone.html
//! [`Index`]: struct.Index.html
//! [`Checkpoint`]: struct.Checkpoint.html
//! [`Index::build()`]: struct.Index.html#method.build

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::error::Action;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::isa::Arch;
use crate::isa::Decoder;
use crate::isa::Stream;
use crate::source::Source;

pub mod level;
pub mod scan;
pub mod seek;

/// A byte range of a file, to be viewed as x86 code.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Zone {
  /// The file offset of the first byte in the zone.
  pub start: u64,
  /// The length of the zone, in bytes.
  pub size: u64,
  /// The file offset of the zone's nominal first instruction.
  pub entry: u64,
  /// The architecture to decode the zone as.
  pub arch: Arch,
}

impl Zone {
  /// Returns the file offset just past the end of this zone.
  pub fn end(&self) -> u64 {
    self.start.saturating_add(self.size)
  }

  /// Returns whether `offset` lies within this zone.
  pub fn contains(&self, offset: u64) -> bool {
    self.start <= offset && offset < self.end()
  }

  /// Checks that this zone describes a sensible range.
  pub fn validate(&self) -> Result<()> {
    if self.size == 0 {
      return Err(Error::new(ErrorKind::BadZone("zone is empty".into())));
    }
    if self.start.checked_add(self.size).is_none() {
      return Err(Error::new(ErrorKind::BadZone(
        "zone extends past the end of the address space".into(),
      )));
    }
    if !self.contains(self.entry) {
      return Err(Error::new(ErrorKind::BadZone(format!(
        "entry point 0x{:x} is outside of 0x{:x}..0x{:x}",
        self.entry,
        self.start,
        self.end()
      ))));
    }
    Ok(())
  }
}

/// A known instruction boundary, and the line of the instruction that starts
/// there.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Checkpoint {
  /// The file offset of the instruction.
  pub offset: u64,
  /// The instruction's line, counting from the zone's true start.
  pub line: u32,
}

/// The checkpoint index of a zone.
///
/// The first checkpoint is always `(true_start, 0)`. Checkpoints increase
/// strictly in both offset and line, and every checkpoint names a line less
/// than `line_count` (except the first, when the zone decodes to nothing).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Index {
  checkpoints: Vec<Checkpoint>,
  line_count: u32,
  code_end: u64,
}

impl Index {
  /// Builds the index for `zone`, whose bytes come from `source`.
  ///
  /// Indexing stops early, without failing, at the first byte that does not
  /// decode, or once `config.filler_run_limit` filler instructions have been
  /// seen back to back; the filler itself is not counted.
  pub fn build(
    zone: &Zone,
    source: &(impl Source + ?Sized),
    decoder: &mut impl Decoder,
    config: &Config,
  ) -> Result<Index> {
    Self::build_inner(zone, source, decoder, config)
      .map_err(|e| e.during(Action::Indexing))
  }

  fn build_inner(
    zone: &Zone,
    source: &(impl Source + ?Sized),
    decoder: &mut impl Decoder,
    config: &Config,
  ) -> Result<Index> {
    zone.validate()?;
    let code = source.read(zone.start, zone.size as usize)?;
    let true_start = find_true_start(zone, &code, decoder);

    let span = config.checkpoint_span.max(1);
    let limit = config.filler_run_limit.max(1);

    let mut checkpoints = vec![Checkpoint {
      offset: true_start,
      line: 0,
    }];
    let mut line_count = 0u32;
    let mut filler_run = 0u32;
    let mut filler_start = true_start;
    let mut code_end = true_start;

    let window = &code[(true_start - zone.start) as usize..];
    for insn in Stream::new(decoder, window, true_start) {
      let insn = match insn {
        Ok(insn) => insn,
        Err(e) => {
          warn!("indexing stopped early: {}", e);
          break;
        }
      };

      if insn.is_filler() {
        if filler_run == 0 {
          filler_start = insn.address;
        }
        filler_run += 1;
        if filler_run >= limit {
          warn!(
            "indexing stopped at 0x{:x}: {} filler instructions in a row",
            filler_start, filler_run
          );
          line_count -= filler_run - 1;
          code_end = filler_start;
          break;
        }
      } else {
        filler_run = 0;
      }

      line_count += 1;
      code_end = insn.end();
      let last = checkpoints[checkpoints.len() - 1].offset;
      if code_end - last >= span && code_end < zone.end() {
        checkpoints.push(Checkpoint {
          offset: code_end,
          line: line_count,
        });
      }
    }

    // Drop checkpoints that point past the last counted instruction, either
    // into a filler run or at bytes that failed to decode.
    let first = checkpoints[0];
    checkpoints.retain(|cp| cp.line < line_count);
    if checkpoints.is_empty() {
      checkpoints.push(first);
    }

    debug!("built {} checkpoints", checkpoints.len());
    info!(
      "indexed zone 0x{:x}..0x{:x}: true start 0x{:x}, {} lines",
      zone.start,
      zone.end(),
      true_start,
      line_count
    );
    Ok(Index {
      checkpoints,
      line_count,
      code_end,
    })
  }

  /// Returns the checkpoints in this index.
  pub fn checkpoints(&self) -> &[Checkpoint] {
    &self.checkpoints
  }

  /// Returns the offset that decoding starts at; this may be before the
  /// zone's entry point, but never before the zone itself.
  pub fn true_start(&self) -> u64 {
    self.checkpoints[0].offset
  }

  /// Returns the number of instruction lines in the zone.
  pub fn line_count(&self) -> u32 {
    self.line_count
  }

  /// Returns the offset just past the last counted instruction.
  pub fn code_end(&self) -> u64 {
    self.code_end
  }

  /// Finds the last checkpoint at or before `line`.
  pub fn closest_by_line(&self, line: u32) -> Checkpoint {
    let i = self.checkpoints.partition_point(|cp| cp.line <= line);
    self.checkpoints[i.saturating_sub(1)]
  }

  /// Finds the last checkpoint at or before `offset`, if `offset` is not
  /// before the true start.
  pub fn closest_by_offset(&self, offset: u64) -> Option<Checkpoint> {
    let i = self.checkpoints.partition_point(|cp| cp.offset <= offset);
    if i == 0 {
      return None;
    }
    Some(self.checkpoints[i - 1])
  }

  /// Returns whether `offset` falls within the indexed code.
  pub fn covers(&self, offset: u64) -> bool {
    self.true_start() <= offset && offset < self.code_end
  }
}

/// Finds the earliest offset decoding must start at so that every call or
/// jump target in the zone lands on an instruction boundary.
///
/// The first pass decodes from the entry point to the end of the zone; each
/// later pass decodes only the gap between the newly discovered minimum and
/// the previous one, until a pass turns up nothing earlier.
fn find_true_start(zone: &Zone, code: &[u8], decoder: &mut impl Decoder) -> u64 {
  let mut min = zone.entry;
  let mut from = zone.entry;
  let mut until = zone.end();

  loop {
    let mut found = min;
    let window = &code[(from - zone.start) as usize..];
    for insn in Stream::new(&mut *decoder, window, from) {
      let insn = match insn {
        Ok(insn) => insn,
        Err(e) => {
          debug!("reachability pass stopped: {}", e);
          break;
        }
      };
      if insn.address >= until {
        break;
      }

      if let Some(target) = insn.branch_target(&zone.arch) {
        if target >= zone.start && target < found {
          found = target;
        }
      }
    }

    if found >= min {
      return min;
    }
    debug!(
      "branch reaches back to 0x{:x}; rescanning {} bytes",
      found,
      min - found
    );
    until = min;
    from = found;
    min = found;
  }
}
