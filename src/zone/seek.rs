//! Seeking to an instruction by line or by file offset.
//!
//! A [`Seeker`] owns the zone's decoder handle along with a window of the
//! zone's bytes and a cursor into it. Seeking to an arbitrary line finds the
//! closest checkpoint and decodes forward from it; seeking to the line right
//! after the previous one just decodes one more instruction, which makes
//! scrolling cheap.
//!
//! [`Seeker`]: struct.Seeker.html

use std::rc::Rc;

use crate::error::Action;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::isa::Decoder;
use crate::isa::Insn;
use crate::source::Source;
use crate::zone::Checkpoint;
use crate::zone::Index;

/// The most bytes fetched from the source at once.
const WINDOW_LEN: u64 = 64 * 1024;

/// The longest x86 instruction, in bytes.
const MAX_INSN_LEN: usize = 15;

/// The result of a seek.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Seek {
  /// The instruction that was found.
  pub insn: Insn,
  /// Its instruction line.
  pub line: u32,
  /// How many lines past the closest checkpoint it is.
  pub distance: u32,
}

#[derive(Clone)]
struct Window {
  start: u64,
  bytes: Rc<[u8]>,
}

impl Window {
  fn end(&self) -> u64 {
    self.start + self.bytes.len() as u64
  }
}

/// Saved cursor state, for seeking somewhere and then coming back.
#[derive(Clone)]
pub struct Snapshot {
  window: Option<Window>,
  cursor: u64,
  current: Option<(u32, Insn)>,
  checkpoint: Checkpoint,
  max_line: u32,
}

/// The seek engine for a single zone.
pub struct Seeker<D> {
  decoder: D,
  zone_end: u64,
  window: Option<Window>,
  cursor: u64,
  current: Option<(u32, Insn)>,
  checkpoint: Checkpoint,
  max_line: u32,
}

impl<D: Decoder> Seeker<D> {
  /// Creates a new `Seeker` for a zone ending at `zone_end`.
  pub fn new(decoder: D, zone_end: u64) -> Self {
    Seeker {
      decoder,
      zone_end,
      window: None,
      cursor: 0,
      current: None,
      checkpoint: Checkpoint { offset: 0, line: 0 },
      max_line: 0,
    }
  }

  /// Returns the decoder this `Seeker` owns.
  pub fn decoder_mut(&mut self) -> &mut D {
    &mut self.decoder
  }

  /// Seeks to the instruction on `line`.
  pub fn by_line(
    &mut self,
    index: &Index,
    source: &(impl Source + ?Sized),
    line: u32,
  ) -> Result<Seek> {
    self.by_line_inner(index, source, line).map_err(|e| {
      self.reset();
      e.during(Action::Seeking)
    })
  }

  fn by_line_inner(
    &mut self,
    index: &Index,
    source: &(impl Source + ?Sized),
    line: u32,
  ) -> Result<Seek> {
    if line >= index.line_count() {
      return Err(Error::new(ErrorKind::LineOutOfRange {
        line,
        count: index.line_count(),
      }));
    }

    if let Some((cur, insn)) = &self.current {
      if *cur == line {
        return Ok(self.found(insn.clone(), line));
      }
    }
    let adjacent = matches!(&self.current, Some((cur, _)) if *cur + 1 == line);
    if adjacent && line < self.max_line {
      let insn = self.step(source, line)?;
      return Ok(self.found(insn, line));
    }

    let cp = self.reseek(index, source, line)?;
    let mut insn = self.step(source, cp.line)?;
    for l in cp.line + 1..=line {
      insn = self.step(source, l)?;
    }
    Ok(self.found(insn, line))
  }

  /// Seeks to the instruction containing the file offset `offset`.
  pub fn by_offset(
    &mut self,
    index: &Index,
    source: &(impl Source + ?Sized),
    offset: u64,
  ) -> Result<Seek> {
    self.by_offset_inner(index, source, offset).map_err(|e| {
      self.reset();
      e.during(Action::Seeking)
    })
  }

  fn by_offset_inner(
    &mut self,
    index: &Index,
    source: &(impl Source + ?Sized),
    offset: u64,
  ) -> Result<Seek> {
    let cp = match index.closest_by_offset(offset) {
      Some(cp) if index.covers(offset) => cp,
      _ => return Err(Error::new(ErrorKind::OffsetOutOfRange { offset })),
    };

    self.reseek(index, source, cp.line)?;
    let mut line = cp.line;
    loop {
      if line >= index.line_count() {
        return Err(Error::new(ErrorKind::OffsetOutOfRange { offset }));
      }
      let insn = self.step(source, line)?;
      if insn.contains(offset) {
        return Ok(self.found(insn, line));
      }
      line += 1;
    }
  }

  /// Saves the cursor state.
  pub fn snapshot(&self) -> Snapshot {
    Snapshot {
      window: self.window.clone(),
      cursor: self.cursor,
      current: self.current.clone(),
      checkpoint: self.checkpoint,
      max_line: self.max_line,
    }
  }

  /// Restores a cursor state saved by [`snapshot()`].
  ///
  /// [`snapshot()`]: #method.snapshot
  pub fn restore(&mut self, snapshot: Snapshot) {
    self.window = snapshot.window;
    self.cursor = snapshot.cursor;
    self.current = snapshot.current;
    self.checkpoint = snapshot.checkpoint;
    self.max_line = snapshot.max_line;
  }

  /// Forgets the sequential state, so that the next seek starts from a
  /// checkpoint. The fetched window is kept.
  pub fn reset(&mut self) {
    self.current = None;
    self.max_line = 0;
  }

  fn found(&self, insn: Insn, line: u32) -> Seek {
    Seek {
      insn,
      line,
      distance: line - self.checkpoint.line,
    }
  }

  /// Moves the cursor to the checkpoint closest to `line`, fetching bytes if
  /// the current window does not already start at or before it.
  fn reseek(
    &mut self,
    index: &Index,
    source: &(impl Source + ?Sized),
    line: u32,
  ) -> Result<Checkpoint> {
    let cps = index.checkpoints();
    let i = cps.partition_point(|cp| cp.line <= line).max(1);
    let cp = cps[i - 1];
    self.checkpoint = cp;
    self.max_line = cps.get(i).map(|cp| cp.line).unwrap_or(index.line_count());
    self.current = None;

    let covered = match &self.window {
      Some(w) => w.start <= cp.offset && cp.offset < w.end(),
      None => false,
    };
    if !covered {
      self.fetch(source, cp.offset)?;
    }
    self.cursor = cp.offset;
    Ok(cp)
  }

  fn fetch(&mut self, source: &(impl Source + ?Sized), offset: u64) -> Result<()> {
    self.window = None;
    let len = self.zone_end.saturating_sub(offset).min(WINDOW_LEN);
    let bytes = source.read(offset, len as usize)?;
    self.window = Some(Window {
      start: offset,
      bytes: bytes.into(),
    });
    Ok(())
  }

  /// Decodes the instruction at the cursor, which is on `line`.
  fn step(&mut self, source: &(impl Source + ?Sized), line: u32) -> Result<Insn> {
    let needs_fetch = match &self.window {
      Some(w) => {
        let left = w.end().saturating_sub(self.cursor);
        w.start > self.cursor
          || (left < MAX_INSN_LEN as u64 && w.end() < self.zone_end)
      }
      None => true,
    };
    if needs_fetch {
      self.fetch(source, self.cursor)?;
    }

    let cursor = self.cursor;
    let code = match &self.window {
      Some(w) => w.bytes.get((cursor - w.start) as usize..).unwrap_or(&[]),
      None => &[],
    };
    let insn = match self.decoder.decode(code, cursor)? {
      Some(insn) if !insn.bytes.is_empty() => insn,
      Some(_) => {
        return Err(Error::new(ErrorKind::Decode {
          offset: cursor,
          reason: "decoder made no progress".into(),
        }))
      }
      None => return Err(Error::new(ErrorKind::EndOfZone { offset: cursor })),
    };

    self.cursor = insn.end();
    self.current = Some((line, insn.clone()));
    Ok(insn)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  use crate::config::Config;
  use crate::isa::CapstoneDecoder;
  use crate::zone::test::*;

  /// The address of `line` in the `backward_call()` zone.
  fn address_of(line: u32) -> u64 {
    match line {
      0..=0x1f => 0x1030 + line as u64,
      0x20 => 0x1050,
      _ => 0x1055 + (line - 0x21) as u64,
    }
  }

  fn setup() -> (Index, Vec<u8>, Seeker<CapstoneDecoder>) {
    let (zone, code) = backward_call();
    let index = Index::build(&zone, &code, &mut x64(), &Config::default()).unwrap();
    (index, code, Seeker::new(x64(), zone.end()))
  }

  #[test]
  fn example_call() {
    let (index, code, mut seeker) = setup();
    let seek = seeker.by_offset(&index, &code, 0x1050).unwrap();
    assert_eq!(seek.insn.address, 0x1050);
    assert_eq!(seek.insn.mnemonic, "call");
    assert_eq!(seek.line, 0x20);

    let seek = seeker.by_offset(&index, &code, 0x1053).unwrap();
    assert_eq!(seek.insn.address, 0x1050);

    let seek = seeker.by_line(&index, &code, 0x20).unwrap();
    assert_eq!(seek.insn.operands, "0x1030");
  }

  #[test]
  fn round_trip() {
    let (index, code, mut seeker) = setup();
    for cp in index.checkpoints() {
      let by_line = seeker.by_line(&index, &code, cp.line).unwrap();
      let by_offset = seeker.by_offset(&index, &code, cp.offset).unwrap();
      assert_eq!(by_line.insn.address, by_offset.insn.address, "{:?}", cp);
      assert_eq!(by_line.insn.address, cp.offset);
      assert_eq!(by_offset.line, cp.line);
      assert_eq!(by_offset.distance, 0);
    }
  }

  #[test]
  fn scrolling() {
    let (index, code, mut seeker) = setup();
    for line in 0..2000 {
      let seek = seeker.by_line(&index, &code, line).unwrap();
      assert_eq!(seek.insn.address, address_of(line), "line {}", line);
    }
    for line in (1500..1600).rev() {
      let seek = seeker.by_line(&index, &code, line).unwrap();
      assert_eq!(seek.insn.address, address_of(line), "line {}", line);
    }
    for &line in &[60000, 7, 31000, 32, 33, index.line_count() - 1] {
      let seek = seeker.by_line(&index, &code, line).unwrap();
      assert_eq!(seek.insn.address, address_of(line), "line {}", line);
    }
  }

  #[test]
  fn distance_from_checkpoint() {
    let (index, code, mut seeker) = setup();
    let line = 1234;
    let cp = index.closest_by_line(line);
    let seek = seeker.by_line(&index, &code, line).unwrap();
    assert_eq!(seek.distance, line - cp.line);
  }

  #[test]
  fn out_of_range() {
    let (index, code, mut seeker) = setup();
    let err = seeker.by_line(&index, &code, index.line_count()).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::LineOutOfRange { .. }));
    assert_eq!(err.action(), Some(Action::Seeking));

    let err = seeker.by_offset(&index, &code, 0x1000).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::OffsetOutOfRange { offset: 0x1000 });
    let err = seeker.by_offset(&index, &code, 0x11000).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::OffsetOutOfRange { offset: 0x11000 });
  }

  #[test]
  fn read_failure_is_reported() {
    let (index, code, mut seeker) = setup();
    let truncated = code[..0x2000].to_vec();
    let err = seeker.by_line(&index, &truncated, 30000).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Read { .. }));

    let seek = seeker.by_line(&index, &code, 30000).unwrap();
    assert_eq!(seek.insn.address, address_of(30000));
  }

  #[test]
  fn snapshots() {
    let (index, code, mut seeker) = setup();
    seeker.by_line(&index, &code, 100).unwrap();
    let snap = seeker.snapshot();
    seeker.by_offset(&index, &code, 0x9000).unwrap();
    seeker.restore(snap);
    let seek = seeker.by_line(&index, &code, 101).unwrap();
    assert_eq!(seek.insn.address, address_of(101));
  }
}
