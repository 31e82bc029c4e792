//! The zone view: what a viewport drives.
//!
//! A [`ZoneView`] owns everything needed to show one zone: its checkpoint
//! index, its seeker, its virtual lines and everything noted while
//! rendering. Nothing is computed until [`ZoneView::ensure_initialized()`]
//! is called (directly, or by any other operation); if initialization fails,
//! the view remembers why, and stays unusable.
//!
//! [`ZoneView`]: struct.ZoneView.html
//! [`ZoneView::ensure_initialized()`]: struct.ZoneView.html#method.ensure_initialized

use std::io;

use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::dump;
use crate::error::Action;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;
use crate::isa::Arch;
use crate::isa::Decoder;
use crate::isa::Isa;
use crate::render::arrows;
use crate::render::fmt;
use crate::render::Enricher;
use crate::render::Env;
use crate::render::Notes;
use crate::render::RenderLine;
use crate::source::Source;
use crate::zone::level::Levels;
use crate::zone::level::Resolved;
use crate::zone::scan;
use crate::zone::seek::Seeker;
use crate::zone::Index;
use crate::zone::Zone;

/// The live state of an initialized zone.
struct ZoneState<D> {
  index: Index,
  seeker: Seeker<D>,
  levels: Levels,
  notes: Notes,
  window: Option<Window>,
  scanned: bool,
}

/// The most recently rendered window.
struct Window {
  start: u32,
  count: u32,
  lines: Vec<RenderLine>,
}

enum Status<D> {
  Uninit,
  Ready(Box<ZoneState<D>>),
  Unusable(String),
}

fn ready<D>(status: &mut Status<D>) -> Result<&mut ZoneState<D>> {
  match status {
    Status::Ready(state) => Ok(&mut **state),
    Status::Unusable(reason) => Err(Error::new(ErrorKind::Unusable(reason.clone()))),
    Status::Uninit => Err(Error::new(ErrorKind::Unusable(
      "zone has not been initialized".into(),
    ))),
  }
}

impl<D: Decoder> ZoneState<D> {
  fn scan(&mut self, zone: &Zone, source: &dyn Source) -> Result<u32> {
    if self.scanned {
      return Ok(0);
    }
    match scan::deep_scan(zone, &self.index, source, &mut self.seeker, &mut self.levels) {
      Ok(n) => {
        self.scanned = true;
        self.notes.clear();
        self.window = None;
        Ok(n)
      }
      Err(e) => {
        self.levels = Levels::new(self.index.line_count());
        self.seeker.reset();
        Err(e)
      }
    }
  }

  /// Finds the virtual line that the instruction on real `line` branches to.
  fn target_of(&mut self, arch: &Arch, source: &dyn Source, line: u32) -> Result<Option<u32>> {
    let insn = self.seeker.by_line(&self.index, source, line)?.insn;
    let target = match insn.branch_target(arch) {
      Some(t) if self.index.covers(t) => t,
      _ => return Ok(None),
    };
    let seek = self.seeker.by_offset(&self.index, source, target)?;
    Ok(Some(self.levels.virtual_line_of(seek.line)))
  }
}

/// A disassembly zone, as seen by a viewport.
pub struct ZoneView<'a, I: Isa> {
  zone: Zone,
  config: Config,
  isa: I,
  source: &'a dyn Source,
  env: Env<'a>,
  status: Status<I::Decoder>,
}

impl<'a, I: Isa> ZoneView<'a, I> {
  /// Creates a new view of `zone`, whose bytes come from `source`.
  pub fn new(zone: Zone, source: &'a dyn Source, isa: I, config: Config) -> Self {
    ZoneView {
      zone,
      config,
      isa,
      source,
      env: Env::default(),
      status: Status::Uninit,
    }
  }

  /// Sets the symbol collaborators used when rendering.
  pub fn with_env(mut self, env: Env<'a>) -> Self {
    self.env = env;
    self
  }

  /// Returns the zone being viewed.
  pub fn zone(&self) -> &Zone {
    &self.zone
  }

  /// Returns the zone's checkpoint index, if it has been built.
  pub fn index(&self) -> Option<&Index> {
    match &self.status {
      Status::Ready(state) => Some(&state.index),
      _ => None,
    }
  }

  /// Returns the zone's virtual lines, if it has been initialized.
  pub fn levels(&self) -> Option<&Levels> {
    match &self.status {
      Status::Ready(state) => Some(&state.levels),
      _ => None,
    }
  }

  /// Returns everything noted while rendering so far.
  pub fn notes(&self) -> Option<&Notes> {
    match &self.status {
      Status::Ready(state) => Some(&state.notes),
      _ => None,
    }
  }

  /// Builds the checkpoint index, and runs the deep scan if configured to,
  /// unless that has already happened.
  ///
  /// Returns the number of virtual lines in the zone.
  pub fn ensure_initialized(&mut self) -> Result<u32> {
    match &self.status {
      Status::Ready(state) => return Ok(state.levels.len()),
      Status::Unusable(reason) => {
        return Err(Error::new(ErrorKind::Unusable(reason.clone())))
      }
      Status::Uninit => {}
    }

    match self.init() {
      Ok(state) => {
        let lines = state.levels.len();
        info!(
          "zone 0x{:x}..0x{:x} ready: {} lines, {} checkpoints",
          self.zone.start,
          self.zone.end(),
          lines,
          state.index.checkpoints().len()
        );
        self.status = Status::Ready(Box::new(state));
        Ok(lines)
      }
      Err(e) => {
        warn!("zone 0x{:x} is unusable: {}", self.zone.start, e);
        self.status = Status::Unusable(e.to_string());
        Err(e)
      }
    }
  }

  fn init(&self) -> Result<ZoneState<I::Decoder>> {
    let arch = &self.zone.arch;
    if !self.isa.supports(arch) {
      return Err(
        Error::new(ErrorKind::UnsupportedArch(arch.clone())).during(Action::Indexing),
      );
    }
    let mut decoder = self.isa.open(arch).map_err(|e| e.during(Action::Indexing))?;
    let index = Index::build(&self.zone, self.source, &mut decoder, &self.config)?;

    let mut state = ZoneState {
      seeker: Seeker::new(decoder, self.zone.end()),
      levels: Levels::new(index.line_count()),
      index,
      notes: Notes::default(),
      window: None,
      scanned: false,
    };
    if self.config.deep_scan_on_start {
      if let Err(e) = state.scan(&self.zone, self.source) {
        warn!("deep scan failed; continuing without labels: {}", e);
      }
    }
    Ok(state)
  }

  /// Runs the deep scan, if it has not run yet.
  ///
  /// Returns the number of labels added.
  pub fn deep_scan(&mut self) -> Result<u32> {
    self.ensure_initialized()?;
    let state = ready(&mut self.status)?;
    state.scan(&self.zone, self.source)
  }

  /// Drops the cached window, so the next render starts fresh.
  pub fn invalidate(&mut self) {
    if let Status::Ready(state) = &mut self.status {
      state.window = None;
    }
  }

  /// Renders up to `count` virtual lines starting at `start`.
  ///
  /// A line that cannot be produced becomes a [`LineKind::Failed`]
  /// placeholder, and ends the window.
  ///
  /// [`LineKind::Failed`]: ../render/enum.LineKind.html#variant.Failed
  pub fn render(&mut self, start: u32, count: u32) -> Result<Vec<RenderLine>> {
    self.ensure_initialized()?;
    let state = ready(&mut self.status)?;
    if let Some(w) = &state.window {
      if w.start == start && w.count == count {
        return Ok(w.lines.clone());
      }
    }

    let end = start.saturating_add(count).min(state.levels.len());
    let mut lines = Vec::new();
    for line in start..end {
      let real = match state.levels.resolve(line) {
        Ok(Resolved::Instruction(real)) => real,
        Ok(Resolved::Annotation(ann)) => {
          lines.push(RenderLine::annotation(line, ann));
          continue;
        }
        Err(e) => {
          lines.push(RenderLine::failed(line, e.during(Action::Rendering)));
          break;
        }
      };

      let insn = match state.seeker.by_line(&state.index, self.source, real) {
        Ok(seek) => seek.insn,
        Err(e) => {
          lines.push(RenderLine::failed(line, e.during(Action::Rendering)));
          break;
        }
      };
      let mut enricher = Enricher {
        zone: &self.zone,
        index: &state.index,
        source: self.source,
        seeker: &mut state.seeker,
        levels: &state.levels,
        notes: &mut state.notes,
        env: self.env,
        config: &self.config,
      };
      lines.push(enricher.enrich(line, insn));
    }

    if self.config.arrows {
      arrows::layout(&mut lines);
    }
    state.window = Some(Window {
      start,
      count,
      lines: lines.clone(),
    });
    Ok(lines)
  }

  /// Renders and composes up to `count` lines starting at `start`, with their
  /// comments.
  pub fn display(
    &mut self,
    start: u32,
    count: u32,
    opts: &fmt::Options,
  ) -> Result<Vec<fmt::DisplayLine>> {
    let lines = self.render(start, count)?;
    let notes = &ready(&mut self.status)?.notes;
    Ok(
      lines
        .iter()
        .map(|line| {
          let comment = match notes.comments.get(&line.line) {
            Some(text) => Some(text.clone()),
            None => notes.calls.get(&line.line).map(|f| format!("calls {}", f)),
          };
          fmt::compose(line, comment.as_deref(), opts)
        })
        .collect(),
    )
  }

  /// Returns the comment noted for virtual `line`, if any.
  pub fn comment(&self, line: u32) -> Option<&str> {
    self.notes()?.comments.get(&line).map(String::as_str)
  }

  /// Writes a flat disassembly of the whole zone to `w`.
  pub fn export_text(&mut self, w: impl io::Write) -> Result<()> {
    self.ensure_initialized()?;
    let state = ready(&mut self.status)?;
    let result = dump::export(
      &self.zone,
      &state.index,
      self.source,
      state.seeker.decoder_mut(),
      w,
    );
    state.seeker.reset();
    result
  }

  /// Finds the virtual line that the call or jump on virtual `line` leads
  /// to, if it leads anywhere inside the zone.
  ///
  /// The sequential seek state is left untouched.
  pub fn follow(&mut self, line: u32) -> Result<Option<u32>> {
    self.ensure_initialized()?;
    let state = ready(&mut self.status)?;
    let real = match state.levels.peek(line)? {
      Resolved::Instruction(real) => real,
      Resolved::Annotation(_) => return Ok(None),
    };

    let saved = state.seeker.snapshot();
    let result = state.target_of(&self.zone.arch, self.source, real);
    state.seeker.restore(saved);
    result
  }

  /// Finds the virtual line of the instruction containing the file offset
  /// `offset`.
  pub fn line_of_offset(&mut self, offset: u64) -> Result<u32> {
    self.ensure_initialized()?;
    let state = ready(&mut self.status)?;
    let saved = state.seeker.snapshot();
    let result = state.seeker.by_offset(&state.index, self.source, offset);
    state.seeker.restore(saved);
    Ok(state.levels.virtual_line_of(result?.line))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  use std::cell::Cell;

  use crate::isa::CapstoneIsa;
  use crate::isa::Flow;
  use crate::render::LineKind;
  use crate::zone::test::*;

  fn view<'a>(zone: Zone, code: &'a Vec<u8>, config: Config) -> ZoneView<'a, CapstoneIsa> {
    ZoneView::new(zone, code, CapstoneIsa, config)
  }

  #[test]
  fn example_scenario() {
    let (zone, code) = backward_call();
    let mut v = view(zone, &code, Config::default());

    let lines = v.ensure_initialized().unwrap();
    let index = v.index().unwrap();
    assert_eq!(index.true_start(), 0x1030);
    assert_eq!(lines, index.line_count() + 2);
    assert_eq!(v.line_of_offset(0x1050).unwrap(), 0x22);

    let window = v.render(0, 0x30).unwrap();
    assert_eq!(window.len(), 0x30);
    assert_eq!(window[0].kind, LineKind::Annotation("sub_0x00001030".into()));
    assert_eq!(window[1].address, 0x1030);
    assert_eq!(window[0x11].kind, LineKind::Annotation("EntryPoint".into()));
    assert_eq!(window[0x12].address, 0x1040);

    let call = &window[0x22];
    assert_eq!(call.address, 0x1050);
    assert_eq!(call.flow, Flow::Call);
    assert_eq!(call.operands, "sub_0x00001030 (0x1030)");
    assert_eq!(call.target_line, Some(1));

    assert!(window[1].rails.is_start());
    assert!(call.rails.is_end());
    assert!(window[1..=0x22].iter().all(|l| l.rails.has_lane(0)));
    assert!(!window[0].rails.has_lane(0));
    assert!(!window[0x23].rails.has_lane(0));

    assert_eq!(v.follow(0x22).unwrap(), Some(1));
    assert_eq!(v.follow(0x21).unwrap(), None);
    assert_eq!(v.follow(0).unwrap(), None);
  }

  #[test]
  fn rendering_is_idempotent() {
    let mut code = nops(0x400);
    code[0x10..0x15].copy_from_slice(&[0x68, 0x00, 0x03, 0x00, 0x00]);
    code[0x300..0x306].copy_from_slice(b"hello\0");
    let zone = zone(0, 0x200, 0);
    let mut v = view(zone, &code, Config::default());

    let first = v.render(0, 0x40).unwrap();
    assert_eq!(v.comment(0x11), Some("\"hello\""));
    v.invalidate();
    let second = v.render(0, 0x40).unwrap();
    assert_eq!(first, second);
    assert_eq!(v.notes().unwrap().comments.len(), 1);

    let shown = v.display(0x11, 1, &fmt::Options::default()).unwrap();
    assert!(shown[0].to_string().ends_with("; \"hello\""), "{}", shown[0]);
  }

  #[test]
  fn unsupported_arch() {
    let code = nops(0x100);
    let zone = Zone {
      arch: Arch::Other("arm".into()),
      ..zone(0, 0x100, 0)
    };
    let mut v = view(zone, &code, Config::default());

    let err = v.ensure_initialized().unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UnsupportedArch(Arch::Other("arm".into())));
    let err = v.render(0, 10).unwrap_err();
    assert_eq!(
      err.kind(),
      &ErrorKind::Unusable("unsupported architecture: arm".into())
    );
    assert!(v.index().is_none());
  }

  struct Flaky {
    bytes: Vec<u8>,
    reads: Cell<u32>,
    allowed: u32,
  }

  impl Source for Flaky {
    fn len(&self) -> u64 {
      Source::len(&self.bytes)
    }

    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
      let n = self.reads.get();
      self.reads.set(n + 1);
      if n >= self.allowed {
        return Err(Error::new(ErrorKind::Read {
          offset,
          len,
          reason: "device went away".into(),
        }));
      }
      Source::read(&self.bytes, offset, len)
    }
  }

  #[test]
  fn failed_lines() {
    let src = Flaky {
      bytes: nops(0x100),
      reads: Cell::new(0),
      allowed: 1,
    };
    let config = Config {
      deep_scan_on_start: false,
      ..Config::default()
    };
    let mut v = ZoneView::new(zone(0, 0x100, 0), &src, CapstoneIsa, config);

    assert_eq!(v.ensure_initialized().unwrap(), 0x100);
    let window = v.render(0, 10).unwrap();
    assert_eq!(window.len(), 1);
    match &window[0].kind {
      LineKind::Failed(e) => {
        assert!(matches!(e.kind(), ErrorKind::Read { .. }));
        assert_eq!(e.action(), Some(Action::Seeking));
      }
      k => panic!("expected a failed line, got {:?}", k),
    }
  }

  #[test]
  fn explicit_deep_scan() {
    let (zone, code) = backward_call();
    let config = Config {
      deep_scan_on_start: false,
      ..Config::default()
    };
    let mut v = view(zone, &code, config);

    let before = v.ensure_initialized().unwrap();
    assert_eq!(v.render(0, 1).unwrap()[0].address, 0x1030);
    assert_eq!(v.deep_scan().unwrap(), 2);
    assert_eq!(v.deep_scan().unwrap(), 0);
    assert_eq!(v.ensure_initialized().unwrap(), before + 2);
    assert!(matches!(v.render(0, 1).unwrap()[0].kind, LineKind::Annotation(_)));
  }

  #[test]
  fn export() {
    let (zone, code) = backward_call();
    let mut v = view(zone, &code, Config::default());
    let mut out = Vec::new();
    v.export_text(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count() as u32, 1 + v.index().unwrap().line_count());
    assert!(text.contains("\n00001050: e8 db ff ff ff"));

    // Rendering still works afterwards.
    assert_eq!(v.render(1, 1).unwrap()[0].address, 0x1030);
  }
}
