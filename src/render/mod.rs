//! Render records for virtual lines, and the enrichment that fills them in.
//!
//! Each visible line becomes a [`RenderLine`]: the decoded instruction, plus
//! whatever could be worked out about it. Calls and jumps to literal
//! addresses get a symbol name, either from a [`MemoryMap`] or synthesized,
//! and the line they lead to. Pushes of an address that points at text get a
//! string preview recorded in [`Notes`].
//!
//! [`RenderLine`]: struct.RenderLine.html
//! [`MemoryMap`]: ../map/trait.MemoryMap.html
//! [`Notes`]: struct.Notes.html

use std::collections::BTreeMap;
use std::collections::HashSet;

use crate::config::Config;
use crate::error::Error;
use crate::int;
use crate::isa::Decoder;
use crate::isa::Flow;
use crate::isa::Insn;
use crate::map::Identity;
use crate::map::Mapping;
use crate::map::MappingKind;
use crate::map::MemoryMap;
use crate::map::NameHash;
use crate::map::Translator;
use crate::source::Source;
use crate::zone::level::Annotation;
use crate::zone::level::Levels;
use crate::zone::seek::Seeker;
use crate::zone::Index;
use crate::zone::Zone;

pub mod arrows;
pub mod fmt;

/// Connector rails drawn in the margin of a line.
///
/// Bits 0 through 4 are the five lanes; the remaining bits mark a line as the
/// start or end of an arrow.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, Debug)]
pub struct Rails(pub u8);

impl Rails {
  /// The number of lanes.
  pub const LANES: usize = 5;
  /// Set on the earlier line of an arrow.
  pub const START: u8 = 1 << 5;
  /// Set on the later line of an arrow.
  pub const END: u8 = 1 << 6;

  /// Returns the bit for `lane`, which must be less than `LANES`.
  pub fn lane_bit(lane: usize) -> u8 {
    1 << lane
  }

  /// Returns whether `lane` passes through this line.
  pub fn has_lane(self, lane: usize) -> bool {
    lane < Self::LANES && self.0 & Self::lane_bit(lane) != 0
  }

  /// Returns whether an arrow starts on this line.
  pub fn is_start(self) -> bool {
    self.0 & Self::START != 0
  }

  /// Returns whether an arrow ends on this line.
  pub fn is_end(self) -> bool {
    self.0 & Self::END != 0
  }

  /// Returns whether no rails touch this line at all.
  pub fn is_empty(self) -> bool {
    self.0 == 0
  }
}

/// What a [`RenderLine`] shows.
///
/// [`RenderLine`]: struct.RenderLine.html
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LineKind {
  /// A decoded instruction.
  Instruction,
  /// An annotation, carrying its label.
  Annotation(String),
  /// A placeholder for a line that could not be produced.
  Failed(Error),
}

/// A display record for one virtual line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RenderLine {
  /// The virtual line this record is for.
  pub line: u32,
  /// What kind of line this is.
  pub kind: LineKind,
  /// The file offset of the instruction, or the target of the annotation.
  pub address: u64,
  /// The instruction's encoding.
  pub bytes: Vec<u8>,
  /// The instruction's mnemonic.
  pub mnemonic: String,
  /// The operand text, possibly replaced by a symbol name.
  pub operands: String,
  /// The instruction's control-flow class.
  pub flow: Flow,
  /// The literal operand, for calls, jumps and pushes that have one.
  pub value: Option<u64>,
  /// The known region `value` refers to, if any.
  pub symbol: Option<Mapping>,
  /// The virtual line `value` leads to, if it is inside the zone.
  pub target_line: Option<u32>,
  /// Label-arrow rails.
  pub rails: Rails,
}

impl RenderLine {
  fn empty(line: u32, kind: LineKind, address: u64) -> Self {
    RenderLine {
      line,
      kind,
      address,
      bytes: Vec::new(),
      mnemonic: String::new(),
      operands: String::new(),
      flow: Flow::None,
      value: None,
      symbol: None,
      target_line: None,
      rails: Rails::default(),
    }
  }

  /// Creates a record for an annotation line.
  pub fn annotation(line: u32, annotation: &Annotation) -> Self {
    Self::empty(
      line,
      LineKind::Annotation(annotation.label.clone()),
      annotation.address,
    )
  }

  /// Creates an error placeholder for `line`.
  pub fn failed(line: u32, error: Error) -> Self {
    Self::empty(line, LineKind::Failed(error), 0)
  }

  /// Creates a plain record for an instruction, with nothing resolved.
  pub fn instruction(line: u32, insn: Insn) -> Self {
    let flow = insn.flow();
    RenderLine {
      line,
      kind: LineKind::Instruction,
      address: insn.address,
      bytes: insn.bytes,
      mnemonic: insn.mnemonic,
      operands: insn.operands,
      flow,
      value: None,
      symbol: None,
      target_line: None,
      rails: Rails::default(),
    }
  }

  /// Returns whether this line is a decoded instruction.
  pub fn is_instruction(&self) -> bool {
    self.kind == LineKind::Instruction
  }
}

/// Facts discovered while rendering, keyed by virtual line.
///
/// These outlive any one window: a comment found the first time a line is
/// shown is kept, and never worked out again.
#[derive(Clone, Default, Debug)]
pub struct Notes {
  /// Inline comments, such as string previews.
  pub comments: BTreeMap<u32, String>,
  /// Calls to well-known functions, by calling line.
  pub calls: BTreeMap<u32, String>,
  /// Lines that have already been enriched once.
  pub visited: HashSet<u32>,
}

impl Notes {
  /// Forgets everything. Needed whenever virtual lines move.
  pub fn clear(&mut self) {
    self.comments.clear();
    self.calls.clear();
    self.visited.clear();
  }
}

/// Optional symbol collaborators for enrichment.
#[derive(Copy, Clone)]
pub struct Env<'a> {
  /// Known memory regions.
  pub mappings: Option<&'a dyn MemoryMap>,
  /// Well-known function names.
  pub names: Option<&'a dyn NameHash>,
  /// File offset to address translation.
  pub translator: &'a dyn Translator,
}

impl Default for Env<'_> {
  fn default() -> Self {
    Env {
      mappings: None,
      names: None,
      translator: &Identity,
    }
  }
}

/// Everything enrichment needs to look at, for one zone.
pub struct Enricher<'a, D> {
  /// The zone being rendered.
  pub zone: &'a Zone,
  /// The zone's checkpoint index.
  pub index: &'a Index,
  /// The bytes of the file.
  pub source: &'a dyn Source,
  /// The zone's seeker, used to find target lines.
  pub seeker: &'a mut Seeker<D>,
  /// The zone's virtual lines.
  pub levels: &'a Levels,
  /// Notes to record discoveries in.
  pub notes: &'a mut Notes,
  /// Symbol collaborators.
  pub env: Env<'a>,
  /// Engine configuration.
  pub config: &'a Config,
}

impl<D: Decoder> Enricher<'_, D> {
  /// Builds the record for `insn`, which is on virtual `line`.
  pub fn enrich(&mut self, line: u32, insn: Insn) -> RenderLine {
    let mut out = RenderLine::instruction(line, insn);
    match out.flow {
      Flow::Call | Flow::Jump => self.branch(&mut out),
      Flow::Push => self.push(&mut out),
      Flow::None => {}
    }
    self.notes.visited.insert(line);
    out
  }

  fn branch(&mut self, out: &mut RenderLine) {
    let value = match int::parse_literal(&out.operands, &self.zone.arch) {
      Some(v) => v,
      None => return,
    };
    out.value = Some(value);

    if let Some(mapping) = self.lookup(value) {
      out.operands = mapping.name.clone();
      let first_time = !self.notes.visited.contains(&out.line);
      if out.flow == Flow::Call && mapping.kind == MappingKind::Function && first_time
      {
        if let Some(names) = self.env.names {
          let token = names.hash(mapping.name.as_bytes());
          if let Some(name) = names.function_name_for(token) {
            self.notes.calls.insert(out.line, name.to_string());
          }
        }
      }
      out.symbol = Some(mapping);
      return;
    }

    let prefix = if out.flow == Flow::Call {
      "sub_0x"
    } else {
      "jmp_0x"
    };
    out.operands = format!("{} (0x{:x})", int::label(prefix, value), value);

    if self.index.covers(value) {
      let saved = self.seeker.snapshot();
      let found = self.seeker.by_offset(self.index, self.source, value);
      self.seeker.restore(saved);
      if let Ok(seek) = found {
        out.target_line = Some(self.levels.virtual_line_of(seek.line));
      }
    }
  }

  /// Looks `value` up as-is, then as the address its file offset loads at.
  fn lookup(&self, value: u64) -> Option<Mapping> {
    let map = self.env.mappings?;
    map
      .lookup(value)
      .or_else(|| {
        let address = self.env.translator.from_file_offset(value)?;
        map.lookup(address)
      })
      .cloned()
  }

  fn push(&mut self, out: &mut RenderLine) {
    let value = match int::parse_literal(&out.operands, &self.zone.arch) {
      Some(v) => v,
      None => return,
    };
    out.value = Some(value);

    if self.notes.visited.contains(&out.line) || self.notes.comments.contains_key(&out.line)
    {
      return;
    }
    if let Some(text) = self.string_at(value) {
      self.notes.comments.insert(out.line, text);
    }
  }

  /// Maps a pushed `value` to the file offset it points at, if it looks like
  /// an address at all: it must either load through a region, or, taken as a
  /// raw offset, not point before the zone.
  fn address_like(&self, value: u64) -> Option<u64> {
    let offset = self.env.translator.to_file_offset(value)?;
    if offset == value && value < self.zone.start {
      return None;
    }
    Some(offset)
  }

  /// Reads a quoted preview of the string at `address`, if there is one.
  fn string_at(&self, address: u64) -> Option<String> {
    let preview = self.config.string_preview_len;
    let offset = self.address_like(address)?;
    if offset.checked_add(preview as u64)? >= self.source.len() {
      return None;
    }
    let bytes = self.source.read_clamped(offset, preview * 2).ok()?;
    string_preview(&bytes, preview)
  }
}

/// Extracts a printable string from the front of `bytes`.
///
/// Single NULs between characters are skipped, so that UTF-16 text reads as
/// well as ASCII; a second NUL in a row ends the string. Strings longer than
/// `max` are cut short with an ellipsis.
pub fn string_preview(bytes: &[u8], max: usize) -> Option<String> {
  let mut text = String::new();
  let mut was_nul = true;
  for &b in bytes {
    match b {
      0x20..=0x7e => {
        text.push(b as char);
        was_nul = false;
      }
      0 if !was_nul => was_nul = true,
      _ => break,
    }
  }

  if text.is_empty() {
    return None;
  }
  if text.len() > max {
    text.truncate(max);
    text.push_str("...");
  }
  Some(format!("\"{}\"", text))
}

#[cfg(test)]
mod test {
  use super::*;

  use std::collections::HashMap;

  use crate::isa::CapstoneDecoder;
  use crate::zone::test::*;

  struct Names;
  impl NameHash for Names {
    fn hash(&self, bytes: &[u8]) -> u32 {
      bytes.iter().fold(0u32, |h, &b| h.wrapping_mul(31).wrapping_add(b as u32))
    }
    fn function_name_for(&self, token: u32) -> Option<&str> {
      if token == self.hash(b"imp_ExitProcess") {
        Some("ExitProcess")
      } else {
        None
      }
    }
  }

  struct Fixture {
    zone: Zone,
    code: Vec<u8>,
    index: Index,
    seeker: Seeker<CapstoneDecoder>,
    levels: Levels,
    notes: Notes,
    config: Config,
  }

  impl Fixture {
    fn new(zone: Zone, code: Vec<u8>) -> Self {
      let config = Config::default();
      let index = Index::build(&zone, &code, &mut x64(), &config).unwrap();
      Fixture {
        seeker: Seeker::new(x64(), zone.end()),
        levels: Levels::new(index.line_count()),
        notes: Notes::default(),
        zone,
        code,
        index,
        config,
      }
    }

    fn enrich(&mut self, env: Env<'_>, line: u32) -> RenderLine {
      let insn = self
        .seeker
        .by_line(&self.index, &self.code, line)
        .unwrap()
        .insn;
      Enricher {
        zone: &self.zone,
        index: &self.index,
        source: &self.code,
        seeker: &mut self.seeker,
        levels: &self.levels,
        notes: &mut self.notes,
        env,
        config: &self.config,
      }
      .enrich(line, insn)
    }
  }

  #[test]
  fn synthesized_labels() {
    let mut code = nops(0x400);
    call(&mut code, 0x10, 0x80);
    jmp(&mut code, 0x20, 0x90);
    call(&mut code, 0x30, 0x4000);
    let mut f = Fixture::new(zone(0, 0x400, 0), code);

    let line = f.enrich(Env::default(), 0x10);
    assert_eq!(line.flow, Flow::Call);
    assert_eq!(line.value, Some(0x80));
    assert_eq!(line.operands, "sub_0x00000080 (0x80)");
    assert_eq!(line.target_line, Some(0x80 - 12));

    let line = f.enrich(Env::default(), 0x1c);
    assert_eq!(line.address, 0x20);
    assert_eq!(line.flow, Flow::Jump);
    assert_eq!(line.operands, "jmp_0x00000090 (0x90)");
    assert_eq!(line.target_line, Some(0x90 - 12));

    // The seeker's cursor is left where it was.
    let next = f.seeker.by_line(&f.index, &f.code, 0x1d).unwrap();
    assert_eq!(next.insn.address, 0x25);

    let line = f.enrich(Env::default(), 0x28);
    assert_eq!(line.address, 0x30);
    assert_eq!(line.value, Some(0x4000));
    assert_eq!(line.target_line, None);
  }

  #[test]
  fn decimal_targets() {
    let mut code = nops(0x400);
    call(&mut code, 0x10, 8);
    let mut f = Fixture::new(zone(0, 0x400, 0), code);

    let line = f.enrich(Env::default(), 0x10);
    assert_eq!(line.value, Some(8));
    assert_eq!(line.operands, "sub_0x00000008 (0x8)");
    assert_eq!(line.target_line, Some(8));
  }

  #[test]
  fn mapped_symbols() {
    let mut code = nops(0x400);
    call(&mut code, 0x10, 0x80);
    call(&mut code, 0x20, 0x100);
    let mut f = Fixture::new(zone(0, 0x400, 0), code);

    let mut map = HashMap::new();
    map.insert(
      0x80,
      Mapping {
        name: "imp_ExitProcess".into(),
        kind: MappingKind::Function,
      },
    );
    map.insert(
      0x401100,
      Mapping {
        name: "g_table".into(),
        kind: MappingKind::Data,
      },
    );
    let regions = crate::map::Regions(vec![crate::map::Region {
      file_offset: 0,
      address: 0x401000,
      len: 0x400,
    }]);
    let env = Env {
      mappings: Some(&map),
      names: Some(&Names),
      translator: &regions,
    };

    let line = f.enrich(env, 0x10);
    assert_eq!(line.operands, "imp_ExitProcess");
    assert_eq!(line.symbol.as_ref().map(|m| m.kind), Some(MappingKind::Function));
    assert_eq!(f.notes.calls.get(&0x10).map(String::as_str), Some("ExitProcess"));

    let line = f.enrich(env, 0x1c);
    assert_eq!(line.operands, "g_table");
    assert_eq!(line.target_line, None);
    assert_eq!(f.notes.calls.len(), 1);
  }

  #[test]
  fn push_previews_are_idempotent() {
    let mut code = nops(0x400);
    // push 0x200
    code[0x10..0x15].copy_from_slice(&[0x68, 0x00, 0x02, 0x00, 0x00]);
    code[0x200..0x20c].copy_from_slice(b"hello world\0");
    let mut f = Fixture::new(zone(0, 0x200, 0), code);

    let first = f.enrich(Env::default(), 0x10);
    assert_eq!(first.flow, Flow::Push);
    assert_eq!(first.value, Some(0x200));
    assert_eq!(
      f.notes.comments.get(&0x10).map(String::as_str),
      Some("\"hello world\"")
    );

    f.notes.comments.insert(0x10, "edited".into());
    let second = f.enrich(Env::default(), 0x10);
    assert_eq!(first, second);
    assert_eq!(f.notes.comments.len(), 1);
    assert_eq!(f.notes.comments.get(&0x10).map(String::as_str), Some("edited"));
  }

  #[test]
  fn small_pushes_are_not_addresses() {
    let mut code = nops(0x400);
    code[..5].copy_from_slice(b"MZPE\0");
    // push 2; push 0x380
    code[0x110..0x115].copy_from_slice(&[0x68, 0x02, 0x00, 0x00, 0x00]);
    code[0x120..0x125].copy_from_slice(&[0x68, 0x80, 0x03, 0x00, 0x00]);
    code[0x380..0x385].copy_from_slice(b"text\0");
    let mut f = Fixture::new(zone(0x100, 0x200, 0x100), code);

    let line = f.enrich(Env::default(), 0x10);
    assert_eq!(line.value, Some(2));
    assert_eq!(f.notes.comments.get(&0x10), None);

    let line = f.enrich(Env::default(), 0x1c);
    assert_eq!(line.value, Some(0x380));
    assert_eq!(
      f.notes.comments.get(&0x1c).map(String::as_str),
      Some("\"text\"")
    );

    // Through a load region, only mapped addresses are followed.
    let regions = crate::map::Regions(vec![crate::map::Region {
      file_offset: 0,
      address: 0x400000,
      len: 0x400,
    }]);
    let env = Env {
      translator: &regions,
      ..Env::default()
    };
    f.notes.clear();
    f.enrich(env, 0x1c);
    assert!(f.notes.comments.is_empty());
  }

  #[test]
  fn previews() {
    assert_eq!(string_preview(b"abc\0def", 48).as_deref(), Some("\"abcdef\""));
    assert_eq!(string_preview(b"abc\0\0def", 48).as_deref(), Some("\"abc\""));
    assert_eq!(string_preview(b"a\0b\0c\0\0d", 48).as_deref(), Some("\"abc\""));
    assert_eq!(string_preview(b"\0abc", 48), None);
    assert_eq!(string_preview(b"\x01abc", 48), None);
    assert_eq!(string_preview(b"abcdef", 4).as_deref(), Some("\"abcd...\""));
    assert_eq!(string_preview(b"abcd", 4).as_deref(), Some("\"abcd\""));
  }
}
