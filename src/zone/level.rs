//! Virtual lines: instruction lines interleaved with annotation lines.
//!
//! A zone's view is made up of *virtual* lines. Most of them are
//! instructions, but annotations (function and jump labels) are spliced in
//! between them, each taking up a line of its own. [`Levels`] maps a virtual
//! line back to either the annotation on it, or the instruction line to seek
//! to.
//!
//! Annotations live in a tree of [`Level`]s. The root spans the whole zone;
//! children describe nested sub-regions, when a file format has them. Each
//! annotation belongs to the innermost level containing its line.
//!
//! Viewports mostly ask for line after line, so `Levels` remembers how many
//! annotation and instruction lines precede the last line it resolved, and
//! updates those counts by one when the next request is adjacent.
//!
//! [`Levels`]: struct.Levels.html
//! [`Level`]: struct.Level.html

use std::collections::BTreeMap;
use std::ops::RangeBounds;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;

/// A synthesized label line.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Annotation {
  /// The label's text.
  pub label: String,
  /// The file offset the label refers to.
  pub address: u64,
}

/// A range of virtual lines, and the annotations within it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Level {
  start: u32,
  end: u32,
  annotations: BTreeMap<u32, Annotation>,
  children: Vec<Level>,
}

impl Level {
  fn new(start: u32, end: u32) -> Self {
    Level {
      start,
      end,
      annotations: BTreeMap::new(),
      children: Vec::new(),
    }
  }

  /// Returns the first virtual line in this level.
  pub fn start(&self) -> u32 {
    self.start
  }

  /// Returns the virtual line just past the end of this level.
  pub fn end(&self) -> u32 {
    self.end
  }

  /// Returns the annotations owned directly by this level.
  pub fn annotations(&self) -> &BTreeMap<u32, Annotation> {
    &self.annotations
  }

  /// Returns the nested levels inside this one.
  pub fn children(&self) -> &[Level] {
    &self.children
  }

  fn contains(&self, line: u32) -> bool {
    self.start <= line && line < self.end
  }

  fn child_containing(&self, line: u32) -> Option<usize> {
    self.children.iter().position(|c| c.contains(line))
  }

  /// Counts annotations in `range` owned by this level or any level below it.
  fn count(&self, range: impl RangeBounds<u32> + Clone) -> u32 {
    let own = self.annotations.range(range.clone()).count() as u32;
    own
      + self
        .children
        .iter()
        .map(|c| c.count(range.clone()))
        .sum::<u32>()
  }

  /// Shifts everything at or after `line` down by one, to make room for an
  /// annotation there.
  fn shift(&mut self, line: u32) {
    if self.start > line {
      self.start += 1;
    }
    if self.end > line {
      self.end += 1;
    }
    let tail = self.annotations.split_off(&line);
    self
      .annotations
      .extend(tail.into_iter().map(|(k, a)| (k + 1, a)));
    for child in &mut self.children {
      child.shift(line);
    }
  }
}

/// What a virtual line resolves to.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Resolved<'a> {
  /// The line is an annotation.
  Annotation(&'a Annotation),
  /// The line is an instruction, on this instruction line.
  Instruction(u32),
}

/// Running counts for the level the last request landed in.
#[derive(Copy, Clone, Default, Debug)]
struct Counts {
  /// Annotation lines from the level's start through the last line.
  text_passed: u32,
  /// Instruction lines from the level's start through the last line.
  asm_passed: u32,
  /// The instruction line of the level's first instruction.
  real_base: u32,
}

/// The virtual line map of a zone.
#[derive(Clone, Debug)]
pub struct Levels {
  root: Level,
  path: Vec<usize>,
  last: Option<u32>,
  counts: Counts,
}

impl Levels {
  /// Creates a map for a zone of `line_count` instruction lines, with no
  /// annotations.
  pub fn new(line_count: u32) -> Self {
    Levels {
      root: Level::new(0, line_count),
      path: Vec::new(),
      last: None,
      counts: Counts::default(),
    }
  }

  /// Returns the total number of virtual lines.
  pub fn len(&self) -> u32 {
    self.root.end
  }

  /// Returns whether there are no lines at all.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Returns the root level.
  pub fn root(&self) -> &Level {
    &self.root
  }

  /// Returns the total number of annotations.
  pub fn annotation_count(&self) -> u32 {
    self.root.count(..)
  }

  fn level(&self, path: &[usize]) -> &Level {
    let mut level = &self.root;
    for &i in path {
      level = &level.children[i];
    }
    level
  }

  fn level_mut(&mut self, path: &[usize]) -> &mut Level {
    let mut level = &mut self.root;
    for &i in path {
      level = &mut level.children[i];
    }
    level
  }

  /// Finds the path to the innermost level containing `line`.
  fn path_to(&self, line: u32) -> Vec<usize> {
    let mut path = Vec::new();
    let mut level = &self.root;
    while let Some(i) = level.child_containing(line) {
      path.push(i);
      level = &level.children[i];
    }
    path
  }

  fn out_of_range(&self, line: u32) -> Error {
    Error::new(ErrorKind::LineOutOfRange {
      line,
      count: self.len(),
    })
  }

  /// Resolves the virtual `line`, updating the running counts.
  pub fn resolve(&mut self, line: u32) -> Result<Resolved<'_>> {
    if line >= self.len() {
      return Err(self.out_of_range(line));
    }

    // Pop levels that no longer contain the line, then descend.
    let old = std::mem::take(&mut self.path);
    let mut path = old.clone();
    while !path.is_empty() && !self.level(&path).contains(line) {
      path.pop();
    }
    while let Some(i) = self.level(&path).child_containing(line) {
      path.push(i);
    }
    let changed = path != old || self.last.is_none();

    let level = self.level(&path);
    let is_text = |l: u32| level.annotations.contains_key(&l);
    let mut counts = self.counts;
    match self.last {
      Some(last) if !changed && line == last + 1 => {
        if is_text(line) {
          counts.text_passed += 1;
        } else {
          counts.asm_passed += 1;
        }
      }
      Some(last) if !changed && line + 1 == last => {
        if is_text(last) {
          counts.text_passed -= 1;
        } else {
          counts.asm_passed -= 1;
        }
      }
      Some(last) if !changed && line == last => {}
      _ => {
        let text = level.count(level.start..=line);
        counts = Counts {
          text_passed: text,
          asm_passed: line - level.start + 1 - text,
          real_base: level.start - self.root.count(..level.start),
        };
      }
    }

    self.counts = counts;
    self.path = path;
    self.last = Some(line);

    let level = self.level(&self.path);
    match level.annotations.get(&line) {
      Some(ann) => Ok(Resolved::Annotation(ann)),
      None => Ok(Resolved::Instruction(
        self.counts.real_base + self.counts.asm_passed - 1,
      )),
    }
  }

  /// Resolves the virtual `line` without touching the running counts.
  pub fn peek(&self, line: u32) -> Result<Resolved<'_>> {
    if line >= self.len() {
      return Err(self.out_of_range(line));
    }
    let level = self.level(&self.path_to(line));
    match level.annotations.get(&line) {
      Some(ann) => Ok(Resolved::Annotation(ann)),
      None => Ok(Resolved::Instruction(line - self.root.count(..line))),
    }
  }

  /// Returns the virtual line of the instruction on instruction line `real`.
  pub fn virtual_line_of(&self, real: u32) -> u32 {
    // Every annotation at or before the answer pushes it down by one.
    let mut line = real;
    loop {
      let next = real + self.root.count(..=line);
      if next == line {
        return line;
      }
      line = next;
    }
  }

  /// Inserts an annotation on virtual `line`, pushing that line and
  /// everything after it down by one.
  ///
  /// `line` may be one past the last line, to append.
  pub fn insert(&mut self, line: u32, annotation: Annotation) -> Result<()> {
    if line > self.len() {
      return Err(self.out_of_range(line));
    }

    let path = self.path_to(line);
    let appending = line == self.root.end;
    self.root.shift(line);
    if appending {
      self.root.end += 1;
    }
    self.level_mut(&path).annotations.insert(line, annotation);

    self.path.clear();
    self.last = None;
    Ok(())
  }

  /// Adds a nested level spanning the virtual lines `start..end`.
  ///
  /// The new level must nest cleanly: it may not partially overlap any
  /// existing level. Existing levels and annotations inside the range move
  /// under it.
  pub fn add_level(&mut self, start: u32, end: u32) -> Result<()> {
    if start >= end || end > self.len() {
      return Err(Error::new(ErrorKind::BadZone(format!(
        "bad level range {}..{}",
        start, end
      ))));
    }

    // The innermost level fully containing the range.
    let mut path = Vec::new();
    let mut level = &self.root;
    while let Some(i) = level
      .children
      .iter()
      .position(|c| c.start <= start && end <= c.end)
    {
      path.push(i);
      level = &level.children[i];
    }
    let overlaps = level.children.iter().any(|c| {
      let inside = start <= c.start && c.end <= end;
      let disjoint = c.end <= start || end <= c.start;
      !inside && !disjoint
    });
    if overlaps || (level.start == start && level.end == end && !path.is_empty()) {
      return Err(Error::new(ErrorKind::BadZone(format!(
        "level {}..{} overlaps an existing level",
        start, end
      ))));
    }

    let parent = self.level_mut(&path);
    let mut child = Level::new(start, end);
    let (inside, outside) = std::mem::take(&mut parent.children)
      .into_iter()
      .partition(|c| start <= c.start && c.end <= end);
    child.children = inside;
    parent.children = outside;

    let mut tail = parent.annotations.split_off(&start);
    let mut rest = tail.split_off(&end);
    child.annotations = tail;
    parent.annotations.append(&mut rest);

    let at = parent.children.partition_point(|c| c.start < start);
    parent.children.insert(at, child);

    self.path.clear();
    self.last = None;
    Ok(())
  }
}
