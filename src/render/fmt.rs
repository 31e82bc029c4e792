//! Composition of render lines into tagged display text.
//!
//! A renderer only needs to paint [`Segment`]s in the color their [`Tag`]
//! asks for; all of the column layout happens here.
//!
//! [`Segment`]: struct.Segment.html
//! [`Tag`]: enum.Tag.html

use std::fmt;

use crate::map::MappingKind;
use crate::render::LineKind;
use crate::render::Rails;
use crate::render::RenderLine;

/// Formatter options.
///
/// This type implements `Default`, and is intended to be used with record
/// update syntax:
/// ```
/// # use zonedis::render::fmt::Options;
/// let opts = Options {
///   rails: false,
///   ..Options::default()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct Options {
  /// The number of opcode bytes shown per line; longer instructions are cut
  /// short.
  ///
  /// Defaults to 8 bytes.
  pub bytes_shown: usize,
  /// Whether to draw the label-arrow column.
  pub rails: bool,
  /// The column to justify end-of-line comments to.
  ///
  /// Defaults to 96.
  pub comment_column: usize,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      bytes_shown: 8,
      rails: true,
      comment_column: 96,
    }
  }
}

/// What a piece of a display line is, for coloring purposes.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Tag {
  /// The address column.
  Address,
  /// Column separators.
  Column,
  /// Opcode bytes.
  Bytes,
  /// Opcode bytes shown as text.
  Text,
  /// Label-arrow rails.
  Rail,
  /// An ordinary mnemonic.
  Mnemonic,
  /// A jump mnemonic.
  Jump,
  /// A call mnemonic.
  Call,
  /// A stack mnemonic.
  Push,
  /// A general-purpose register.
  Register,
  /// A stack or index register.
  StackRegister,
  /// A numeric literal.
  Number,
  /// A function symbol.
  Function,
  /// A data symbol.
  Data,
  /// Brackets and commas.
  Punctuation,
  /// Any other operand text.
  Operand,
  /// A label, or a synthesized label in an operand.
  Label,
  /// An end-of-line comment.
  Comment,
  /// An error message.
  Error,
}

/// A run of display text with a single tag.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Segment {
  /// The text.
  pub text: String,
  /// Its tag.
  pub tag: Tag,
}

/// A composed line, ready to be painted.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct DisplayLine {
  /// The line's segments, in order.
  pub segments: Vec<Segment>,
}

impl DisplayLine {
  fn push(&mut self, text: impl Into<String>, tag: Tag) {
    let text = text.into();
    if !text.is_empty() {
      self.segments.push(Segment { text, tag });
    }
  }

  /// Returns the width of this line in characters.
  pub fn width(&self) -> usize {
    self.segments.iter().map(|s| s.text.chars().count()).sum()
  }

  /// Returns the first segment with the given tag.
  pub fn find(&self, tag: Tag) -> Option<&Segment> {
    self.segments.iter().find(|s| s.tag == tag)
  }
}

impl fmt::Display for DisplayLine {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    for seg in &self.segments {
      f.write_str(&seg.text)?;
    }
    Ok(())
  }
}

/// Composes `line` into display text, with `comment` at the end, if any.
pub fn compose(line: &RenderLine, comment: Option<&str>, opts: &Options) -> DisplayLine {
  let mut out = DisplayLine::default();
  out.push(format!("0x{:08x} ", line.address), Tag::Address);

  if let LineKind::Failed(e) = &line.kind {
    out.push(format!("error: {}", e), Tag::Error);
    return out;
  }

  out.push("|", Tag::Column);
  let mut bytes = String::new();
  for i in 0..opts.bytes_shown {
    match line.bytes.get(i) {
      Some(b) => bytes.push_str(&format!("{:02x} ", b)),
      None => bytes.push_str("   "),
    }
  }
  out.push(bytes, Tag::Bytes);

  out.push("|", Tag::Column);
  let text: String = (0..opts.bytes_shown)
    .map(|i| match line.bytes.get(i) {
      Some(&b) if (0x20..0x7f).contains(&b) => b as char,
      Some(_) => '.',
      None => ' ',
    })
    .collect();
  out.push(text, Tag::Text);
  out.push(" |", Tag::Column);

  if opts.rails {
    out.push(rails(line.rails), Tag::Rail);
  }

  match &line.kind {
    LineKind::Annotation(label) => {
      out.push(label.as_str(), Tag::Label);
      out.push(" <--", Tag::Label);
    }
    _ => {
      out.push("  ", Tag::Column);
      out.push(format!("{:<6}", line.mnemonic), mnemonic_tag(&line.mnemonic));
      match &line.symbol {
        Some(sym) => {
          let tag = match sym.kind {
            MappingKind::Function => Tag::Function,
            MappingKind::Data => Tag::Data,
          };
          out.push(" ", Tag::Operand);
          out.push(sym.name.as_str(), tag);
        }
        None => operands(&line.operands, &mut out),
      }
    }
  }

  if let Some(comment) = comment {
    let pad = opts.comment_column.saturating_sub(out.width()).max(1);
    out.push(" ".repeat(pad), Tag::Column);
    out.push(format!("; {}", comment), Tag::Comment);
  }
  out
}

/// Draws the rail column: a `|` per lane, with the empty space filled by an
/// arrow on lines where an arrow starts or ends.
fn rails(rails: Rails) -> String {
  let mut col: Vec<char> = (0..Rails::LANES)
    .map(|lane| if rails.has_lane(lane) { '|' } else { ' ' })
    .collect();
  if rails.is_start() || rails.is_end() {
    for c in &mut col {
      if *c == ' ' {
        *c = '-';
      }
    }
    col[Rails::LANES - 1] = if rails.is_start() { '<' } else { '>' };
  }
  col.into_iter().collect()
}

fn mnemonic_tag(mnemonic: &str) -> Tag {
  match mnemonic {
    "call" => Tag::Call,
    "push" | "pop" => Tag::Push,
    m if m.starts_with('j') => Tag::Jump,
    _ => Tag::Mnemonic,
  }
}

fn operand_tag(token: &str) -> Tag {
  let is_number = (token.starts_with("0x") && token.len() > 2)
    || (!token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()));
  if is_number {
    return Tag::Number;
  }
  if ["sub_", "jmp_", "offset_"].iter().any(|p| token.starts_with(p)) {
    return Tag::Label;
  }
  if token.len() < 4 && token.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
    match token.bytes().last() {
      Some(b'x') | Some(b's') | Some(b'l') | Some(b'h') => return Tag::Register,
      Some(b'p') | Some(b'i') => return Tag::StackRegister,
      _ => {}
    }
  }
  Tag::Operand
}

/// Splits operand text on spaces, commas and brackets, and tags each piece.
fn operands(text: &str, out: &mut DisplayLine) {
  let mut token = String::new();
  let mut last = ' ';
  for c in text.chars() {
    if !matches!(c, ' ' | ',' | '[' | ']') {
      token.push(c);
      continue;
    }

    if !token.is_empty() {
      if last != '[' {
        out.push(" ", Tag::Operand);
      }
      let tag = operand_tag(&token);
      out.push(std::mem::take(&mut token), tag);
    }
    match c {
      '[' => out.push(" [", Tag::Punctuation),
      ' ' => {}
      c => out.push(c.to_string(), Tag::Punctuation),
    }
    last = c;
  }

  if !token.is_empty() {
    if last != '[' {
      out.push(" ", Tag::Operand);
    }
    let tag = operand_tag(&token);
    out.push(token, tag);
  }
}
