//! Error reporting facilities.
//!
//! Every fallible operation in this crate returns an [`Error`], which carries
//! an [`ErrorKind`] describing what went wrong and, optionally, the
//! [`Action`] the engine was performing at the time. The `Display`
//! implementation is always a single line, suitable for an error placeholder
//! in a viewport; [`Error::dump_to()`] produces a longer diagnostic.
//!
//! [`Error`]: struct.Error.html
//! [`ErrorKind`]: enum.ErrorKind.html
//! [`Action`]: enum.Action.html
//! [`Error::dump_to()`]: struct.Error.html#method.dump_to

use std::fmt;
use std::io;

use crate::isa::Arch;

/// A convenient alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error produced by the disassembly engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
  kind: ErrorKind,
  action: Option<Action>,
}

/// The kinds of failure the engine can report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
  /// The decoding backend cannot handle the zone's architecture.
  UnsupportedArch(Arch),
  /// The decoding backend failed to initialize.
  DecoderInit(String),
  /// A byte range could not be read from the source.
  Read {
    /// The file offset of the failed read.
    offset: u64,
    /// The number of bytes requested.
    len: usize,
    /// Why the read failed.
    reason: String,
  },
  /// The bytes at `offset` do not form a valid instruction.
  Decode {
    /// The file offset decoding was attempted at.
    offset: u64,
    /// What the decoder had to say about it.
    reason: String,
  },
  /// Decoding ran off the end of the zone before reaching its target.
  EndOfZone {
    /// The file offset where the bytes ran out.
    offset: u64,
  },
  /// The zone description itself is inconsistent.
  BadZone(String),
  /// A virtual or instruction line past the end of the zone was requested.
  LineOutOfRange {
    /// The requested line.
    line: u32,
    /// The number of lines available.
    count: u32,
  },
  /// A file offset outside of the indexed code was requested.
  OffsetOutOfRange {
    /// The requested offset.
    offset: u64,
  },
  /// The zone failed to initialize earlier and is no longer usable.
  Unusable(String),
  /// A configuration or symbol file could not be understood.
  Config(String),
  /// An I/O error while writing output.
  Io(String),
}

/// An action that the engine performs, which an error may be associated with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
  /// Building the checkpoint index.
  Indexing,
  /// Seeking to a line or offset.
  Seeking,
  /// Running the deep-scan symbolicator.
  Scanning,
  /// Filling a window of render lines.
  Rendering,
  /// Exporting a zone as text.
  Exporting,
  /// Loading configuration.
  Configuring,
}

impl Action {
  fn describe(self) -> &'static str {
    match self {
      Self::Indexing => "indexing",
      Self::Seeking => "seeking",
      Self::Scanning => "scanning",
      Self::Rendering => "rendering",
      Self::Exporting => "exporting",
      Self::Configuring => "configuring",
    }
  }
}

/// The place where an error occured.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cause {
  /// A file offset.
  Offset(u64),
  /// A line within the zone.
  Line(u32),
}

impl Error {
  /// Creates a new error of the given kind, with no associated action.
  pub fn new(kind: ErrorKind) -> Self {
    Error { kind, action: None }
  }

  /// Attaches `action` to this error, unless it already has one.
  ///
  /// The innermost action wins.
  #[must_use]
  pub fn during(mut self, action: Action) -> Self {
    if self.action.is_none() {
      self.action = Some(action);
    }
    self
  }

  /// Returns what went wrong.
  pub fn kind(&self) -> &ErrorKind {
    &self.kind
  }

  /// Returns the action this error is associated with, if any at all.
  pub fn action(&self) -> Option<Action> {
    self.action
  }

  /// Returns a `Cause` describing where the error happened, if known.
  pub fn cause(&self) -> Option<Cause> {
    match &self.kind {
      ErrorKind::Read { offset, .. }
      | ErrorKind::Decode { offset, .. }
      | ErrorKind::EndOfZone { offset }
      | ErrorKind::OffsetOutOfRange { offset } => Some(Cause::Offset(*offset)),
      ErrorKind::LineOutOfRange { line, .. } => Some(Cause::Line(*line)),
      _ => None,
    }
  }

  /// Dumps this error as user-displayable text into `sink`.
  pub fn dump_to(&self, mut sink: impl io::Write) -> io::Result<()> {
    writeln!(sink, "error: {}", self)?;
    let verb = self.action.map(Action::describe);
    match (verb, self.cause()) {
      (Some(verb), Some(Cause::Offset(offset))) => {
        writeln!(sink, "  while {} at file offset 0x{:x}", verb, offset)?
      }
      (Some(verb), Some(Cause::Line(line))) => {
        writeln!(sink, "  while {} line {}", verb, line)?
      }
      (Some(verb), None) => writeln!(sink, "  while {}", verb)?,
      (None, Some(Cause::Offset(offset))) => {
        writeln!(sink, "  at file offset 0x{:x}", offset)?
      }
      (None, Some(Cause::Line(line))) => writeln!(sink, "  at line {}", line)?,
      (None, None) => {}
    }
    Ok(())
  }
}

impl From<ErrorKind> for Error {
  fn from(kind: ErrorKind) -> Self {
    Error::new(kind)
  }
}

impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self {
    Error::new(ErrorKind::Io(e.to_string()))
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match &self.kind {
      ErrorKind::UnsupportedArch(arch) => {
        write!(f, "unsupported architecture: {}", arch)
      }
      ErrorKind::DecoderInit(reason) => {
        write!(f, "failed to initialize decoder: {}", reason)
      }
      ErrorKind::Read { offset, len, reason } => write!(
        f,
        "failed to read {} bytes at 0x{:x}: {}",
        len, offset, reason
      ),
      ErrorKind::Decode { offset, reason } => {
        write!(f, "failed to disassemble at 0x{:x}: {}", offset, reason)
      }
      ErrorKind::EndOfZone { offset } => {
        write!(f, "ran out of code at 0x{:x}", offset)
      }
      ErrorKind::BadZone(reason) => write!(f, "bad zone: {}", reason),
      ErrorKind::LineOutOfRange { line, count } => {
        write!(f, "line {} is out of range ({} lines)", line, count)
      }
      ErrorKind::OffsetOutOfRange { offset } => {
        write!(f, "offset 0x{:x} is outside of the indexed code", offset)
      }
      ErrorKind::Unusable(reason) => write!(f, "zone is unusable: {}", reason),
      ErrorKind::Config(reason) => write!(f, "bad configuration: {}", reason),
      ErrorKind::Io(reason) => write!(f, "i/o error: {}", reason),
    }
  }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod test {
  use super::*;

  fn dump(e: &Error) -> String {
    let mut out = Vec::new();
    e.dump_to(&mut out).unwrap();
    String::from_utf8(out).unwrap()
  }

  #[test]
  fn innermost_action_wins() {
    let e = Error::new(ErrorKind::EndOfZone { offset: 0x40 })
      .during(Action::Seeking)
      .during(Action::Rendering);
    assert_eq!(e.action(), Some(Action::Seeking));
    assert_eq!(e.cause(), Some(Cause::Offset(0x40)));
  }

  #[test]
  fn diagnostics() {
    let e = Error::new(ErrorKind::Decode {
      offset: 0x1234,
      reason: "invalid opcode".into(),
    })
    .during(Action::Indexing);
    assert_eq!(
      dump(&e),
      "error: failed to disassemble at 0x1234: invalid opcode\n  while indexing at file offset 0x1234\n"
    );

    let e = Error::new(ErrorKind::LineOutOfRange { line: 9, count: 3 });
    assert_eq!(
      dump(&e),
      "error: line 9 is out of range (3 lines)\n  at line 9\n"
    );

    let e = Error::new(ErrorKind::BadZone("empty".into()));
    assert_eq!(dump(&e), "error: bad zone: empty\n");
  }
}
