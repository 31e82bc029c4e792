//! Control-flow classification of mnemonics.

/// How an instruction interacts with control flow, as far as the viewer cares.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Flow {
  /// Not interesting.
  None,
  /// A `call`.
  Call,
  /// Any conditional or unconditional jump.
  Jump,
  /// A `push`, which may be pushing the address of a string.
  Push,
}

impl Flow {
  /// Classifies `mnemonic`.
  pub fn of(mnemonic: &str) -> Self {
    match mnemonic {
      "call" => Flow::Call,
      "push" => Flow::Push,
      m if m.starts_with('j') => Flow::Jump,
      _ => Flow::None,
    }
  }

  /// Returns whether this is a call or a jump.
  pub fn is_branch(self) -> bool {
    matches!(self, Flow::Call | Flow::Jump)
  }
}

impl Default for Flow {
  fn default() -> Self {
    Flow::None
  }
}
