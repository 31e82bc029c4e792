//! Engine configuration.

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Action;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;

/// Tunable parameters for indexing and rendering a zone.
///
/// The defaults match what works well for ordinary compiler output; dense or
/// unusual code may want a different checkpoint span.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
  /// How many bytes of decoded code to leave between checkpoints.
  pub checkpoint_span: u64,
  /// How many back-to-back filler instructions end indexing.
  pub filler_run_limit: u32,
  /// The longest string shown as a `push` preview. Twice this many bytes are
  /// read when looking for one.
  pub string_preview_len: usize,
  /// Whether to run the deep scan when a zone is first initialized.
  pub deep_scan_on_start: bool,
  /// Whether to lay out label arrows for each rendered window.
  pub arrows: bool,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      checkpoint_span: 500,
      filler_run_limit: 30,
      string_preview_len: 48,
      deep_scan_on_start: true,
      arrows: true,
    }
  }
}

impl Config {
  /// Parses a configuration from json5 text. Missing fields take their
  /// default values.
  pub fn from_json5(text: &str) -> Result<Self> {
    let config: Config = json5::from_str(text).map_err(|e| {
      Error::new(ErrorKind::Config(e.to_string())).during(Action::Configuring)
    })?;
    config.validate()?;
    Ok(config)
  }

  /// Reads and parses the configuration file at `path`.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
      Error::new(ErrorKind::Config(format!("{}: {}", path.display(), e)))
        .during(Action::Configuring)
    })?;
    Self::from_json5(&text)
  }

  fn validate(&self) -> Result<()> {
    let bad = |what: &str| {
      Err(
        Error::new(ErrorKind::Config(format!("{} must be nonzero", what)))
          .during(Action::Configuring),
      )
    };
    if self.checkpoint_span == 0 {
      return bad("checkpoint_span");
    }
    if self.filler_run_limit == 0 {
      return bad("filler_run_limit");
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn defaults() {
    let c = Config::from_json5("{}").unwrap();
    assert_eq!(c, Config::default());
    assert_eq!(c.checkpoint_span, 500);
    assert_eq!(c.filler_run_limit, 30);
  }

  #[test]
  fn partial() {
    let c = Config::from_json5("{ checkpoint_span: 64, arrows: false, }").unwrap();
    assert_eq!(c.checkpoint_span, 64);
    assert!(!c.arrows);
    assert_eq!(c.string_preview_len, 48);
  }

  #[test]
  fn rejects() {
    let e = Config::from_json5("{ filler_run_limit: 0 }").unwrap_err();
    assert_eq!(e.action(), Some(Action::Configuring));
    assert!(Config::from_json5("{ arrows: 3 }").is_err());
  }
}
