//! Label-arrow layout for a window of render lines.
//!
//! Arrows connect a call or jump to its target, when both are in the same
//! window. There are only [`Rails::LANES`] lanes to draw them in; lanes are
//! handed out in the order the branches appear, and branches beyond that get
//! no arrow.
//!
//! [`Rails::LANES`]: ../struct.Rails.html#associatedconstant.LANES

use crate::render::Rails;
use crate::render::RenderLine;

/// Lays out arrows over `lines`, replacing whatever rails they had.
///
/// Returns the number of lanes used.
pub fn layout(lines: &mut [RenderLine]) -> usize {
  for line in lines.iter_mut() {
    line.rails = Rails::default();
  }

  let addresses = lines
    .iter()
    .filter(|l| l.is_instruction())
    .map(|l| l.address);
  let (min, max) = match (addresses.clone().min(), addresses.max()) {
    (Some(min), Some(max)) => (min, max),
    _ => return 0,
  };

  let mut pairs = Vec::new();
  for (i, line) in lines.iter().enumerate() {
    if pairs.len() == Rails::LANES {
      break;
    }
    if !line.is_instruction() || !line.flow.is_branch() {
      continue;
    }
    let target = match line.value {
      Some(v) if min <= v && v <= max => v,
      _ => continue,
    };
    let j = lines
      .iter()
      .position(|l| l.is_instruction() && l.address == target);
    if let Some(j) = j {
      pairs.push((i.min(j), i.max(j)));
    }
  }

  for (lane, &(top, bottom)) in pairs.iter().enumerate() {
    lines[top].rails.0 |= Rails::START;
    lines[bottom].rails.0 |= Rails::END;
    for line in &mut lines[top..=bottom] {
      line.rails.0 |= Rails::lane_bit(lane);
    }
  }
  pairs.len()
}
