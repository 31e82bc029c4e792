//! The deep scan, which labels every call and jump target in a zone.

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::Action;
use crate::error::Result;
use crate::int;
use crate::isa::Decoder;
use crate::isa::Flow;
use crate::isa::Stream;
use crate::source::Source;
use crate::zone::level::Annotation;
use crate::zone::level::Levels;
use crate::zone::seek::Seeker;
use crate::zone::Index;
use crate::zone::Zone;

/// Why an address gets a label. When several apply, the first one wins.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum Reason {
  Entry,
  Call,
  Jump,
}

impl Reason {
  fn label(self, address: u64) -> String {
    match self {
      Reason::Entry => "EntryPoint".to_string(),
      Reason::Call => int::label("sub_0x", address),
      Reason::Jump => int::label("offset_0x", address),
    }
  }
}

/// Decodes the whole zone once, and inserts an annotation before every
/// instruction that a call or jump in the zone lands on, plus one for the
/// entry point.
///
/// Returns the number of annotations inserted. Running the scan on a zone
/// that already has annotations does nothing.
pub fn deep_scan<D: Decoder>(
  zone: &Zone,
  index: &Index,
  source: &(impl Source + ?Sized),
  seeker: &mut Seeker<D>,
  levels: &mut Levels,
) -> Result<u32> {
  if levels.annotation_count() > 0 {
    debug!("zone already has annotations; skipping deep scan");
    return Ok(0);
  }

  let targets = collect_targets(zone, index, source, seeker)
    .map_err(|e| e.during(Action::Scanning))?;

  let mut inserted = 0;
  for (address, reason) in &targets {
    let seek = seeker
      .by_offset(index, source, *address)
      .map_err(|e| e.during(Action::Scanning))?;
    let line = seek.line + inserted;
    debug!("labeling 0x{:x} at line {}", address, line);
    levels.insert(
      line,
      Annotation {
        label: reason.label(*address),
        address: *address,
      },
    )?;
    inserted += 1;
  }

  info!(
    "deep scan found {} targets in 0x{:x}..0x{:x}",
    inserted,
    index.true_start(),
    index.code_end()
  );
  Ok(inserted)
}

/// Finds every distinct labeled address, sorted.
fn collect_targets<D: Decoder>(
  zone: &Zone,
  index: &Index,
  source: &(impl Source + ?Sized),
  seeker: &mut Seeker<D>,
) -> Result<Vec<(u64, Reason)>> {
  let start = index.true_start();
  let code = source.read(start, (index.code_end() - start) as usize)?;

  let mut targets = Vec::new();
  if index.covers(zone.entry) {
    targets.push((zone.entry, Reason::Entry));
  }

  let stream = Stream::new(seeker.decoder_mut(), &code, start);
  for insn in stream.take(index.line_count() as usize) {
    let insn = match insn {
      Ok(insn) => insn,
      Err(e) => {
        warn!("deep scan stopped early: {}", e);
        break;
      }
    };

    let reason = match insn.flow() {
      Flow::Call => Reason::Call,
      Flow::Jump => Reason::Jump,
      _ => continue,
    };
    match insn.literal(&zone.arch) {
      Some(target) if index.covers(target) => targets.push((target, reason)),
      _ => {}
    }
  }

  targets.sort();
  targets.dedup_by_key(|(address, _)| *address);
  Ok(targets)
}
