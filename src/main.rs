//! `zonedis`, a command-line viewer for x86 disassembly zones.

#![deny(missing_docs)]
#![deny(unused)]
#![deny(warnings)]
#![deny(unsafe_code)]

use std::fs::File;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::process;

use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use zonedis::config::Config;
use zonedis::error::Result;
use zonedis::int::parse_u64;
use zonedis::isa::Arch;
use zonedis::isa::CapstoneIsa;
use zonedis::map::MemoryMap;
use zonedis::map::Region;
use zonedis::map::Regions;
use zonedis::map::Symbols;
use zonedis::map::Translator;
use zonedis::render::fmt;
use zonedis::render::Env;
use zonedis::source::FileSource;
use zonedis::source::Source;
use zonedis::view::ZoneView;
use zonedis::zone::Zone;

/// View a byte range of a file as x86 code.
///
/// Integer arguments may be given in decimal, or in hex with a `0x` or `$`
/// prefix.
#[derive(StructOpt)]
#[structopt(name = "zonedis")]
struct Opts {
  /// The file to read code from.
  #[structopt(parse(from_os_str))]
  file: PathBuf,

  /// The file offset the zone starts at.
  #[structopt(long, default_value = "0", parse(try_from_str = parse_u64))]
  start: u64,

  /// The zone's length in bytes; defaults to the rest of the file.
  #[structopt(long, parse(try_from_str = parse_u64))]
  size: Option<u64>,

  /// The file offset of the zone's entry point; defaults to its start.
  #[structopt(long, parse(try_from_str = parse_u64))]
  entry: Option<u64>,

  /// The architecture to decode as: x86 or x64.
  #[structopt(long, default_value = "x64")]
  arch: Arch,

  /// A json5 file of engine settings.
  #[structopt(long, parse(from_os_str))]
  config: Option<PathBuf>,

  /// A json5 symbol file of known mappings and load regions.
  #[structopt(long, parse(from_os_str))]
  symbols: Option<PathBuf>,

  /// The address the zone is loaded at, if it is not its file offset.
  ///
  /// Overrides any regions in the symbol file.
  #[structopt(long, parse(try_from_str = parse_u64))]
  va_base: Option<u64>,

  /// Label call and jump targets when the zone is opened.
  #[structopt(long)]
  deep_scan: bool,

  /// Do not label call and jump targets when the zone is opened.
  #[structopt(long)]
  no_deep_scan: bool,

  #[structopt(subcommand)]
  cmd: Command,
}

#[derive(StructOpt)]
enum Command {
  /// Print the zone's checkpoint index.
  Index,
  /// Print a window of composed lines.
  View {
    /// The first virtual line to show.
    #[structopt(long, default_value = "0")]
    line: u32,
    /// The number of lines to show.
    #[structopt(long, default_value = "40")]
    count: u32,
    /// Do not draw label arrows.
    #[structopt(long)]
    no_rails: bool,
  },
  /// Print a flat disassembly of the whole zone.
  Export {
    /// Write to this file instead of stdout.
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,
  },
  /// Print the line a call or jump leads to.
  Follow {
    /// The virtual line of the call or jump.
    line: u32,
  },
  /// Print the line containing a file offset.
  Seek {
    /// The file offset to look for.
    #[structopt(parse(try_from_str = parse_u64))]
    offset: u64,
  },
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    )
    .with_writer(io::stderr)
    .with_ansi(false)
    .init();

  let opts = Opts::from_args();
  if let Err(e) = run(opts) {
    let _ = e.dump_to(io::stderr());
    process::exit(1);
  }
}

fn run(opts: Opts) -> Result<()> {
  let mut config = match &opts.config {
    Some(path) => Config::load(path)?,
    None => Config::default(),
  };
  if opts.deep_scan {
    config.deep_scan_on_start = true;
  }
  if opts.no_deep_scan {
    config.deep_scan_on_start = false;
  }
  let symbols = match &opts.symbols {
    Some(path) => Symbols::load(path)?,
    None => Symbols::default(),
  };

  let source = FileSource::open(&opts.file)?;
  let zone = Zone {
    start: opts.start,
    size: opts
      .size
      .unwrap_or_else(|| source.len().saturating_sub(opts.start)),
    entry: opts.entry.unwrap_or(opts.start),
    arch: opts.arch.clone(),
  };

  let translator: Box<dyn Translator> = match opts.va_base {
    Some(address) => Box::new(Regions(vec![Region {
      file_offset: zone.start,
      address,
      len: zone.size,
    }])),
    None => symbols.translator(),
  };
  let mappings = if symbols.mappings.is_empty() {
    None
  } else {
    Some(&symbols.mappings as &dyn MemoryMap)
  };
  let env = Env {
    mappings,
    names: None,
    translator: &*translator,
  };
  let mut view = ZoneView::new(zone, &source, CapstoneIsa, config).with_env(env);

  let stdout = io::stdout();
  let mut out = stdout.lock();
  match opts.cmd {
    Command::Index => {
      let lines = view.ensure_initialized()?;
      if let (Some(index), Some(levels)) = (view.index(), view.levels()) {
        writeln!(out, "true start:   0x{:x}", index.true_start())?;
        writeln!(out, "code end:     0x{:x}", index.code_end())?;
        writeln!(out, "instructions: {}", index.line_count())?;
        writeln!(out, "labels:       {}", levels.annotation_count())?;
        writeln!(out, "lines:        {}", lines)?;
        writeln!(out, "checkpoints:")?;
        for cp in index.checkpoints() {
          writeln!(out, "  0x{:08x} line {}", cp.offset, cp.line)?;
        }
      }
    }
    Command::View {
      line,
      count,
      no_rails,
    } => {
      let opts = fmt::Options {
        rails: !no_rails,
        ..fmt::Options::default()
      };
      for shown in view.display(line, count, &opts)? {
        writeln!(out, "{}", shown)?;
      }
    }
    Command::Export { output: Some(path) } => {
      let mut file = io::BufWriter::new(File::create(path)?);
      view.export_text(&mut file)?;
      file.flush()?;
    }
    Command::Export { output: None } => view.export_text(&mut out)?,
    Command::Follow { line } => match view.follow(line)? {
      Some(target) => writeln!(out, "{} -> {}", line, target)?,
      None => writeln!(out, "line {} does not lead into the zone", line)?,
    },
    Command::Seek { offset } => {
      let line = view.line_of_offset(offset)?;
      writeln!(out, "0x{:x} is on line {}", offset, line)?;
    }
  }
  Ok(())
}
