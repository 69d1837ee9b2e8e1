//! pixterm - headless driver for the terminal core
//!
//! Replays a recorded byte stream (a file or stdin) through the parser,
//! grid and renderer onto an in-memory surface, then writes the final frame
//! as a binary PPM image.
//!
//! # Quick Start
//!
//! ```text
//! pixterm session.log -o frame.ppm
//! printf '\033[1;31mhello\033[0m\n' | pixterm -o hello.ppm
//! pixterm -c pixterm.toml capture.bin
//! ```

use std::env;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pixterm::config::Config;
use pixterm::core::session::{run, CancellationToken, ChildIo, ReadOutcome, Session};
use pixterm::font::GlyphTable;
use pixterm::ui::{MemorySurface, Renderer, Surface};

/// Command line options
#[derive(Default)]
struct Args {
    /// Configuration file; defaults to ~/.pixterm/config.toml
    config: Option<PathBuf>,
    /// Where the final frame goes
    output: Option<PathBuf>,
    /// Byte stream to replay; stdin when absent
    input: Option<PathBuf>,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("pixterm {}", VERSION);
}

fn print_help() {
    eprintln!("pixterm {} - framebuffer terminal emulator core", VERSION);
    eprintln!();
    eprintln!("Usage: pixterm [OPTIONS] [INPUT]");
    eprintln!();
    eprintln!("Replays INPUT (or stdin) as child output and renders it.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>   Configuration file");
    eprintln!("  -o, --output <FILE>   Write the final frame as PPM (default: pixterm.ppm)");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.pixterm/config.toml");
    eprintln!("Logging: PIXTERM_LOG=debug (tracing EnvFilter syntax)");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("Missing config file argument")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "-o" | "--output" => {
                i += 1;
                let path = args.get(i).ok_or("Missing output file argument")?;
                parsed.output = Some(PathBuf::from(path));
            }
            arg if arg.starts_with('-') && arg != "-" => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            arg => {
                if parsed.input.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                if arg != "-" {
                    parsed.input = Some(PathBuf::from(arg));
                }
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Child output arriving over a channel from the reader thread
struct ChannelIo {
    rx: Receiver<Vec<u8>>,
    /// Part of a chunk that did not fit the last read
    leftover: Vec<u8>,
    cancel: CancellationToken,
}

impl ChildIo for ChannelIo {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome> {
        if self.leftover.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.leftover = chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(ReadOutcome::Idle),
                Err(RecvTimeoutError::Disconnected) => {
                    self.cancel.cancel();
                    return Ok(ReadOutcome::Closed);
                }
            }
        }

        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(ReadOutcome::Data(n))
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        // a recording cannot be answered
        debug!("Discarding reply {:?}", String::from_utf8_lossy(bytes));
        Ok(())
    }
}

/// Read `input` in chunks and forward them until EOF
fn spawn_reader(mut input: Box<dyn Read + Send>, chunk_size: usize) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut buffer = vec![0u8; chunk_size];
        loop {
            match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Input read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_env("PIXTERM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    info!("pixterm {} starting...", VERSION);

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load(),
    };
    config.validate().context("Invalid configuration")?;

    let glyphs = Arc::new(GlyphTable::from_config(&config).context("Failed to build glyph table")?);
    info!("Glyph table ready: {} glyphs", glyphs.len());

    let mut surface = MemorySurface::from_config(&config.surface).context("Failed to create surface")?;
    let mut renderer = Renderer::new(surface.geometry(), &config).context("Failed to create renderer")?;
    let (cols, rows) = renderer.grid_size();
    let mut session = Session::new(&config, glyphs, cols, rows);

    let input: Box<dyn Read + Send> = match &args.input {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    };

    let cancel = CancellationToken::new();
    let mut child = ChannelIo {
        rx: spawn_reader(input, config.io.read_buffer_size.max(1)),
        leftover: Vec::new(),
        cancel: cancel.clone(),
    };

    let stats = run(
        &mut session,
        &mut renderer,
        &mut surface,
        &mut child,
        &cancel,
        &config.io,
    )
    .context("Terminal loop failed")?;
    info!(
        "Replayed {} bytes in {} frames ({} deferred)",
        stats.bytes_read, stats.frames, stats.skipped_frames
    );
    if !session.title().is_empty() {
        info!("Title: {}", session.title());
    }

    let output = args.output.unwrap_or_else(|| PathBuf::from("pixterm.ppm"));
    let file = File::create(&output).with_context(|| format!("Failed to create {}", output.display()))?;
    surface
        .write_ppm(io::BufWriter::new(file))
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Wrote {}", output.display());

    Ok(())
}
