//! Session management
//!
//! Pairs a terminal grid with its escape sequence parser and drives both
//! from the child process' output.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::term::{Response, TermOptions, TerminalState, VtParser};
use crate::config::{Config, IoConfig};
use crate::error::Result;
use crate::font::GlyphTable;
use crate::ui::renderer::{Renderer, SurfaceChange};
use crate::ui::surface::Surface;

/// A terminal session
pub struct Session {
    /// Terminal state
    pub state: TerminalState,
    /// VT parser
    parser: VtParser,
    /// Replies not yet written back to the child
    pending: Vec<Response>,
}

impl Session {
    /// Create a new session
    pub fn new(config: &Config, glyphs: Arc<GlyphTable>, cols: u16, rows: u16) -> Self {
        Self {
            state: TerminalState::new(cols, rows, glyphs, TermOptions::from(config)),
            parser: VtParser::new(config.terminal.escape_buffer_size),
            pending: Vec::new(),
        }
    }

    /// Feed raw child output into the terminal
    pub fn feed_bytes(&mut self, bytes: &[u8]) {
        let responses = self.parser.feed(bytes, &mut self.state);
        self.pending.extend(responses);
    }

    /// Replies produced since the last call
    pub fn take_responses(&mut self) -> Vec<Response> {
        std::mem::take(&mut self.pending)
    }

    /// Resize the terminal. The grid comes back blank and any partial
    /// escape sequence is dropped.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        tracing::info!("Resizing terminal to {}x{}", cols, rows);
        self.parser.reset();
        self.state.resize(cols, rows);
    }

    /// Get the terminal title
    pub fn title(&self) -> &str {
        &self.state.title
    }
}

/// Result of one wait on the child
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were placed at the front of the buffer
    Data(usize),
    /// Nothing arrived before the timeout
    Idle,
    /// The child closed its output
    Closed,
}

/// Byte stream to and from the child process
pub trait ChildIo {
    /// Wait up to `timeout` for output
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome>;

    /// Send a reply to the child
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Stops [`run`] from another thread
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters reported when the loop exits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub bytes_read: u64,
    pub frames: u64,
    /// Draws postponed because of lazy drawing or a hidden surface
    pub skipped_frames: u64,
}

fn draw_allowed(surface: &dyn Surface, config: &IoConfig) -> bool {
    config.background_draw || surface.is_visible()
}

/// Run the session until the child closes its output or `cancel` fires.
///
/// Each pass re-checks the surface geometry, waits for child output, feeds
/// it through the parser, writes replies back, and then draws if anything
/// changed.
pub fn run(
    session: &mut Session,
    renderer: &mut Renderer,
    surface: &mut dyn Surface,
    io: &mut dyn ChildIo,
    cancel: &CancellationToken,
    config: &IoConfig,
) -> Result<LoopStats> {
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    let mut stats = LoopStats::default();
    let mut needs_draw = true;

    tracing::info!(
        "Session started ({}x{})",
        session.state.cols(),
        session.state.rows()
    );

    while !cancel.is_cancelled() {
        match renderer.sync_surface(surface)? {
            SurfaceChange::Unchanged => {}
            SurfaceChange::Redraw => {
                session.state.mark_all_dirty();
                needs_draw = true;
            }
            SurfaceChange::Resized { cols, rows } => {
                session.resize(cols, rows);
                needs_draw = true;
            }
        }

        let mut buffer_full = false;
        match io.read_timeout(&mut buf, config.read_timeout()) {
            Ok(ReadOutcome::Data(n)) => {
                let n = n.min(buf.len());
                stats.bytes_read += n as u64;
                session.feed_bytes(&buf[..n]);
                for response in session.take_responses() {
                    tracing::debug!("Reply {:?}", response);
                    if let Err(e) = io.write_all(&response.to_bytes()) {
                        tracing::warn!("Failed to write reply: {}", e);
                    }
                }
                needs_draw = true;
                buffer_full = n == buf.len();
            }
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Closed) => {
                tracing::info!("Child output closed");
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }

        if !needs_draw {
            continue;
        }
        // more output is probably queued behind a full read
        if (config.lazy_draw && buffer_full) || !draw_allowed(surface, config) {
            stats.skipped_frames += 1;
            continue;
        }
        if renderer.refresh(&mut session.state, surface) {
            stats.frames += 1;
            needs_draw = false;
        }
    }

    if needs_draw && draw_allowed(surface, config) && renderer.refresh(&mut session.state, surface) {
        stats.frames += 1;
    }

    tracing::info!(
        "Session ended: {} bytes, {} frames, {} skipped",
        stats.bytes_read,
        stats.frames,
        stats.skipped_frames
    );
    Ok(stats)
}
