//! VT100 terminal state and escape sequence parser.

pub mod charset;
pub mod parser;
pub mod state;

pub use parser::{Response, VtParser};
pub use state::{AttrFlags, Cell, CellWidth, ColorPair, CursorPos, TermOptions, TerminalState};
