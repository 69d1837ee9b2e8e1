//! Core terminal emulation components.
//!
//! This module contains the terminal emulation logic:
//!
//! - **term**: cell grid and VT escape sequence parser
//! - **session**: grid + parser pair and the control loop that feeds it
//!
//! # Architecture
//!
//! ```text
//! run()
//! ├── ChildIo (bytes from / replies to the child process)
//! ├── Session
//! │   ├── VtParser (escape sequence accumulator)
//! │   └── TerminalState
//! │       ├── cells + dirty rows
//! │       ├── cursor, scroll region, tab stops
//! │       └── rendition + charset state
//! └── Renderer -> Surface
//! ```

pub mod session;
pub mod term;
