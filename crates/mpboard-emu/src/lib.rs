//! # mpboard-emu
//!
//! An in-memory emulated MicroPython board, just faithful enough to drive
//! the communication core through its full protocol surface: friendly and
//! raw REPL modes, raw-paste flow control, sentinel-delimited execution
//! responses, and a virtual filesystem behind the snippet vocabulary the
//! core generates (listing, stat, hex chunk transfer, mkdir/rmdir/remove,
//! rename, uname, sha256).
//!
//! The emulated device runs on its own thread behind byte channels, so host
//! reads genuinely block and interrupts genuinely race the way they do
//! against hardware.
//!
//! ```no_run
//! use mpboard_core::{connect_with_transport, BoardConfig};
//! use mpboard_emu::EmuBoard;
//!
//! let emu = EmuBoard::spawn(Default::default());
//! let board = connect_with_transport(
//!     emu.transport(),
//!     BoardConfig::default(),
//!     "emu0".into(),
//! )?;
//! # Ok::<(), mpboard_core::BoardError>(())
//! ```

mod device;
mod interpreter;
mod transport;
mod vfs;

pub use device::{EmuBoard, EmuConfig};
pub use transport::EmuTransport;
pub use vfs::Vfs;
