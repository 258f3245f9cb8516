//! Command-line interface for MicroPython board access.
//!
//! Thin shell over `mpboard-core`: argument parsing, event rendering, and
//! Ctrl-C wiring. Kept as a library so argument parsing stays testable.

use clap::{Parser, Subcommand};
use mpboard_core::{
    BoardConfig, BoardEvent, BoardHandle, RemainingPolicy, SyncSummary,
};
use std::path::PathBuf;
use std::time::Duration;

/// MicroPython board access over a serial link.
#[derive(Debug, Parser)]
#[command(name = "mpboard", version, about)]
pub struct Cli {
    /// Serial port (e.g. /dev/ttyACM0). Not needed for `scan`.
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, default_value_t = 115_200)]
    pub baud: u32,

    /// Pulse the control lines to reset the board before connecting.
    #[arg(long, global = true)]
    pub reset: bool,

    /// Disable raw-paste mode negotiation.
    #[arg(long, global = true)]
    pub no_raw_paste: bool,

    /// Verbose logging (repeat for more).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Probe all serial ports for a responding board.
    Scan,
    /// Execute a code snippet and print its output.
    Exec {
        /// Code to execute.
        code: String,
        /// Execution timeout in seconds.
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Run a local script on the board.
    Run {
        /// Local script path.
        file: PathBuf,
        /// Execution timeout in seconds (default: none; Ctrl-C interrupts).
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// List the remote tree.
    Ls {
        /// Remote directory.
        #[arg(default_value = "/")]
        path: String,
    },
    /// Copy a remote file to a local path.
    Get {
        /// Remote path.
        remote: String,
        /// Local destination.
        local: PathBuf,
    },
    /// Copy a local file to a remote path.
    Put {
        /// Local source.
        local: PathBuf,
        /// Remote path.
        remote: String,
    },
    /// Delete a remote file.
    Rm {
        /// Remote path.
        path: String,
    },
    /// Create a remote directory.
    Mkdir {
        /// Remote path.
        path: String,
    },
    /// Remove an empty remote directory.
    Rmdir {
        /// Remote path.
        path: String,
    },
    /// Print firmware identification.
    Version,
    /// Soft-reset the interpreter.
    Reset,
    /// Back up the whole device tree into a .tar.gz archive.
    Backup {
        /// Destination archive path.
        archive: PathBuf,
    },
    /// Restore a .tar.gz archive onto the device.
    Restore {
        /// Source archive path.
        archive: PathBuf,
        /// Delete device files that are absent from the archive
        /// (default: keep them).
        #[arg(long)]
        delete_remaining: bool,
    },
}

impl Cli {
    /// Board configuration derived from the global flags.
    pub fn board_config(&self) -> BoardConfig {
        let mut config = BoardConfig::with_baud_rate(self.baud);
        config.reset_on_connect = self.reset;
        config.use_raw_paste = !self.no_raw_paste;
        config
    }

    /// Exec timeout for the given subcommand, if any.
    pub fn exec_timeout(&self) -> Option<Duration> {
        match &self.command {
            Command::Exec { timeout, .. } | Command::Run { timeout, .. } => {
                timeout.map(Duration::from_secs)
            }
            _ => None,
        }
    }
}

/// Render worker events to stderr until the channel closes. Console output
/// goes to stdout verbatim.
pub fn render_events(events: crossbeam_channel::Receiver<BoardEvent>) {
    use std::io::Write;
    for event in events {
        match event {
            BoardEvent::Console(bytes) => {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(&bytes);
                let _ = stdout.flush();
            }
            BoardEvent::Progress { path, done, total } => {
                if total > 0 {
                    eprint!("\r{}: {}%", path, 100 * done / total);
                    if done == total {
                        eprintln!();
                    }
                }
            }
            BoardEvent::Status(msg) => eprintln!("{}", msg),
            BoardEvent::ConnectionLost(msg) => eprintln!("connection lost: {}", msg),
        }
    }
}

/// Print a sync summary in the fixed format shared by backup and restore.
pub fn print_summary(summary: &SyncSummary) {
    println!(
        "{} created, {} overwritten, {} unchanged, {} bytes",
        summary.created.len(),
        summary.overwritten.len(),
        summary.unchanged.len(),
        summary.bytes_transferred
    );
    for remaining in &summary.remaining {
        println!("remaining: {} ({:?})", remaining.path, remaining.disposition);
    }
    for failure in &summary.failures {
        eprintln!("failed: {}: {}", failure.path, failure.error);
    }
}

/// Install a Ctrl-C handler that interrupts the in-flight request instead
/// of killing the process.
pub fn install_interrupt_handler(handle: BoardHandle) {
    let _ = ctrlc::set_handler(move || {
        eprintln!("\ninterrupting...");
        handle.interrupt();
    });
}

/// Policy flag mapping for `restore`.
pub fn remaining_policy(delete_remaining: bool) -> RemainingPolicy {
    if delete_remaining {
        RemainingPolicy::Delete
    } else {
        RemainingPolicy::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exec_with_timeout() {
        let cli = Cli::parse_from(["mpboard", "-p", "/dev/ttyACM0", "exec", "print(1)", "-t", "5"]);
        assert_eq!(cli.exec_timeout(), Some(Duration::from_secs(5)));
        assert!(matches!(cli.command, Command::Exec { .. }));
    }

    #[test]
    fn test_restore_policy_flag() {
        let cli = Cli::parse_from(["mpboard", "-p", "p0", "restore", "b.tar.gz"]);
        match cli.command {
            Command::Restore {
                delete_remaining, ..
            } => assert!(!delete_remaining),
            _ => panic!("expected restore"),
        }
        assert_eq!(remaining_policy(false), RemainingPolicy::Keep);
        assert_eq!(remaining_policy(true), RemainingPolicy::Delete);
    }

    #[test]
    fn test_board_config_from_flags() {
        let cli = Cli::parse_from(["mpboard", "-p", "p0", "-b", "460800", "--no-raw-paste", "ls"]);
        let config = cli.board_config();
        assert_eq!(config.baud_rate, 460_800);
        assert!(!config.use_raw_paste);
    }
}
