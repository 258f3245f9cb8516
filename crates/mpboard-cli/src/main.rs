//! `mpboard` binary entry point.

use clap::Parser;
use mpboard_cli::{
    install_interrupt_handler, print_summary, remaining_policy, render_events, Cli, Command,
};
use mpboard_core::{connect, scan, BoardError};
use std::io::Write;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mpboard={0},mpboard_core={0}", default)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), BoardError> {
    let config = cli.board_config();

    if matches!(cli.command, Command::Scan) {
        let found = scan(&config);
        if found.is_empty() {
            println!("no boards found");
        }
        for port in found {
            println!("{}", port.port_name);
        }
        return Ok(());
    }

    let port = cli
        .port
        .clone()
        .ok_or_else(|| BoardError::PortUnavailable("no port given (use --port)".into()))?;
    let board = connect(&port, config)?;

    // Events render on their own thread for the lifetime of the process.
    let events = board.events().clone();
    std::thread::spawn(move || render_events(events));
    install_interrupt_handler(board.handle());

    let timeout = cli.exec_timeout();
    let handle = board.handle();
    match cli.command {
        Command::Scan => unreachable!("handled above"),
        Command::Exec { code, .. } => {
            let output = handle.execute(code, timeout)?;
            std::io::stdout()
                .write_all(&output.stdout)
                .map_err(|e| BoardError::Archive(e.to_string()))?;
        }
        Command::Run { file, .. } => {
            let code = std::fs::read_to_string(&file)
                .map_err(|e| BoardError::Archive(format!("{}: {}", file.display(), e)))?;
            // Console output streams through the event renderer.
            handle.execute(code, timeout)?;
        }
        Command::Ls { path } => {
            for entry in handle.list_dir(path)? {
                match entry.kind {
                    mpboard_core::EntryKind::Directory => println!("{:>10}  {}/", "", entry.path),
                    mpboard_core::EntryKind::File => println!("{:>10}  {}", entry.size, entry.path),
                }
            }
        }
        Command::Get { remote, local } => {
            let data = handle.read_file(remote)?;
            std::fs::write(&local, data)
                .map_err(|e| BoardError::Archive(format!("{}: {}", local.display(), e)))?;
        }
        Command::Put { local, remote } => {
            let data = std::fs::read(&local)
                .map_err(|e| BoardError::Archive(format!("{}: {}", local.display(), e)))?;
            handle.write_file(remote, data)?;
        }
        Command::Rm { path } => handle.delete(path)?,
        Command::Mkdir { path } => handle.mkdir(path)?,
        Command::Rmdir { path } => handle.rmdir(path)?,
        Command::Version => {
            let v = handle.version()?;
            println!("{} {} {} ({})", v.sysname, v.release, v.version, v.machine);
        }
        Command::Reset => handle.soft_reset()?,
        Command::Backup { archive } => {
            let summary = handle.backup(archive)?;
            print_summary(&summary);
        }
        Command::Restore {
            archive,
            delete_remaining,
        } => {
            let summary = handle.restore(archive, remaining_policy(delete_remaining))?;
            print_summary(&summary);
        }
    }

    board.close();
    Ok(())
}
