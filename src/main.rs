//! fifoexec — command execution over a named pipe

use clap::Parser;
use fifoexec::{Cli, Client, Command, Outcome, Server, launch};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("fifoexec=debug")
    } else {
        EnvFilter::new("fifoexec=info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Server { log_file } => run_server(cli.fifo, log_file),
        Command::Send { commands } => run_send(cli.fifo, &commands),
        Command::Doctor { log_file } => run_doctor(cli.fifo, &log_file),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run_server(fifo_path: PathBuf, log_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::new(fifo_path, log_path);
    server.run()?;
    Ok(())
}

fn run_send(fifo_path: PathBuf, commands: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(fifo_path);
    client.send(commands)?;

    println!("Sent {} command(s):", commands.len());
    for (i, command) in commands.iter().enumerate() {
        println!("  {}: {command}", i + 1);
    }
    Ok(())
}

fn run_doctor(fifo_path: PathBuf, log_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut all_ok = true;

    // 1. Check channel path
    print!("Channel {}: ", fifo_path.display());
    let fifo_exists = match std::fs::symlink_metadata(&fifo_path) {
        Ok(metadata) if metadata.file_type().is_fifo() => {
            println!("[OK]");
            true
        }
        Ok(_) => {
            println!("[FAIL] path exists but is not a fifo");
            all_ok = false;
            false
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("[WARN] not created yet (server never started?)");
            false
        }
        Err(e) => {
            println!("[FAIL] {e}");
            all_ok = false;
            false
        }
    };

    // 2. Check for an attached server
    print!("Server attached: ");
    if !fifo_exists {
        println!("[WARN] skipped");
    } else if Client::new(fifo_path).is_server_attached() {
        println!("[OK]");
    } else {
        println!("[WARN] no server is reading the channel");
    }

    // 3. Check log directory
    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    print!("Log directory {}: ", log_dir.display());
    if log_dir.is_dir() {
        if log_dir.metadata()?.permissions().readonly() {
            println!("[FAIL] directory not writable");
            all_ok = false;
        } else {
            println!("[OK]");
        }
    } else if log_dir.exists() {
        println!("[FAIL] path exists but is not a directory");
        all_ok = false;
    } else {
        println!("[WARN] missing, will be created on server start");
    }

    // 4. Check the launcher
    print!("Launcher: ");
    match launch("true").map(fifoexec::Child::wait) {
        Ok(Ok(Outcome::Exited(0))) => println!("[OK]"),
        Ok(Ok(outcome)) => {
            println!("[FAIL] `true` finished with {outcome}");
            all_ok = false;
        }
        Ok(Err(e)) => {
            println!("[FAIL] {e}");
            all_ok = false;
        }
        Err(e) => {
            println!("[FAIL] {e}");
            all_ok = false;
        }
    }

    // Summary
    println!();
    if all_ok {
        println!("All checks passed!");
        Ok(())
    } else {
        Err("Some checks failed".into())
    }
}
