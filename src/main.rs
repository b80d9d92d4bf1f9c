use anyhow::{Context, Result};
use nix::sys::signal::{self, SigHandler, Signal};
use norseish::{Interpreter, ShellConfig};
use tracing_subscriber::EnvFilter;

/// The shell itself must survive Ctrl+C, Ctrl+\ and Ctrl+Z aimed at its children.
fn ignore_job_control_signals() -> Result<()> {
    for sig in [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTSTP] {
        // SAFETY: installs SIG_IGN, no handler code runs.
        unsafe { signal::signal(sig, SigHandler::SigIgn) }
            .with_context(|| format!("cannot ignore {}", sig))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_env("NORSEISH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    ignore_job_control_signals()?;

    println!("Welcome to norseish! Type 'exit' or press Ctrl+D to leave.");
    let mut shell = Interpreter::new(ShellConfig::default())?;
    shell.repl()?;
    println!("Thank you for using norseish!");
    Ok(())
}
