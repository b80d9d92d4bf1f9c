use crate::env::Environment;
use crate::history::History;
use crate::scheduler::SchedulerHandle;
use anyhow::Result;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// Shell state a built-in may read or change.
///
/// The interactive loop and the delayed-command worker each hold a `Session`. The history
/// and the scheduler are shared between them; the environment is per session.
#[derive(Debug, Clone)]
pub struct Session {
    pub env: Environment,
    pub history: Arc<Mutex<History>>,
    pub scheduler: SchedulerHandle,
    /// Entries shown by `history` without an explicit count.
    pub history_display: usize,
    /// False for commands run by the delayed-command worker.
    pub interactive: bool,
}

/// Object-safe trait for any command that runs inside the shell process.
pub trait ExecutableCommand {
    /// Executes the command. Regular output goes to `out`, diagnostics to `err`.
    fn execute(
        self: Box<Self>,
        out: &mut dyn Write,
        err: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory: Send {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
