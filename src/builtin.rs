use crate::command::{CommandFactory, ExecutableCommand, ExitCode, Session};
use crate::interpreter::Factory;
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::sync::PoisonError;
use std::time::{Duration, Instant};
use tracing::debug;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "cd" or "delay".
    fn name() -> &'static str;

    /// When true, arguments starting with `-` are operands rather than options
    /// (`--help` still prints usage).
    const RAW_ARGS: bool = false;

    /// Executes the command, writing its output to `out`.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, out: &mut dyn Write, session: &mut Session) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        out: &mut dyn Write,
        err: &mut dyn Write,
        session: &mut Session,
    ) -> Result<ExitCode> {
        match T::execute(*self, out, session) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(err, "norseish: {:#}", e)?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        out: &mut dyn Write,
        err: &mut dyn Write,
        _session: &mut Session,
    ) -> Result<ExitCode> {
        if self.is_error {
            writeln!(err, "{}", self.output.trim_end())?;
            Ok(1)
        } else {
            writeln!(out, "{}", self.output.trim_end())?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() {
            return None;
        }

        let mut argv: Vec<&str> = Vec::with_capacity(args.len() + 1);
        if T::RAW_ARGS && args.first() != Some(&"--help") {
            argv.push("--");
        }
        argv.extend_from_slice(args);

        Some(match T::from_args(&[name], &argv) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

#[derive(FromArgs)]
/// Change the current working directory of the shell.
/// `~` expands to $HOME; `~suffix` is $HOME followed directly by the suffix.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute, relative, or starting with `~`.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _out: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        let Some(target) = self.target else {
            bail!("cd: missing argument");
        };

        let path = match target.strip_prefix('~') {
            Some(suffix) => {
                let home = session
                    .env
                    .home()
                    .ok_or_else(|| anyhow!("cd: HOME is not set"))?;
                let mut joined = OsString::from(home);
                joined.push(suffix);
                PathBuf::from(joined)
            }
            None => PathBuf::from(target),
        };

        std::env::set_current_dir(&path)
            .with_context(|| format!("cd: {}", path.display()))?;
        debug!("working directory is now {}", path.display());
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Leave the shell. Pending delayed commands are discarded.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored.
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _out: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        if !session.interactive {
            bail!("exit: not available in a delayed command");
        }
        session.env.should_exit = true;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Show the most recently entered command lines, oldest first.
pub struct History {
    #[argh(positional)]
    /// how many entries to show (default 10).
    pub count: Option<usize>,
}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn execute(self, out: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        let count = self.count.unwrap_or(session.history_display);
        let history = session
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        history.display(count, out)?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Run a command line after the given number of seconds without blocking the prompt.
/// Example: delay 10 echo done
pub struct Delay {
    #[argh(positional, greedy)]
    /// whole seconds to wait, then the command line to run with any pipes, redirections
    /// or trailing `&`.
    pub words: Vec<String>,
}

impl BuiltinCommand for Delay {
    fn name() -> &'static str {
        "delay"
    }

    const RAW_ARGS: bool = true;

    fn execute(self, _out: &mut dyn Write, session: &mut Session) -> Result<ExitCode> {
        let Some((seconds, command)) = self.words.split_first().filter(|(_, c)| !c.is_empty())
        else {
            bail!("usage: delay <seconds> <command>");
        };

        let at = seconds
            .parse::<u64>()
            .ok()
            .filter(|&s| s > 0)
            .and_then(|s| Instant::now().checked_add(Duration::from_secs(s)))
            .ok_or_else(|| anyhow!("delay: invalid number of seconds: {}", seconds))?;

        let text = command.join(" ");
        session.scheduler.schedule(at, text).context("delay")?;
        Ok(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::history::History as HistoryStore;
    use crate::scheduler::Scheduler;
    use std::env as stdenv;
    use std::fs;
    use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Serializes tests that change the process working directory.
    pub(crate) fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn make_unique_temp_dir() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = stdenv::temp_dir().join(format!("builtin_test_{}_{}", std::process::id(), nanos));
        fs::create_dir_all(&p).unwrap();
        p
    }

    fn session(scheduler: &Scheduler) -> Session {
        Session {
            env: Environment::new(),
            history: Arc::new(Mutex::new(HistoryStore::new(100))),
            scheduler: scheduler.handle(),
            history_display: 10,
            interactive: true,
        }
    }

    /// Runs `name args..` through the factory like the dispatcher does.
    fn run<T: BuiltinCommand + 'static>(
        session: &mut Session,
        name: &str,
        args: &[&str],
    ) -> (ExitCode, String, String) {
        let cmd = Factory::<T>::default()
            .try_create(name, args)
            .expect("factory should accept its own name");
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = cmd.execute(&mut out, &mut err, session).unwrap();
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_factory_ignores_other_names() {
        assert!(Factory::<Cd>::default().try_create("ls", &[]).is_none());
        assert!(Factory::<Delay>::default().try_create("cd", &["x"]).is_none());
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let scheduler = Scheduler::new(1);
        let mut session = session(&scheduler);
        let temp = make_unique_temp_dir();
        let canonical_temp = fs::canonicalize(&temp).unwrap();
        let orig = stdenv::current_dir().unwrap();

        let (code, _, err) = run::<Cd>(&mut session, "cd", &[canonical_temp.to_str().unwrap()]);

        assert_eq!(code, 0, "stderr: {}", err);
        assert_eq!(fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(), canonical_temp);

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cd_tilde_uses_home() {
        let _lock = lock_current_dir();
        let scheduler = Scheduler::new(1);
        let mut session = session(&scheduler);
        let temp = make_unique_temp_dir();
        let canonical_temp = fs::canonicalize(&temp).unwrap();
        fs::create_dir(canonical_temp.join("sub")).unwrap();
        let orig = stdenv::current_dir().unwrap();

        session
            .env
            .set_var("HOME", canonical_temp.to_string_lossy().to_string());

        let (code, _, _) = run::<Cd>(&mut session, "cd", &["~"]);
        assert_eq!(code, 0);
        assert_eq!(fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(), canonical_temp);

        // `~suffix` is a plain concatenation with HOME.
        let (code, _, _) = run::<Cd>(&mut session, "cd", &["~/sub"]);
        assert_eq!(code, 0);
        assert_eq!(
            fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(),
            canonical_temp.join("sub")
        );

        stdenv::set_current_dir(orig).expect("failed to restore cwd");
        let _ = fs::remove_dir_all(&temp);
    }

    #[test]
    fn test_cd_without_argument_reports_and_stays() {
        let _lock = lock_current_dir();
        let scheduler = Scheduler::new(1);
        let mut session = session(&scheduler);
        let orig = stdenv::current_dir().unwrap();

        let (code, _, err) = run::<Cd>(&mut session, "cd", &[]);

        assert_eq!(code, 1);
        assert_eq!(err, "norseish: cd: missing argument\n");
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_cd_nonexistent_path_errors() {
        let _lock = lock_current_dir();
        let scheduler = Scheduler::new(1);
        let mut session = session(&scheduler);
        let orig = stdenv::current_dir().unwrap();

        let name = format!("/nonexistent_dir_for_norseish_test_{}", std::process::id());
        let (code, _, err) = run::<Cd>(&mut session, "cd", &[name.as_str()]);

        assert_eq!(code, 1);
        assert!(err.starts_with(&format!("norseish: cd: {}", name)), "{}", err);
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_exit_sets_flag_only_interactively() {
        let scheduler = Scheduler::new(1);
        let mut session = session(&scheduler);

        let (code, _, _) = run::<Exit>(&mut session, "exit", &[]);
        assert_eq!(code, 0);
        assert!(session.env.should_exit);

        let mut delayed = Session {
            interactive: false,
            ..session.clone()
        };
        delayed.env.should_exit = false;
        let (code, _, err) = run::<Exit>(&mut delayed, "exit", &[]);
        assert_eq!(code, 1);
        assert!(err.contains("delayed"));
        assert!(!delayed.env.should_exit);
    }

    #[test]
    fn test_history_default_and_explicit_count() {
        let scheduler = Scheduler::new(1);
        let mut session = session(&scheduler);
        {
            let mut history = session.history.lock().unwrap();
            for i in 1..=12 {
                history.push(format!("cmd{}", i));
            }
        }

        let (code, out, _) = run::<History>(&mut session, "history", &[]);
        assert_eq!(code, 0);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "  3  cmd3");
        assert_eq!(lines[9], "  12  cmd12");

        let (_, out, _) = run::<History>(&mut session, "history", &["2"]);
        assert_eq!(out, "  11  cmd11\n  12  cmd12\n");
    }

    #[test]
    fn test_history_rejects_non_numeric_count() {
        let scheduler = Scheduler::new(1);
        let mut session = session(&scheduler);
        let (code, out, err) = run::<History>(&mut session, "history", &["lots"]);
        assert_eq!(code, 1);
        assert!(out.is_empty());
        assert!(!err.is_empty());
    }

    #[test]
    fn test_delay_enqueues_command_text() {
        // Not started: entries stay in the queue.
        let scheduler = Scheduler::new(4);
        let mut session = session(&scheduler);

        let args = ["5", "ls", "-l", "|", "wc", "&"];
        let (code, _, err) = run::<Delay>(&mut session, "delay", &args);
        assert_eq!(code, 0, "stderr: {}", err);
        assert_eq!(session.scheduler.pending(), 1);
    }

    #[test]
    fn test_delay_validation() {
        let scheduler = Scheduler::new(4);
        let mut session = session(&scheduler);

        let (code, _, err) = run::<Delay>(&mut session, "delay", &["5"]);
        assert_eq!(code, 1);
        assert_eq!(err, "norseish: usage: delay <seconds> <command>\n");

        let (code, _, err) = run::<Delay>(&mut session, "delay", &[]);
        assert_eq!(code, 1);
        assert!(err.contains("usage"));

        for bad in ["0", "-3", "soon"] {
            let (code, _, err) = run::<Delay>(&mut session, "delay", &[bad, "echo", "x"]);
            assert_eq!(code, 1, "{}", bad);
            assert!(err.contains("invalid number of seconds"), "{}", err);
        }
        assert_eq!(session.scheduler.pending(), 0);
    }

    #[test]
    fn test_delay_reports_full_queue() {
        let scheduler = Scheduler::new(1);
        let mut session = session(&scheduler);

        assert_eq!(run::<Delay>(&mut session, "delay", &["60", "true"]).0, 0);
        let (code, _, err) = run::<Delay>(&mut session, "delay", &["60", "true"]);
        assert_eq!(code, 1);
        assert!(err.contains("full"), "{}", err);
        assert_eq!(session.scheduler.pending(), 1);
    }

    #[test]
    fn test_help_is_printed_to_out() {
        let scheduler = Scheduler::new(1);
        let mut session = session(&scheduler);
        let (code, out, _) = run::<Delay>(&mut session, "delay", &["--help"]);
        assert_eq!(code, 0);
        assert!(out.contains("Usage: delay"));
    }
}
