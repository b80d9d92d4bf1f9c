//! Execution engine: turns a parsed [`Pipeline`] into running processes.

use crate::env::Environment;
use crate::external::{find_command_path, is_executable};
use crate::parser::{CommandStage, OutputRedirect, Pipeline};
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::{CString, NulError, OsString};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// How the shell collects terminated children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReapPolicy {
    /// Default SIGCHLD disposition; every child is waited for explicitly.
    #[default]
    Synchronous,
    /// SIGCHLD ignored with `SA_NOCLDSTOP`: the kernel reaps children on exit, so
    /// background processes never linger as zombies.
    Detached,
}

/// What happened to a launched pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Foreground: every started stage ran to completion. `codes` holds one exit code per
    /// started stage, `None` when it was killed by a signal or reaped by the kernel.
    Finished {
        codes: Vec<Option<i32>>,
        not_started: usize,
    },
    /// Background: the started stages were left running.
    Detached { pids: Vec<u32>, not_started: usize },
}

/// Why a single stage could not be started.
#[derive(Debug)]
enum LaunchError {
    NotFound,
    NotExecutable,
    NulByte,
    Redirect(PathBuf, io::Error),
    Fork(Errno),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::NotFound => write!(f, "command not found"),
            LaunchError::NotExecutable => write!(f, "permission denied"),
            LaunchError::NulByte => write!(f, "argument contains a NUL byte"),
            LaunchError::Redirect(path, e) => write!(f, "{}: {}", path.display(), e),
            LaunchError::Fork(e) => write!(f, "fork failed: {}", e.desc()),
        }
    }
}

impl From<NulError> for LaunchError {
    fn from(_: NulError) -> Self {
        LaunchError::NulByte
    }
}

/// Launches pipelines and owns the process-wide reap policy.
///
/// Clones share the policy, so the interactive loop and the delayed-command worker see
/// the same disposition.
#[derive(Debug, Clone)]
pub struct Launcher {
    policy: Arc<Mutex<ReapPolicy>>,
}

impl Launcher {
    /// Create a launcher, installing `policy` right away when it is not the default.
    pub fn new(policy: ReapPolicy) -> nix::Result<Self> {
        let launcher = Self {
            policy: Arc::new(Mutex::new(ReapPolicy::Synchronous)),
        };
        if policy == ReapPolicy::Detached {
            launcher.detach_children()?;
        }
        Ok(launcher)
    }

    pub fn policy(&self) -> ReapPolicy {
        *self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch to [`ReapPolicy::Detached`]. Once detached the shell stays detached.
    pub fn detach_children(&self) -> nix::Result<()> {
        let mut policy = self.policy.lock().unwrap_or_else(PoisonError::into_inner);
        if *policy == ReapPolicy::Detached {
            return Ok(());
        }
        let action = SigAction::new(SigHandler::SigIgn, SaFlags::SA_NOCLDSTOP, SigSet::empty());
        // SAFETY: installs SIG_IGN, no handler code runs.
        unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
        *policy = ReapPolicy::Detached;
        info!("SIGCHLD ignored, children are reaped by the kernel");
        Ok(())
    }

    /// Run a pipeline with the shell's standard streams at its ends.
    ///
    /// One pipe is created per adjacent pair of stages before anything is forked. A stage
    /// that cannot be started is reported on `err` and skipped; the others still run.
    /// Only a failure to create the pipes aborts the whole pipeline. Background process
    /// ids are announced on `out`.
    pub fn run(
        &self,
        pipeline: &Pipeline,
        env: &Environment,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<Outcome> {
        if pipeline.background {
            if let Err(e) = self.detach_children() {
                warn!("cannot detach children: {}", e);
            }
        }

        let n = pipeline.stages.len();
        let mut readers: Vec<Option<OwnedFd>> = Vec::with_capacity(n);
        let mut writers: Vec<Option<OwnedFd>> = Vec::with_capacity(n);
        readers.push(None);
        for _ in 1..n {
            let (read, write) =
                unistd::pipe2(OFlag::O_CLOEXEC).context("cannot create pipe")?;
            readers.push(Some(read));
            writers.push(Some(write));
        }
        writers.push(None);
        debug!("pipeline of {} stages, {} pipes", n, n.saturating_sub(1));

        let search_path = env.search_path().unwrap_or_default();
        let envp = child_environment(env);
        let mut children: Vec<Pid> = Vec::with_capacity(n);
        let mut not_started = 0;

        for (i, stage) in pipeline.stages.iter().enumerate() {
            let stdin = readers[i].take();
            let stdout = writers[i].take();

            match spawn_stage(stage, stdin, stdout, &search_path, &envp) {
                Ok(pid) => {
                    debug!("spawned {:?} as pid {}", stage.program(), pid);
                    children.push(pid);
                }
                Err(e) => {
                    let _ = writeln!(err, "norseish: {}: {}", stage.program(), e);
                    not_started += 1;
                }
            }
        }
        drop(readers);
        drop(writers);

        if pipeline.background {
            let pids: Vec<u32> = children
                .iter()
                .map(|pid| pid.as_raw().unsigned_abs())
                .collect();
            for pid in &pids {
                writeln!(out, "[Background] Process ID: {}", pid)?;
            }
            out.flush()?;
            return Ok(Outcome::Detached { pids, not_started });
        }

        let codes = children.into_iter().map(wait_child).collect();
        Ok(Outcome::Finished { codes, not_started })
    }
}

/// The shell's environment with the session overrides applied, as `KEY=value` strings.
/// Entries that cannot be represented are left out.
fn child_environment(env: &Environment) -> Vec<CString> {
    let mut merged: Vec<(OsString, OsString)> = std::env::vars_os()
        .filter(|(key, _)| key.to_str().is_none_or(|k| !env.vars.contains_key(k)))
        .collect();
    merged.extend(env.vars.iter().map(|(k, v)| (k.into(), v.into())));

    merged
        .into_iter()
        .filter_map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            CString::new(entry).ok()
        })
        .collect()
}

/// Everything the child touches between `fork` and `execve`, allocated beforehand.
struct ExecImage<'a> {
    path: CString,
    argv: Vec<CString>,
    envp: &'a [CString],
    failure_prefix: Vec<u8>,
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Fork one stage. `stdin`/`stdout` are pipe ends; `None` means the stage sits at that
/// end of the pipeline and uses its redirection or inherits the shell's stream.
fn spawn_stage(
    stage: &CommandStage,
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    search_path: &std::ffi::OsStr,
    envp: &[CString],
) -> Result<Pid, LaunchError> {
    let program = resolve_program(search_path, stage.program())?;

    let stdin = match (stdin, &stage.input) {
        (Some(pipe), _) => Some(pipe),
        (None, Some(path)) => Some(
            File::open(path)
                .map(OwnedFd::from)
                .map_err(|e| LaunchError::Redirect(path.clone(), e))?,
        ),
        (None, None) => None,
    };
    let stdout = match (stdout, &stage.output) {
        (Some(pipe), _) => Some(pipe),
        (None, Some(redirect)) => Some(
            open_output(redirect)
                .map(OwnedFd::from)
                .map_err(|e| LaunchError::Redirect(redirect.path.clone(), e))?,
        ),
        (None, None) => None,
    };

    let image = ExecImage {
        path: CString::new(program.into_os_string().into_vec())?,
        argv: stage
            .argv
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<Vec<_>, NulError>>()?,
        envp,
        failure_prefix: format!("norseish: {}: ", stage.program()).into_bytes(),
    };
    let argv = null_terminated(&image.argv);
    let envp = null_terminated(image.envp);
    let redirects = [
        (stdin.as_ref().map(AsRawFd::as_raw_fd), libc::STDIN_FILENO),
        (stdout.as_ref().map(AsRawFd::as_raw_fd), libc::STDOUT_FILENO),
    ];

    // SAFETY: the child only makes async-signal-safe calls before execve or _exit.
    match unsafe { unistd::fork() }.map_err(LaunchError::Fork)? {
        ForkResult::Child => exec_child(&image, &argv, &envp, &redirects),
        // The parent's copies of the stage's descriptors close when this returns.
        ForkResult::Parent { child } => Ok(child),
    }
}

/// Body of the forked child. An exec failure is reported on stderr and ends the child
/// with 127 (not found) or 126, leaving the shell untouched.
fn exec_child(
    image: &ExecImage<'_>,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
    redirects: &[(Option<RawFd>, RawFd)],
) -> ! {
    let mut ready = restore_child_signals().is_ok();
    for &(fd, target) in redirects {
        if let Some(fd) = fd {
            // SAFETY: both descriptors are valid in the child; dup2 clears FD_CLOEXEC.
            ready = ready && unsafe { libc::dup2(fd, target) } != -1;
        }
    }
    if ready {
        // SAFETY: every pointer array is null-terminated and outlives the call.
        unsafe { libc::execve(image.path.as_ptr(), argv.as_ptr(), envp.as_ptr()) };
    }

    let errno = Errno::last();
    for part in [&image.failure_prefix[..], errno.desc().as_bytes(), &b"\n"[..]] {
        // SAFETY: writes a live buffer to the inherited stderr.
        unsafe { libc::write(libc::STDERR_FILENO, part.as_ptr().cast(), part.len()) };
    }
    let code = if errno == Errno::ENOENT { 127 } else { 126 };
    // SAFETY: ends the child without running the parent's exit handlers.
    unsafe { libc::_exit(code) }
}

/// Resolve a program name before forking so a missing binary is reported by the shell.
fn resolve_program(search_path: &std::ffi::OsStr, name: &str) -> Result<PathBuf, LaunchError> {
    let path = find_command_path(search_path, Path::new(name))
        .ok_or(LaunchError::NotFound)?
        .into_owned();
    if !is_executable(&path) {
        return Err(LaunchError::NotExecutable);
    }
    Ok(path)
}

/// Open the target of `>` (truncate) or `>>` (append), creating it with mode 0644.
pub fn open_output(redirect: &OutputRedirect) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).mode(0o644);
    if redirect.append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    options.open(&redirect.path)
}

/// Children must not inherit the shell's ignored signals.
fn restore_child_signals() -> nix::Result<()> {
    for sig in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTSTP,
        Signal::SIGCHLD,
    ] {
        // SAFETY: resets to the default disposition; no handler is installed.
        unsafe { signal::signal(sig, SigHandler::SigDfl) }?;
    }
    Ok(())
}

fn wait_child(pid: Pid) -> Option<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                debug!("pid {} exited with {}", pid, code);
                return Some(code);
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                debug!("pid {} killed by {:?}", pid, sig);
                return None;
            }
            Ok(status) => debug!("pid {} reported {:?}", pid, status),
            Err(Errno::EINTR) => {}
            // SIGCHLD is ignored: the kernel reaped the child once it exited.
            Err(Errno::ECHILD) => {
                debug!("pid {} reaped by the kernel", pid);
                return None;
            }
            Err(e) => {
                warn!("waiting for pid {} failed: {}", pid, e);
                return None;
            }
        }
    }
}
