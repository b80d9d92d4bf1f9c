use crate::command::{CommandFactory, ExecutableCommand, ExitCode, Session};
use crate::complete::PathCompleter;
use crate::config::ShellConfig;
use crate::editor::{LineEditor, ReadOutcome};
use crate::env::Environment;
use crate::exec::{self, Launcher, Outcome};
use crate::history::History;
use crate::parser::{self, ParseError, Pipeline};
use crate::scheduler::{DelayedCommand, Scheduler};
use anyhow::Context;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Factory allows creating instances of ExecutableCommand.
///
/// Only supports commands defined in this crate, see [`crate::builtin`].
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// The built-in commands: `cd`, `exit`, `history`, `delay`.
fn default_builtins() -> Vec<Box<dyn CommandFactory>> {
    use crate::builtin::*;
    vec![
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<History>::default()),
        Box::new(Factory::<Delay>::default()),
    ]
}

/// Routes one command line to a built-in or to the execution engine.
///
/// Each execution context (the prompt, the delayed-command worker) owns one dispatcher.
pub struct Dispatcher {
    session: Session,
    builtins: Vec<Box<dyn CommandFactory>>,
    launcher: Launcher,
}

impl Dispatcher {
    pub fn new(session: Session, launcher: Launcher) -> Self {
        Self {
            session,
            builtins: default_builtins(),
            launcher,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Execute a line, with built-in output on stdout and diagnostics on stderr.
    pub fn execute_line(&mut self, line: &str) -> ExitCode {
        // Unlocked handles: the other execution context may print meanwhile.
        self.execute_line_with(line, &mut io::stdout(), &mut io::stderr())
    }

    /// Execute a line. Errors are reported on `err` and never abort the caller.
    ///
    /// `delay` takes the rest of the line verbatim, so pipes, redirections and `&` belong
    /// to the delayed command. Everything else goes through the parser first.
    pub fn execute_line_with(
        &mut self,
        line: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> ExitCode {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.first() == Some(&"delay") {
            if let Some(cmd) = self.create_builtin("delay", &words[1..]) {
                return self.run_builtin("delay", cmd, out, err);
            }
        }

        let pipeline = match parser::parse(line) {
            Ok(pipeline) => pipeline,
            Err(ParseError::EmptyCommand) => return 0,
            Err(e) => {
                let _ = writeln!(err, "norseish: {}", e);
                return 1;
            }
        };

        if let Some(code) = self.try_builtin(&pipeline, out, err) {
            return code;
        }

        match self.launcher.run(&pipeline, &self.session.env, out, err) {
            Ok(Outcome::Finished { codes, not_started }) => {
                if not_started > 0 {
                    return 127;
                }
                codes.last().copied().flatten().unwrap_or(0)
            }
            Ok(Outcome::Detached { .. }) => 0,
            Err(e) => {
                let _ = writeln!(err, "norseish: {:#}", e);
                1
            }
        }
    }

    /// A single-stage pipeline naming a built-in runs in-process. Its output follows the
    /// stage's output redirection, if any.
    fn try_builtin(
        &mut self,
        pipeline: &Pipeline,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Option<ExitCode> {
        let [stage] = pipeline.stages.as_slice() else {
            return None;
        };
        let args: Vec<&str> = stage.argv[1..].iter().map(String::as_str).collect();
        let cmd = self.create_builtin(stage.program(), &args)?;

        let Some(redirect) = &stage.output else {
            return Some(self.run_builtin(stage.program(), cmd, out, err));
        };
        match exec::open_output(redirect) {
            Ok(mut file) => Some(self.run_builtin(stage.program(), cmd, &mut file, err)),
            Err(e) => {
                let _ = writeln!(err, "norseish: {}: {}", redirect.path.display(), e);
                Some(1)
            }
        }
    }

    fn create_builtin(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        self.builtins.iter().find_map(|f| f.try_create(name, args))
    }

    fn run_builtin(
        &mut self,
        name: &str,
        cmd: Box<dyn ExecutableCommand>,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> ExitCode {
        debug!("running builtin {}", name);
        let code = match cmd.execute(out, err, &mut self.session) {
            Ok(code) => code,
            Err(e) => {
                warn!("builtin {} failed to write its output: {}", name, e);
                1
            }
        };
        let _ = out.flush();
        code
    }

    pub fn should_exit(&self) -> bool {
        self.session.env.should_exit
    }
}

/// The interactive shell: line editor, history, dispatcher and delayed-command worker.
pub struct Interpreter {
    config: ShellConfig,
    history: Arc<Mutex<History>>,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
}

impl Interpreter {
    /// Build the shell and start its delayed-command worker.
    ///
    /// Fails only when the reap policy cannot be installed or the worker thread cannot
    /// be created.
    pub fn new(config: ShellConfig) -> anyhow::Result<Self> {
        let history = Arc::new(Mutex::new(History::new(config.history_capacity)));
        let mut scheduler = Scheduler::new(config.delay_capacity);
        let launcher =
            Launcher::new(config.reap_policy).context("cannot install the child reap policy")?;

        let session = Session {
            env: Environment::new(),
            history: Arc::clone(&history),
            scheduler: scheduler.handle(),
            history_display: config.history_display,
            interactive: true,
        };

        let mut worker = Dispatcher::new(
            Session {
                interactive: false,
                ..session.clone()
            },
            launcher.clone(),
        );
        scheduler
            .start(move |cmd: DelayedCommand| {
                worker.execute_line(&cmd.text);
            })
            .context("cannot start the delayed command worker")?;

        Ok(Self {
            config,
            history,
            dispatcher: Dispatcher::new(session, launcher),
            scheduler,
        })
    }

    /// Record `line` in the history and execute it.
    pub fn submit(&mut self, line: &str) -> ExitCode {
        if line.trim().is_empty() {
            return 0;
        }
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
        self.dispatcher.execute_line(line)
    }

    pub fn should_exit(&self) -> bool {
        self.dispatcher.should_exit()
    }

    /// Read-eval loop until `exit` or end of input. The delayed-command worker is shut
    /// down before returning; commands still pending are discarded.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        let completer = PathCompleter::new(&self.dispatcher.session().env);
        let editor = LineEditor::new(completer, self.config.line_capacity);

        while !self.should_exit() {
            let snapshot = self
                .history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .snapshot();

            match editor.read_line(&self.config.prompt, &snapshot) {
                Ok(ReadOutcome::Line(line)) => {
                    self.submit(&line);
                }
                Ok(ReadOutcome::Eof) => {
                    info!("end of input");
                    break;
                }
                Err(e) => {
                    warn!("reading input failed: {}", e);
                    break;
                }
            }
        }

        self.scheduler.shutdown();
        Ok(())
    }
}
