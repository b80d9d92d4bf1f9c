//! An interactive command shell with a raw-mode line editor, pipelines, redirections,
//! background jobs and delayed commands.
//!
//! The main entry point is [`Interpreter`], which reads lines with the [`editor`],
//! parses them with the [`parser`] and hands them to the execution engine in [`exec`]
//! or to one of the built-ins (`cd`, `exit`, `history`, `delay`). Delayed commands are
//! queued in the [`scheduler`] and run by a dedicated worker thread.

mod builtin;
pub mod command;
pub mod complete;
pub mod config;
pub mod editor;
pub mod env;
pub mod exec;
mod expand;
mod external;
pub mod history;
mod interpreter;
mod lexer;
pub mod parser;
pub mod scheduler;
pub mod terminal;

/// Just a convenient re-export of the interactive shell and its configuration.
///
/// See [`Interpreter`] for the high-level API.
pub use config::ShellConfig;
pub use interpreter::{Dispatcher, Interpreter};
