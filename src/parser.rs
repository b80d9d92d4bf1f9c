//! Turns a command line into a [`Pipeline`] of [`CommandStage`]s.
//!
//! The grammar is flat: words, `|` between stages, `<`, `>` and `>>` followed by a file
//! name, and an optional trailing `&`. There are no variables, subshells or control flow.

use crate::expand;
use crate::lexer::{self, Token};
use std::fmt;
use std::path::PathBuf;

/// Where a stage's standard output goes when redirected to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRedirect {
    pub path: PathBuf,
    /// `>>` appends; `>` truncates.
    pub append: bool,
}

/// One command within a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandStage {
    /// Program name followed by its arguments. Never empty in a parsed pipeline.
    pub argv: Vec<String>,
    /// File read as standard input (`<`).
    pub input: Option<PathBuf>,
    /// File receiving standard output (`>` or `>>`).
    pub output: Option<OutputRedirect>,
}

impl CommandStage {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}

/// A parsed command line.
///
/// Only the first stage may carry an input redirection and only the last one an output
/// redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<CommandStage>,
    /// Trailing `&`: launch detached and return to the prompt.
    pub background: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Input,
    Output,
}

/// Reasons a line cannot be turned into a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Nothing to run: blank line, only quotes, or a lone `&`.
    EmptyCommand,
    /// A stage between pipes has no program name (`ls | | wc`).
    EmptyStage { index: usize },
    /// A redirection points at a pipe end (`a | b < f`, `a > f | b`).
    MisplacedRedirect { stage: usize, kind: RedirectKind },
    /// Memory could not be reserved while expanding arguments.
    OutOfMemory,
    /// The wildcard expander failed reading the filesystem.
    Glob(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::EmptyCommand => write!(f, "empty command"),
            ParseError::EmptyStage { index } => {
                write!(f, "syntax error: command {} of the pipeline is empty", index + 1)
            }
            ParseError::MisplacedRedirect { stage, kind } => match kind {
                RedirectKind::Input => write!(
                    f,
                    "input redirection on command {} rejected: \
                     it reads the previous command's output",
                    stage + 1
                ),
                RedirectKind::Output => write!(
                    f,
                    "output redirection on command {} rejected: \
                     its output feeds the next command",
                    stage + 1
                ),
            },
            ParseError::OutOfMemory => write!(f, "out of memory while expanding arguments"),
            ParseError::Glob(msg) => write!(f, "wildcard expansion failed: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Incrementally builds a stage from its tokens.
#[derive(Default)]
struct StageBuilder {
    stage: CommandStage,
    pending: Option<Token>,
}

impl StageBuilder {
    fn push(&mut self, token: Token) {
        match token {
            Token::Word(word) => match self.pending.take() {
                Some(Token::RedirectIn) => {
                    if self.stage.input.is_none() {
                        self.stage.input = Some(PathBuf::from(word));
                    }
                }
                Some(op @ (Token::RedirectOut | Token::RedirectAppend)) => {
                    if self.stage.output.is_none() {
                        self.stage.output = Some(OutputRedirect {
                            path: PathBuf::from(word),
                            append: op == Token::RedirectAppend,
                        });
                    }
                }
                _ => self.stage.argv.push(word),
            },
            // An operator directly after another loses its operand.
            op => self.pending = Some(op),
        }
    }

    fn finish(self) -> CommandStage {
        self.stage
    }
}

/// Parse a command line.
///
/// Steps: tokenize (quotes stripped, operators split off), detect a trailing `&`, split on
/// `|`, pull redirections out of each stage, then expand wildcards in every argument.
/// A redirection with no file name after it is ignored.
pub fn parse(line: &str) -> Result<Pipeline, ParseError> {
    let mut tokens = lexer::split_into_tokens(line);

    let background = matches!(tokens.last(), Some(Token::Word(w)) if w == "&");
    if background {
        tokens.pop();
    }
    if tokens.is_empty() {
        return Err(ParseError::EmptyCommand);
    }

    let mut builders = vec![StageBuilder::default()];
    for token in tokens {
        if token == Token::PipeOp {
            builders.push(StageBuilder::default());
        } else if let Some(current) = builders.last_mut() {
            current.push(token);
        }
    }

    let last = builders.len() - 1;
    let mut stages = Vec::with_capacity(builders.len());
    for (index, builder) in builders.into_iter().enumerate() {
        let mut stage = builder.finish();
        if stage.argv.is_empty() {
            return Err(if last == 0 {
                ParseError::EmptyCommand
            } else {
                ParseError::EmptyStage { index }
            });
        }
        if index != 0 && stage.input.is_some() {
            return Err(ParseError::MisplacedRedirect {
                stage: index,
                kind: RedirectKind::Input,
            });
        }
        if index != last && stage.output.is_some() {
            return Err(ParseError::MisplacedRedirect {
                stage: index,
                kind: RedirectKind::Output,
            });
        }
        stage.argv = expand::expand_args(std::mem::take(&mut stage.argv))?;
        stages.push(stage);
    }

    Ok(Pipeline { stages, background })
}
