//! Tab-completion candidates: filesystem entries and executables on the search path.

use crate::env::Environment;
use crate::external::{is_executable, search_dirs};
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Candidates for the word ending at the cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completions {
    /// Byte offset in the buffer where the completed word begins.
    pub word_start: usize,
    /// Replacement texts for that word, in presentation order.
    pub candidates: Vec<String>,
}

impl Completions {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Source of completion candidates for the line editor.
pub trait Completer {
    /// Produce candidates for `buffer` with the cursor at byte offset `cursor`.
    fn complete(&self, buffer: &str, cursor: usize) -> Completions;
}

/// Completes paths relative to a base directory, and program names from the search path
/// when the word is in command position.
///
/// Directory entries come first, sorted by name, with a trailing `/` on directories.
/// Executables follow, directory by directory in search-path order, each directory's
/// names sorted; a name already offered is not repeated.
#[derive(Debug, Clone)]
pub struct PathCompleter {
    base: PathBuf,
    search_path: Option<OsString>,
}

impl PathCompleter {
    /// Complete against the current directory and the environment's PATH.
    pub fn new(env: &Environment) -> Self {
        Self {
            base: PathBuf::from("."),
            search_path: env.search_path(),
        }
    }

    pub fn with_search_path(base: impl Into<PathBuf>, search_path: Option<OsString>) -> Self {
        Self {
            base: base.into(),
            search_path,
        }
    }

    fn directory_candidates(&self, word: &str) -> Vec<String> {
        let (dir_text, display_dir, fragment) = match word.rfind('/') {
            Some(i) => {
                let dir = if i == 0 { "/" } else { &word[..i] };
                (dir, &word[..=i], &word[i + 1..])
            }
            None => (".", "", word),
        };

        let dir = self.base.join(dir_text);
        let mut names: Vec<(String, bool)> = match fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let name = e.file_name().into_string().ok()?;
                    let is_dir = e.path().is_dir();
                    Some((name, is_dir))
                })
                .filter(|(name, _)| name != "." && name != ".." && name.starts_with(fragment))
                .collect(),
            Err(e) => {
                debug!("completion: cannot read {}: {}", dir.display(), e);
                Vec::new()
            }
        };
        names.sort();

        names
            .into_iter()
            .map(|(name, is_dir)| {
                let mut candidate = format!("{}{}", display_dir, name);
                if is_dir {
                    candidate.push('/');
                }
                candidate
            })
            .collect()
    }

    fn executable_candidates(&self, fragment: &str, seen: &mut HashSet<String>) -> Vec<String> {
        let Some(search_path) = &self.search_path else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for dir in search_dirs(search_path) {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.starts_with(fragment))
                .filter(|name| is_executable(&dir.join(name)))
                .collect();
            names.sort();
            for name in names {
                if seen.insert(name.clone()) {
                    out.push(name);
                }
            }
        }
        out
    }
}

impl Completer for PathCompleter {
    fn complete(&self, buffer: &str, cursor: usize) -> Completions {
        let prefix = &buffer[..floor_char_boundary(buffer, cursor)];
        let word_start = prefix
            .char_indices()
            .rev()
            .find(|(_, c)| is_word_separator(*c))
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        let word = &prefix[word_start..];

        let mut candidates = self.directory_candidates(word);

        if !word.contains('/') && is_command_position(&prefix[..word_start]) {
            let mut seen: HashSet<String> = candidates.iter().cloned().collect();
            let executables = self.executable_candidates(word, &mut seen);
            candidates.extend(executables);
        }

        debug!("completion for {:?}: {} candidates", word, candidates.len());
        Completions {
            word_start,
            candidates,
        }
    }
}

fn is_word_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '|' | '<' | '>')
}

/// The word is a program name when nothing but whitespace or a pipe precedes it.
fn is_command_position(before: &str) -> bool {
    let before = before.trim_end();
    before.is_empty() || before.ends_with('|')
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
