//! Filesystem wildcard expansion of arguments.

use crate::parser::ParseError;
use glob::{GlobError, MatchOptions};
use std::io::ErrorKind;
use tracing::{debug, warn};

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// True when the word contains a glob metacharacter (`*`, `?` or `[`).
pub fn has_wildcards(word: &str) -> bool {
    word.contains(['*', '?', '['])
}

/// A directory that cannot be listed is left out of the walk. Anything else, such as
/// running out of descriptors, stops the expansion.
fn is_inaccessible_path(e: &GlobError) -> bool {
    matches!(
        e.error().kind(),
        ErrorKind::PermissionDenied | ErrorKind::NotFound | ErrorKind::NotADirectory
    ) || e.error().raw_os_error() == Some(libc::ELOOP)
}

/// Expand one word against the filesystem.
///
/// Words without metacharacters, malformed patterns and patterns matching nothing are
/// returned unchanged as a single element. Matches come back sorted. Unreadable
/// directories met during the walk are skipped.
pub fn expand_word(word: &str) -> Result<Vec<String>, ParseError> {
    if !has_wildcards(word) {
        return Ok(vec![word.to_string()]);
    }

    let paths = match glob::glob_with(word, OPTIONS) {
        Ok(paths) => paths,
        Err(e) => {
            debug!("pattern {:?} kept literally: {}", word, e);
            return Ok(vec![word.to_string()]);
        }
    };

    let mut matches = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) if is_inaccessible_path(&e) => {
                warn!("skipping {}: {}", e.path().display(), e.error());
                continue;
            }
            Err(e) => return Err(ParseError::Glob(e.to_string())),
        };
        matches
            .try_reserve(1)
            .map_err(|_| ParseError::OutOfMemory)?;
        matches.push(path.to_string_lossy().into_owned());
    }

    if matches.is_empty() {
        matches.push(word.to_string());
    }
    Ok(matches)
}

/// Expand every argument independently, preserving argument order.
pub fn expand_args(args: Vec<String>) -> Result<Vec<String>, ParseError> {
    let mut out: Vec<String> = Vec::new();
    out.try_reserve(args.len())
        .map_err(|_| ParseError::OutOfMemory)?;

    for arg in args {
        if !has_wildcards(&arg) {
            out.push(arg);
            continue;
        }
        let expanded = expand_word(&arg)?;
        out.try_reserve(expanded.len())
            .map_err(|_| ParseError::OutOfMemory)?;
        out.extend(expanded);
    }
    Ok(out)
}
