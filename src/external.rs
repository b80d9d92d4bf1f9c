use std::borrow::Cow;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Resolve a program name the way `execvp` would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - `./foo` or a relative path with several components (e.g., `bin/sh`): returns it if it
///   exists, relative to the current directory.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first executable match.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (None, None) => None,
        (Some(x), None) if !path.starts_with(".") => {
            find_in_path(search_paths, x.as_os_str()).map(Cow::Owned)
        }
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

/// Directories named by a search path, in order. Empty entries are skipped.
pub fn search_dirs(search_paths: &OsStr) -> impl Iterator<Item = PathBuf> + '_ {
    std::env::split_paths(search_paths).filter(|d| !d.as_os_str().is_empty())
}

/// True when `path` is a regular file the owner may execute.
pub fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o100 != 0,
        Err(_) => false,
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    search_dirs(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use std::fs::File;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = std::env::temp_dir().join(format!(
            "external_{}_{}_{}",
            tag,
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn absolute_existing_true() {
        let path = Path::new("/bin/sh");
        let res = find_command_path(osstr("/bin"), path);
        assert!(res.is_some(), "Expected to find /bin/sh via absolute path");
        assert_eq!(res.unwrap().as_ref(), path);
    }

    #[test]
    fn absolute_nonexisting() {
        let path = Path::new("/bin/nonexisting");
        let res = find_command_path(osstr("/bin"), path);
        assert!(res.is_none());
    }

    #[test]
    fn single_component_found_in_path() {
        let res = find_command_path(osstr("/nonexistent_dir:/bin"), Path::new("sh"));
        let found = res.expect("Expected to find 'sh' in /bin via PATH search");
        assert_eq!(found.as_ref(), Path::new("/bin/sh"));
    }

    #[test]
    fn single_component_not_found_in_path() {
        let res = find_command_path(osstr("/bin"), Path::new("nonexisting"));
        assert!(res.is_none());
    }

    #[test]
    fn non_executable_file_in_path_is_skipped() {
        let dir = unique_temp_dir("noexec");
        let file = dir.join("plainfile");
        File::create(&file).unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();

        let res = find_command_path(dir.as_os_str(), Path::new("plainfile"));
        assert!(res.is_none());
        assert!(!is_executable(&file));

        fs::set_permissions(&file, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable(&file));
        let res = find_command_path(dir.as_os_str(), Path::new("plainfile"));
        assert_eq!(res.unwrap().as_ref(), file.as_path());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn directories_are_not_executable() {
        let dir = unique_temp_dir("dir");
        assert!(!is_executable(&dir));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn search_dirs_skips_empty_entries() {
        let dirs: Vec<PathBuf> = search_dirs(osstr("/a::/b")).collect();
        assert_eq!(dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn empty_path_is_none() {
        let res = find_command_path(osstr("/bin"), Path::new(""));
        assert!(res.is_none(), "Empty path should not resolve to anything");
    }
}
