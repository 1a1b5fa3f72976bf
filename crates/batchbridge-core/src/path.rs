//! Working-directory resolution against a connection's entry directory.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Resolve `path` against `base`.
///
/// Absolute paths are kept; relative paths are joined to `base`. `.` and
/// `..` components are folded lexically, never past the root.
pub fn resolve(base: &Utf8Path, path: &str) -> Utf8PathBuf {
    let joined = if Utf8Path::new(path).is_absolute() {
        Utf8PathBuf::from(path)
    } else {
        base.join(path)
    };

    let mut resolved = Utf8PathBuf::new();
    for component in joined.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if resolved.parent().is_some() {
                    resolved.pop();
                }
            }
            other => resolved.push(other.as_str()),
        }
    }
    resolved
}

/// Resolve an optional working directory; `None` means the entry directory.
pub fn working_directory(entry: &Utf8Path, dir: Option<&str>) -> Utf8PathBuf {
    match dir {
        Some(dir) => resolve(entry, dir),
        None => resolve(entry, "."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative() {
        let base = Utf8Path::new("/home/user");
        assert_eq!(resolve(base, "work"), "/home/user/work");
        assert_eq!(resolve(base, "./work/../out"), "/home/user/out");
        assert_eq!(resolve(base, "../../../tmp"), "/tmp");
    }

    #[test]
    fn test_resolve_absolute() {
        let base = Utf8Path::new("/home/user");
        assert_eq!(resolve(base, "/scratch/run"), "/scratch/run");
    }

    #[test]
    fn test_working_directory_default() {
        let base = Utf8Path::new("/home/user/");
        assert_eq!(working_directory(base, None), "/home/user");
        assert_eq!(working_directory(base, Some("x")), "/home/user/x");
    }
}
