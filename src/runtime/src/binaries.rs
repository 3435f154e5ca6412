//! External binary discovery.

use std::path::{Path, PathBuf};

use qsession_core::error::{Result, SessionError};

/// Install locations beyond `PATH` where distributions put helper daemons.
const EXTRA_DIRS: &[&str] = &[
    "/usr/libexec",
    "/usr/lib/qemu",
    "/opt/homebrew/bin",
    "/usr/local/bin",
];

/// Find `name` on `PATH` or in the usual extra install locations.
pub fn find_binary(name: &str) -> Option<PathBuf> {
    let path_dirs = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect::<Vec<_>>())
        .unwrap_or_default();

    path_dirs
        .into_iter()
        .chain(EXTRA_DIRS.iter().map(PathBuf::from))
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Resolve a tool: an explicit override must exist, otherwise search.
pub fn resolve_tool(name: &str, override_path: Option<&Path>, hint: &str) -> Result<PathBuf> {
    let found = match override_path {
        Some(path) => is_executable(path).then(|| path.to_path_buf()),
        None => find_binary(name),
    };

    found.ok_or_else(|| SessionError::MissingDependency {
        binary: override_path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| name.to_string()),
        hint: Some(hint.to_string()),
    })
}

/// Find a sibling qsession binary, the way the CLI finds `qsession-watchdog`.
///
/// Searches in order:
/// 1. Same directory as current executable
/// 2. target/debug or target/release (for development)
/// 3. PATH
pub fn find_companion(name: &str) -> Option<PathBuf> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let path = exe_dir.join(name);
            if is_executable(&path) {
                return Some(path);
            }
        }
    }

    for dir in ["target/debug", "target/release"] {
        let path = PathBuf::from(dir).join(name);
        if is_executable(&path) {
            return Some(path);
        }
    }

    find_binary(name)
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_find_binary_sh() {
        let sh = find_binary("sh").expect("sh should be on PATH");
        assert!(sh.ends_with("sh"));
    }

    #[test]
    fn test_find_binary_missing() {
        assert!(find_binary("qsession-definitely-not-installed").is_none());
    }

    #[test]
    fn test_resolve_tool_override() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_script(dir.path(), "swtpm", 0o755);
        assert_eq!(resolve_tool("swtpm", Some(&tool), "install").unwrap(), tool);
    }

    #[test]
    fn test_resolve_tool_override_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_script(dir.path(), "swtpm", 0o644);
        let err = resolve_tool("swtpm", Some(&tool), "install swtpm").unwrap_err();
        assert!(matches!(err, SessionError::MissingDependency { .. }));
        assert_eq!(err.hint(), Some("install swtpm"));
    }

    #[test]
    fn test_resolve_tool_missing_override_path() {
        let err =
            resolve_tool("python3", Some(Path::new("/nonexistent/python3")), "x").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/python3"));
    }

    #[test]
    fn test_is_executable_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_executable(dir.path()));
    }
}
