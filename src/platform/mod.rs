use std::path::{Path, PathBuf};

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Root data directory for bidpilot.
    /// Unix: `~/.bidpilot`, Windows: `%APPDATA%\bidpilot`.
    fn data_dir() -> PathBuf;
}

/// `BIDPILOT_DATA_DIR` wins over the platform default so tests and
/// side-by-side installs can point at their own store.
fn resolve_data_dir(default: PathBuf) -> PathBuf {
    match std::env::var("BIDPILOT_DATA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_used_when_env_is_unset_or_blank() {
        // Only exercises the fallback path; the env var is process-global.
        if std::env::var("BIDPILOT_DATA_DIR").is_err() {
            let dir = resolve_data_dir(PathBuf::from("/tmp/fallback"));
            assert_eq!(dir, PathBuf::from("/tmp/fallback"));
        }
    }
}
