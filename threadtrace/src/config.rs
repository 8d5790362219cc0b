//! Runtime configuration
//!
//! Every knob has a sensible default; the environment can override the two
//! that depend on the host application (`THREADTRACE_CACHE_DIR`,
//! `THREADTRACE_APP_VERSION`).

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};

/// Default number of frames captured per thread
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Default wait for a signalled thread to report its frames
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

const CACHE_DIR_ENV: &str = "THREADTRACE_CACHE_DIR";
const APP_VERSION_ENV: &str = "THREADTRACE_APP_VERSION";

/// Configuration shared by the table builder and the capture path
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Application-private directory holding the symbol table cache
    pub cache_dir: PathBuf,
    /// Key for the cached table; a different value forces a rebuild
    pub app_version: String,
    /// Maximum frames captured per thread
    pub max_depth: usize,
    /// How long to wait for a signalled thread before giving up
    pub reply_timeout: Duration,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            app_version: default_app_version(),
            max_depth: DEFAULT_MAX_DEPTH,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl TraceConfig {
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }
}

fn default_cache_dir() -> PathBuf {
    if let Some(dir) = env::var_os(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = env::var_os("XDG_CACHE_HOME") {
        return PathBuf::from(xdg).join("threadtrace");
    }
    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".cache").join("threadtrace");
    }
    env::temp_dir().join("threadtrace")
}

/// Version key for the cache
///
/// Falls back to a fingerprint of the running executable so that relinking
/// the binary (which moves every method) invalidates the cached table.
fn default_app_version() -> String {
    if let Ok(version) = env::var(APP_VERSION_ENV) {
        return version;
    }
    executable_fingerprint().unwrap_or_default()
}

fn executable_fingerprint() -> Option<String> {
    let exe = env::current_exe().ok()?;
    let meta = fs::metadata(exe).ok()?;
    let mtime = meta.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    Some(format!("{}-{}.{:09}", meta.len(), mtime.as_secs(), mtime.subsec_nanos()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TraceConfig::default();
        assert_eq!(config.max_depth, 128);
        assert_eq!(config.reply_timeout, Duration::from_secs(2));
        assert!(!config.cache_dir.as_os_str().is_empty());
    }

    #[test]
    fn test_builder_setters() {
        let config = TraceConfig::default()
            .with_cache_dir("/tmp/tt")
            .with_app_version("1.1")
            .with_max_depth(16)
            .with_reply_timeout(Duration::from_millis(5));
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/tt"));
        assert_eq!(config.app_version, "1.1");
        assert_eq!(config.max_depth, 16);
        assert_eq!(config.reply_timeout, Duration::from_millis(5));
    }

    #[test]
    fn test_fingerprint_of_test_binary() {
        // The test harness is a real file on disk
        let fingerprint = executable_fingerprint().expect("test binary has metadata");
        assert!(fingerprint.contains('-'));
    }
}
