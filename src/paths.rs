//! Filesystem locations used by applog.

use std::path::PathBuf;

/// Default aggregator output file, relative to the working directory.
pub const DEFAULT_LOG_FILE: &str = "applog.txt";

/// Unique socket path for a new log queue.
///
/// Unix socket paths are limited to about 100 bytes, so the name is kept
/// short: `applog-<pid>-<12 hex chars>.sock` under the temp dir.
pub fn queue_socket_path() -> PathBuf {
    let id = uuid::Uuid::new_v4().simple().to_string();
    std::env::temp_dir().join(format!("applog-{}-{}.sock", std::process::id(), &id[..12]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_socket_paths_are_unique() {
        let a = queue_socket_path();
        let b = queue_socket_path();
        assert_ne!(a, b);
    }

    #[test]
    fn test_queue_socket_path_shape() {
        let path = queue_socket_path();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&format!("applog-{}-", std::process::id())));
        assert!(name.ends_with(".sock"));
        assert!(path.starts_with(std::env::temp_dir()));
    }
}
