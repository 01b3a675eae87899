//! Shared formatting and path helpers.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Format bytes in human-readable form.
///
/// # Examples
///
/// ```
/// use warden::utils::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 bytes");
/// assert_eq!(format_bytes(1536), "1.5 KB");
/// assert_eq!(format_bytes(1048576), "1.0 MB");
/// ```
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes == 0 {
        "0 bytes".to_string()
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

/// Format an uptime as `HH:MM:SS`, with a day prefix past 24 hours.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use warden::utils::format_uptime;
///
/// assert_eq!(format_uptime(Duration::from_secs(59)), "00:00:59");
/// assert_eq!(format_uptime(Duration::from_secs(3723)), "01:02:03");
/// assert_eq!(format_uptime(Duration::from_secs(90_000)), "1d 01:00:00");
/// ```
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, rest) = (secs / 86_400, secs % 86_400);
    let clock = format!("{:02}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
    if days > 0 {
        format!("{days}d {clock}")
    } else {
        clock
    }
}

/// Resolves `path` against `base` unless it is already absolute.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 bytes");
        assert_eq!(format_bytes(512), "512 bytes");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::ZERO), "00:00:00");
        assert_eq!(format_uptime(Duration::from_millis(61_900)), "00:01:01");
        assert_eq!(format_uptime(Duration::from_secs(2 * 86_400 + 5)), "2d 00:00:05");
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/srv/mc");
        assert_eq!(resolve_path(base, Path::new("world")), Path::new("/srv/mc/world"));
        assert_eq!(resolve_path(base, Path::new("/data/world")), Path::new("/data/world"));
    }
}
