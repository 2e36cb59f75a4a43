use crate::OutputFormat;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Schemes a browser can be pointed at for a capture.
const CAPTURABLE_SCHEMES: &[&str] = &["http", "https", "file", "data"];

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Output file name derived from the captured URL, e.g.
/// `example.com_docs_index.png` for `https://example.com/docs/index`.
pub fn default_output_path(url: &str, format: OutputFormat) -> PathBuf {
    let stem = Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let host = parsed.host_str()?.to_string();
            let path = parsed.path().trim_matches('/');
            Some(if path.is_empty() {
                host
            } else {
                format!("{host}/{path}")
            })
        })
        .map(|name| sanitize_filename(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "screenshot".to_string());

    PathBuf::from(format!("{stem}.{}", format.extension()))
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

pub fn validate_url(url: &str) -> Result<Url, url::ParseError> {
    let parsed = Url::parse(url)?;

    if CAPTURABLE_SCHEMES.contains(&parsed.scheme()) {
        Ok(parsed)
    } else {
        Err(url::ParseError::RelativeUrlWithoutBase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("test.txt"), "test.txt");
        assert_eq!(sanitize_filename("test/file.txt"), "test_file.txt");
        assert_eq!(sanitize_filename("test:file?.txt"), "test_file_.txt");
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path("https://example.com", OutputFormat::Png),
            PathBuf::from("example.com.png")
        );
        assert_eq!(
            default_output_path("https://example.com/docs/index/", OutputFormat::Jpeg),
            PathBuf::from("example.com_docs_index.jpg")
        );
        assert_eq!(
            default_output_path("http://localhost:8080/a?b=c", OutputFormat::Png),
            PathBuf::from("localhost_a.png")
        );
        assert_eq!(
            default_output_path("data:text/html,<p>hi</p>", OutputFormat::Png),
            PathBuf::from("screenshot.png")
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("file:///tmp/page.html").is_ok());
        assert!(validate_url("data:text/html,<h1>hi</h1>").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("invalid-url").is_err());
    }
}
