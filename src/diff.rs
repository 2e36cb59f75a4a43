//! Visual change tracking for a URL.
//!
//! Full page captures are archived under a root directory at
//! `<registrable domain>/<subdomain or _>/<base64url(URL)>.png`. The first
//! capture of a URL is stored; later ones are compared against the stored
//! image by difference hash and reported as a Hamming distance.

use crate::{sanitize_filename, screenshot_with_cancel, Config, OutputFormat, ScreenshotError};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use image_hasher::{HashAlg, HasherConfig};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::{Host, Url};

/// Directory used when the host has no subdomain.
pub const NO_SUBDOMAIN: &str = "_";

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Screenshot(#[from] ScreenshotError),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// First capture of the URL, stored at the path
    Saved(PathBuf),
    /// Distance between the stored capture and the new one; 0 means no
    /// visible change
    Compared { path: PathBuf, distance: u32 },
}

/// Archive location of `url`, relative to the archive root.
///
/// The domain directory is the registrable domain (eTLD+1) from the public
/// suffix list. Hosts without one, such as `localhost` or IP addresses, use
/// the host itself.
pub fn archive_path(url: &str) -> Result<PathBuf, DiffError> {
    let parsed = Url::parse(url).map_err(|_| DiffError::InvalidUrl(url.to_string()))?;

    let (domain, subdomain) = match parsed.host() {
        Some(Host::Domain(host)) => {
            let host = host.trim_end_matches('.');
            let domain = psl::domain_str(host).unwrap_or(host);
            (domain.to_string(), subdomain_prefix(host, domain))
        }
        Some(ip) => (ip.to_string(), NO_SUBDOMAIN.to_string()),
        None => return Err(DiffError::InvalidUrl(url.to_string())),
    };

    let name = URL_SAFE.encode(parsed.as_str());
    Ok(PathBuf::from(sanitize_filename(&domain))
        .join(sanitize_filename(&subdomain))
        .join(format!("{name}.png")))
}

fn subdomain_prefix(host: &str, domain: &str) -> String {
    host.strip_suffix(domain)
        .and_then(|prefix| prefix.strip_suffix('.'))
        .filter(|prefix| !prefix.is_empty())
        .unwrap_or(NO_SUBDOMAIN)
        .to_string()
}

/// Hamming distance between the difference hashes of two encoded images.
pub fn difference_distance(left: &[u8], right: &[u8]) -> Result<u32, DiffError> {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(8, 8)
        .to_hasher();

    let left = hasher.hash_image(&image::load_from_memory(left)?);
    let right = hasher.hash_image(&image::load_from_memory(right)?);
    Ok(left.dist(&right))
}

/// Store `image` as the first capture of `url` under `root`, or compare it
/// with the capture stored there. The stored capture is never replaced.
pub async fn store_or_compare(
    root: &Path,
    url: &str,
    image: &[u8],
) -> Result<DiffOutcome, DiffError> {
    let path = root.join(archive_path(url)?);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| DiffError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    match fs::read(&path).await {
        Ok(existing) => {
            let distance = difference_distance(&existing, image)?;
            debug!(path = %path.display(), distance, "Compared with stored capture");
            Ok(DiffOutcome::Compared { path, distance })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::write(&path, image)
                .await
                .map_err(|source| DiffError::Io {
                    path: path.clone(),
                    source,
                })?;
            info!(path = %path.display(), "Stored first capture");
            Ok(DiffOutcome::Saved(path))
        }
        Err(source) => Err(DiffError::Io { path, source }),
    }
}

/// Take a full page PNG of `config.url` and store or compare it under `root`.
pub async fn capture_and_compare(
    config: &Config,
    root: &Path,
    cancel: CancellationToken,
) -> Result<DiffOutcome, DiffError> {
    // reject hostless URLs before a browser is launched
    archive_path(&config.url)?;

    let config = Config {
        full_page: true,
        output_format: OutputFormat::Png,
        ..config.clone()
    };
    let image = screenshot_with_cancel(&config, cancel).await?;
    store_or_compare(root, &config.url, &image).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Luma};
    use std::io::Cursor;

    fn png(pixel: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let buffer = ImageBuffer::from_fn(64, 64, |x, y| Luma([pixel(x, y)]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(buffer)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn stem(path: &Path) -> String {
        let name = path.file_stem().unwrap().to_str().unwrap();
        String::from_utf8(URL_SAFE.decode(name).unwrap()).unwrap()
    }

    #[test]
    fn test_archive_path_layout() {
        let path = archive_path("https://www.blog.example.co.uk/a?b=1").unwrap();
        assert!(path.starts_with("example.co.uk/www.blog"));
        assert_eq!(path.extension().unwrap(), "png");
        assert_eq!(stem(&path), "https://www.blog.example.co.uk/a?b=1");

        let path = archive_path("https://example.com").unwrap();
        assert!(path.starts_with("example.com/_"));
        assert_eq!(stem(&path), "https://example.com/");
    }

    #[test]
    fn test_archive_path_without_registrable_domain() {
        let path = archive_path("http://127.0.0.1:8080/x").unwrap();
        assert!(path.starts_with("127.0.0.1/_"));

        let path = archive_path("http://localhost/").unwrap();
        assert!(path.starts_with("localhost/_"));

        assert!(matches!(
            archive_path("data:text/html,hi"),
            Err(DiffError::InvalidUrl(_))
        ));
        assert!(matches!(
            archive_path("not a url"),
            Err(DiffError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_difference_distance() {
        let flat = png(|_, _| 128);
        let gradient = png(|x, _| (x * 4) as u8);

        assert_eq!(difference_distance(&flat, &flat).unwrap(), 0);
        assert!(difference_distance(&flat, &gradient).unwrap() > 0);
        assert!(matches!(
            difference_distance(b"not an image", &flat),
            Err(DiffError::Image(_))
        ));
    }

    #[tokio::test]
    async fn test_store_then_compare() {
        let root = tempfile::tempdir().unwrap();
        let url = "https://news.example.com/front";
        let flat = png(|_, _| 128);
        let gradient = png(|x, _| (x * 4) as u8);

        let first = store_or_compare(root.path(), url, &flat).await.unwrap();
        let DiffOutcome::Saved(path) = first else {
            panic!("expected first capture to be stored, got {first:?}");
        };
        assert!(path.starts_with(root.path().join("example.com").join("news")));

        let same = store_or_compare(root.path(), url, &flat).await.unwrap();
        assert_eq!(
            same,
            DiffOutcome::Compared {
                path: path.clone(),
                distance: 0
            }
        );

        let changed = store_or_compare(root.path(), url, &gradient).await.unwrap();
        assert!(matches!(changed, DiffOutcome::Compared { distance, .. } if distance > 0));

        // the first capture stays the reference
        assert_eq!(std::fs::read(&path).unwrap(), flat);
    }

    #[tokio::test]
    async fn test_hostless_url_is_rejected_before_launch() {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            chrome_path: PathBuf::from("/nonexistent/chrome-binary"),
            ..Config::for_url("data:text/html,hi")
        };

        let err = capture_and_compare(&config, root.path(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DiffError::InvalidUrl(_)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
