//! Top-level screenshot entry points.
//!
//! One call owns one browser: it allocates a profile directory and a port,
//! launches the browser, drives a [`Session`] against it and always tears the
//! process down again, whatever step failed.

use crate::deadline::{Deadline, Interrupted};
use crate::devtools::DevToolsEndpoint;
use crate::error::{ScreenshotError, Step};
use crate::metrics::record_capture;
use crate::process::{BrowserProcess, SPAWN_SETTLE};
use crate::profile::ProfileDirectory;
use crate::session::Session;
use crate::{format_bytes, format_duration, get_chrome_args, get_free_port, Config};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Take one screenshot of `config.url`.
///
/// Returns PNG bytes, or JPEG bytes carrying the base64 encoded URL as a
/// comment segment when `config.embed_url_comment` is set.
///
/// # Examples
///
/// ```rust,no_run
/// use webpage_screenshot::{screenshot, Config};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::for_url("https://example.com");
///     let png = screenshot(&config).await?;
///     std::fs::write("example.png", png)?;
///     Ok(())
/// }
/// ```
pub async fn screenshot(config: &Config) -> Result<Vec<u8>, ScreenshotError> {
    screenshot_with_cancel(config, CancellationToken::new()).await
}

/// Like [`screenshot`], but aborts at the next step boundary once `cancel`
/// fires. The browser is still torn down before this returns.
pub async fn screenshot_with_cancel(
    config: &Config,
    cancel: CancellationToken,
) -> Result<Vec<u8>, ScreenshotError> {
    let started = Instant::now();
    let result = capture(config, cancel).await;
    let elapsed = started.elapsed();

    match &result {
        Ok(image) => info!(
            url = %config.url,
            size = %format_bytes(image.len()),
            duration = %format_duration(elapsed),
            "Screenshot captured"
        ),
        Err(e) => warn!(
            url = %config.url,
            duration = %format_duration(elapsed),
            error = %e,
            "Screenshot failed"
        ),
    }

    record_capture(&result, elapsed);
    result
}

async fn capture(config: &Config, cancel: CancellationToken) -> Result<Vec<u8>, ScreenshotError> {
    config.validate()?;

    let deadline = Deadline::new(config.deadline, cancel);

    let profile =
        ProfileDirectory::resolve(&config.profile).map_err(|e| ScreenshotError::ProfileDirectory {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;

    capture_with_profile(config, &deadline, profile).await
}

/// The capture after its profile directory is resolved. A random `profile`
/// is gone by the time this returns, whatever the outcome.
pub(crate) async fn capture_with_profile(
    config: &Config,
    deadline: &Deadline,
    profile: ProfileDirectory,
) -> Result<Vec<u8>, ScreenshotError> {
    let mut browser = BrowserProcess::new(profile);
    let result = launch_and_capture(config, deadline, &mut browser).await;
    browser.kill_and_cleanup().await;

    result
}

async fn launch_and_capture(
    config: &Config,
    deadline: &Deadline,
    browser: &mut BrowserProcess,
) -> Result<Vec<u8>, ScreenshotError> {
    let url = config.url.as_str();
    let interrupted =
        |step: Step| move |i: Interrupted| ScreenshotError::interrupted(url, step, i, deadline.budget());

    let port = match config.port {
        0 => get_free_port().map_err(|e| ScreenshotError::PortAllocation {
            url: url.to_string(),
            reason: e.to_string(),
        })?,
        port => port,
    };

    let args = get_chrome_args(config, port, browser.profile_dir());
    debug!(url, port, args = ?args, "Launching browser");
    browser
        .start(&config.chrome_path, &args)
        .map_err(|e| ScreenshotError::BrowserLaunchFailed {
            url: url.to_string(),
            reason: format!("{}: {e}", config.chrome_path.display()),
        })?;

    deadline
        .sleep(SPAWN_SETTLE)
        .await
        .map_err(interrupted(Step::AwaitSpawn))?;

    let endpoint = DevToolsEndpoint::new(&config.host, port)
        .map_err(|e| ScreenshotError::protocol(url, Step::AwaitEndpoint, e))?;
    endpoint
        .wait_until_ready(deadline)
        .await
        .map_err(interrupted(Step::AwaitEndpoint))?;

    let ws_url = deadline
        .run(endpoint.websocket_url())
        .await
        .map_err(interrupted(Step::DiscoverEndpoint))?
        .map_err(|e| ScreenshotError::protocol(url, Step::DiscoverEndpoint, e))?;
    debug!(url, ws_url = %ws_url, "DevTools websocket discovered");

    Session::new(config, deadline).capture(&ws_url).await
}
