use crate::ScreenshotError;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

pub const SCREENSHOTS_TAKEN: &str = "screenshots_taken";
pub const SCREENSHOTS_FAILED: &str = "screenshots_failed";
pub const SCREENSHOT_DURATION: &str = "screenshot_duration_seconds";
pub const SCREENSHOT_BYTES: &str = "screenshot_bytes";

/// Register descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    describe_counter!(SCREENSHOTS_TAKEN, "Screenshots captured successfully");
    describe_counter!(
        SCREENSHOTS_FAILED,
        "Screenshots that failed, labelled by failing step and error kind"
    );
    describe_histogram!(
        SCREENSHOT_DURATION,
        Unit::Seconds,
        "Wall time of one capture, launch to teardown"
    );
    describe_histogram!(SCREENSHOT_BYTES, Unit::Bytes, "Size of captured images");
}

/// Record the outcome of one capture.
pub fn record_capture(result: &Result<Vec<u8>, ScreenshotError>, elapsed: Duration) {
    histogram!(SCREENSHOT_DURATION, elapsed.as_secs_f64());

    match result {
        Ok(image) => {
            counter!(SCREENSHOTS_TAKEN, 1);
            histogram!(SCREENSHOT_BYTES, image.len() as f64);
        }
        Err(e) => {
            let step = e
                .step()
                .map(|step| step.to_string())
                .unwrap_or_else(|| "validate configuration".to_string());
            counter!(SCREENSHOTS_FAILED, 1, "step" => step, "kind" => e.kind());
        }
    }
}

/// Install the Prometheus recorder globally and return a handle for rendering
/// the scrape output.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    info!("Prometheus metrics recorder installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Step;
    use std::sync::OnceLock;

    fn handle() -> &'static PrometheusHandle {
        static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
        HANDLE.get_or_init(|| install_prometheus().unwrap())
    }

    #[test]
    fn test_success_and_failure_are_rendered() {
        let handle = handle();

        record_capture(&Ok(vec![0u8; 2048]), Duration::from_millis(1200));
        record_capture(
            &Err(ScreenshotError::protocol(
                "https://example.com",
                Step::AwaitLoad,
                "event stream closed",
            )),
            Duration::from_millis(300),
        );

        let rendered = handle.render();
        assert!(rendered.contains(SCREENSHOTS_TAKEN));
        assert!(rendered.contains(SCREENSHOTS_FAILED));
        assert!(rendered.contains("step=\"receive Load event\""));
        assert!(rendered.contains("kind=\"protocol\""));
        assert!(rendered.contains(SCREENSHOT_DURATION));
    }
}
