use crate::deadline::Interrupted;
use crate::domains::{Domain, Toggle};
use crate::jpeg::JpegError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The sub-operation of a capture that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateProfileDirectory,
    AllocatePort,
    SpawnBrowser,
    AwaitSpawn,
    AwaitEndpoint,
    DiscoverEndpoint,
    Connect,
    OpenTarget,
    Domain(Domain, Toggle),
    ClearDeviceMetrics,
    SetDeviceMetrics,
    IgnoreCertificateErrors,
    SubscribeDomContent,
    SubscribeLoad,
    SubscribeNetwork,
    Navigate,
    AwaitDomContent,
    AwaitLoad,
    GetLayoutMetrics,
    CreateStyleSheet,
    SetStyleSheetText,
    Settle,
    StopLoading,
    CaptureScreenshot,
    DecodeImage,
    AddJpegComment,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Step::CreateProfileDirectory => "create profile directory",
            Step::AllocatePort => "get free TCP port",
            Step::SpawnBrowser => "start browser",
            Step::AwaitSpawn => "wait for browser start",
            Step::AwaitEndpoint => "wait for DevTools endpoint",
            Step::DiscoverEndpoint => "discover DevTools websocket",
            Step::Connect => "connect to DevTools",
            Step::OpenTarget => "open page target",
            Step::Domain(domain, toggle) => return write!(f, "{toggle} {domain}"),
            Step::ClearDeviceMetrics => "clear Device Metrics Override",
            Step::SetDeviceMetrics => "set Device Metrics Override",
            Step::IgnoreCertificateErrors => "set Ignore Certificate Errors option",
            Step::SubscribeDomContent => "subscribe to DOM Content events",
            Step::SubscribeLoad => "subscribe to Load events",
            Step::SubscribeNetwork => "subscribe to Network events",
            Step::Navigate => "navigate",
            Step::AwaitDomContent => "receive DOM Content event",
            Step::AwaitLoad => "receive Load event",
            Step::GetLayoutMetrics => "get Layout Metrics",
            Step::CreateStyleSheet => "create CSS override",
            Step::SetStyleSheetText => "set CSS override",
            Step::Settle => "wait for page to settle",
            Step::StopLoading => "stop Page loading",
            Step::CaptureScreenshot => "capture screenshot",
            Step::DecodeImage => "decode screenshot data",
            Step::AddJpegComment => "add JPEG comment section",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ScreenshotError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("failed to get temporary directory for URL='{url}': {reason}")]
    ProfileDirectory { url: String, reason: String },

    #[error("failed to get free TCP port for URL='{url}': {reason}")]
    PortAllocation { url: String, reason: String },

    #[error("failed to start browser for URL='{url}': {reason}")]
    BrowserLaunchFailed { url: String, reason: String },

    #[error("deadline of {deadline:?} exceeded while trying to {step} for URL='{url}'")]
    Timeout {
        url: String,
        step: Step,
        deadline: Duration,
    },

    #[error("cancelled while trying to {step} for URL='{url}'")]
    Cancelled { url: String, step: Step },

    #[error("failed to {step} for URL='{url}': {reason}")]
    Protocol {
        url: String,
        step: Step,
        reason: String,
    },

    #[error("failed to navigate to URL='{url}': {reason}")]
    Navigation { url: String, reason: String },

    #[error("failed to add JPEG comment section for URL='{url}': {source}")]
    Jpeg {
        url: String,
        #[source]
        source: JpegError,
    },
}

impl ScreenshotError {
    pub fn protocol(url: &str, step: Step, reason: impl fmt::Display) -> Self {
        ScreenshotError::Protocol {
            url: url.to_string(),
            step,
            reason: reason.to_string(),
        }
    }

    pub fn interrupted(url: &str, step: Step, interrupted: Interrupted, deadline: Duration) -> Self {
        match interrupted {
            Interrupted::DeadlineExceeded => ScreenshotError::Timeout {
                url: url.to_string(),
                step,
                deadline,
            },
            Interrupted::Cancelled => ScreenshotError::Cancelled {
                url: url.to_string(),
                step,
            },
        }
    }

    /// URL of the capture that failed, when the failure is tied to one.
    pub fn url(&self) -> Option<&str> {
        match self {
            ScreenshotError::ConfigurationError(_) => None,
            ScreenshotError::InvalidUrl(url)
            | ScreenshotError::ProfileDirectory { url, .. }
            | ScreenshotError::PortAllocation { url, .. }
            | ScreenshotError::BrowserLaunchFailed { url, .. }
            | ScreenshotError::Timeout { url, .. }
            | ScreenshotError::Cancelled { url, .. }
            | ScreenshotError::Protocol { url, .. }
            | ScreenshotError::Navigation { url, .. }
            | ScreenshotError::Jpeg { url, .. } => Some(url),
        }
    }

    /// The sub-operation that failed.
    pub fn step(&self) -> Option<Step> {
        match self {
            ScreenshotError::ConfigurationError(_) | ScreenshotError::InvalidUrl(_) => None,
            ScreenshotError::ProfileDirectory { .. } => Some(Step::CreateProfileDirectory),
            ScreenshotError::PortAllocation { .. } => Some(Step::AllocatePort),
            ScreenshotError::BrowserLaunchFailed { .. } => Some(Step::SpawnBrowser),
            ScreenshotError::Timeout { step, .. }
            | ScreenshotError::Cancelled { step, .. }
            | ScreenshotError::Protocol { step, .. } => Some(*step),
            ScreenshotError::Navigation { .. } => Some(Step::Navigate),
            ScreenshotError::Jpeg { .. } => Some(Step::AddJpegComment),
        }
    }

    /// Whether the failure came from local infrastructure (directories, ports,
    /// the browser process, the DevTools endpoint, the clock) rather than from
    /// the page being captured. Nothing is retried internally; this only helps
    /// callers that want their own retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            ScreenshotError::ProfileDirectory { .. }
            | ScreenshotError::PortAllocation { .. }
            | ScreenshotError::BrowserLaunchFailed { .. }
            | ScreenshotError::Timeout { .. } => true,
            ScreenshotError::Protocol { step, .. } => matches!(
                step,
                Step::AwaitSpawn | Step::AwaitEndpoint | Step::DiscoverEndpoint | Step::Connect | Step::OpenTarget
            ),
            _ => false,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ScreenshotError::ConfigurationError(_) => "configuration",
            ScreenshotError::InvalidUrl(_) => "invalid_url",
            ScreenshotError::ProfileDirectory { .. } => "profile_directory",
            ScreenshotError::PortAllocation { .. } => "port_allocation",
            ScreenshotError::BrowserLaunchFailed { .. } => "browser_launch",
            ScreenshotError::Timeout { .. } => "timeout",
            ScreenshotError::Cancelled { .. } => "cancelled",
            ScreenshotError::Protocol { .. } => "protocol",
            ScreenshotError::Navigation { .. } => "navigation",
            ScreenshotError::Jpeg { .. } => "jpeg",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_url_and_step() {
        let err = ScreenshotError::protocol(
            "https://example.com",
            Step::Domain(Domain::HeapProfiler, Toggle::Disable),
            "boom",
        );
        assert_eq!(
            err.to_string(),
            "failed to disable Heap Profiler for URL='https://example.com': boom"
        );
        assert_eq!(err.url(), Some("https://example.com"));
        assert_eq!(
            err.step(),
            Some(Step::Domain(Domain::HeapProfiler, Toggle::Disable))
        );
    }

    #[test]
    fn test_interrupted_mapping() {
        let timeout = ScreenshotError::interrupted(
            "https://example.com",
            Step::AwaitLoad,
            Interrupted::DeadlineExceeded,
            Duration::from_secs(3),
        );
        assert!(matches!(timeout, ScreenshotError::Timeout { .. }));
        assert!(timeout.is_transient());

        let cancelled = ScreenshotError::interrupted(
            "https://example.com",
            Step::AwaitLoad,
            Interrupted::Cancelled,
            Duration::from_secs(3),
        );
        assert!(matches!(cancelled, ScreenshotError::Cancelled { .. }));
        assert!(!cancelled.is_transient());
        assert_eq!(
            cancelled.to_string(),
            "cancelled while trying to receive Load event for URL='https://example.com'"
        );
    }

    #[test]
    fn test_transient_classification() {
        let url = "https://example.com";
        assert!(ScreenshotError::PortAllocation {
            url: url.to_string(),
            reason: "no sockets".to_string()
        }
        .is_transient());
        assert!(ScreenshotError::protocol(url, Step::AwaitEndpoint, "refused").is_transient());
        assert!(!ScreenshotError::protocol(url, Step::CaptureScreenshot, "bad").is_transient());
        assert!(!ScreenshotError::Navigation {
            url: url.to_string(),
            reason: "net::ERR_NAME_NOT_RESOLVED".to_string()
        }
        .is_transient());
        assert!(!ScreenshotError::InvalidUrl(url.to_string()).is_transient());
    }
}
