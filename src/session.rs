//! One DevTools session: connect, prepare the page, navigate, capture.
//!
//! Every protocol call goes through [`Session::guard`], which bounds it by the
//! capture deadline and tags failures with the step that produced them.

use crate::deadline::Deadline;
use crate::domains::domain_plan;
use crate::error::{ScreenshotError, Step};
use crate::jpeg;
use crate::settle::{wait_for_settle, IdleSignal, SettleOutcome};
use crate::{Config, OutputFormat, Padding, Viewport};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::css::{CreateStyleSheetParams, SetStyleSheetTextParams};
use chromiumoxide::cdp::browser_protocol::emulation::{
    ClearDeviceMetricsOverrideParams, SetDeviceMetricsOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::EventLoadingFinished;
use chromiumoxide::cdp::browser_protocol::page::{
    self, CaptureScreenshotFormat, CaptureScreenshotParams, EventDomContentEventFired,
    EventLoadEventFired, GetLayoutMetricsParams, NavigateParams, StopLoadingParams,
};
use chromiumoxide::cdp::browser_protocol::security::SetIgnoreCertificateErrorsParams;
use chromiumoxide::handler::HandlerConfig;
use chromiumoxide::{Browser, Page};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::debug;

/// Lets the document grow past the viewport so the full content is laid out.
pub const OVERFLOW_OVERRIDE: &str = "html { height: auto !important; }";

/// The page dimensions that matter for clipping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutSize {
    pub content_width: f64,
    pub content_height: f64,
    pub client_height: f64,
}

impl LayoutSize {
    pub fn overflows(&self) -> bool {
        self.content_height > self.client_height
    }
}

/// Width and height of the region to capture, before padding.
pub fn resolve_geometry(viewport: Viewport, full_page: bool, layout: &LayoutSize) -> (f64, f64) {
    if full_page {
        (layout.content_width, layout.content_height)
    } else {
        let viewport = viewport.clamped();
        (f64::from(viewport.width), f64::from(viewport.height))
    }
}

/// The capture clip: origin shifted by the left/top padding and the size
/// grown by the right/bottom padding.
pub fn capture_clip(width: f64, height: f64, padding: Padding) -> page::Viewport {
    page::Viewport {
        x: f64::from(padding.left),
        y: f64::from(padding.top),
        width: width + f64::from(padding.right),
        height: height + f64::from(padding.bottom),
        scale: 1.0,
    }
}

/// Handler settings for one session.
///
/// chromiumoxide bounds every command by its own request timeout (30 seconds
/// by default). It is set to what is left of the capture deadline so that the
/// deadline stays the only bound.
pub fn handler_config(deadline: &Deadline) -> HandlerConfig {
    HandlerConfig {
        request_timeout: deadline.remaining(),
        ..Default::default()
    }
}

/// Aborts the protocol handler task when the session ends.
struct HandlerTask(JoinHandle<()>);

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Session<'a> {
    config: &'a Config,
    deadline: &'a Deadline,
}

impl<'a> Session<'a> {
    pub fn new(config: &'a Config, deadline: &'a Deadline) -> Self {
        Self { config, deadline }
    }

    fn url(&self) -> &str {
        &self.config.url
    }

    /// Run one step under the deadline.
    async fn guard<F, T, E>(&self, step: Step, fut: F) -> Result<T, ScreenshotError>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        debug!(url = %self.url(), %step, "Session step");
        match self.deadline.run(fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ScreenshotError::protocol(self.url(), step, e)),
            Err(interrupted) => Err(ScreenshotError::interrupted(
                self.url(),
                step,
                interrupted,
                self.deadline.budget(),
            )),
        }
    }

    async fn next_event<S>(&self, step: Step, events: &mut S) -> Result<(), ScreenshotError>
    where
        S: Stream + Unpin,
    {
        self.guard(step, async {
            events.next().await.map(drop).ok_or("event stream closed")
        })
        .await
    }

    /// Connect to the browser at `ws_url` and take the screenshot.
    pub async fn capture(&self, ws_url: &str) -> Result<Vec<u8>, ScreenshotError> {
        let (browser, mut handler) = self
            .guard(
                Step::Connect,
                Browser::connect_with_config(ws_url, handler_config(self.deadline)),
            )
            .await?;

        let _handler = HandlerTask(tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "DevTools handler error");
                }
            }
            debug!("DevTools handler stream ended");
        }));

        let page = self
            .guard(Step::OpenTarget, browser.new_page("about:blank"))
            .await?;

        self.capture_page(&page).await
    }

    async fn capture_page(&self, page: &Page) -> Result<Vec<u8>, ScreenshotError> {
        let config = self.config;

        for (domain, toggle) in domain_plan(config.network_idle) {
            self.guard(Step::Domain(domain, toggle), domain.apply(page, toggle))
                .await?;
        }

        self.guard(
            Step::ClearDeviceMetrics,
            page.execute(ClearDeviceMetricsOverrideParams::default()),
        )
        .await?;

        let viewport = config.viewport.clamped();
        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(viewport.width))
            .height(i64::from(viewport.height))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(|e| ScreenshotError::protocol(self.url(), Step::SetDeviceMetrics, e))?;
        self.guard(Step::SetDeviceMetrics, page.execute(metrics))
            .await?;

        self.guard(
            Step::IgnoreCertificateErrors,
            page.execute(SetIgnoreCertificateErrorsParams::new(true)),
        )
        .await?;

        // subscribe before navigating so no event can be missed
        let mut dom_content = self
            .guard(
                Step::SubscribeDomContent,
                page.event_listener::<EventDomContentEventFired>(),
            )
            .await?;
        let mut load = self
            .guard(Step::SubscribeLoad, page.event_listener::<EventLoadEventFired>())
            .await?;
        let network = if config.network_idle {
            Some(
                self.guard(
                    Step::SubscribeNetwork,
                    page.event_listener::<EventLoadingFinished>(),
                )
                .await?,
            )
        } else {
            None
        };

        let navigation = self
            .guard(
                Step::Navigate,
                page.execute(NavigateParams::new(config.url.clone())),
            )
            .await?;
        if let Some(error_text) = navigation.error_text.as_deref().filter(|t| !t.is_empty()) {
            return Err(ScreenshotError::Navigation {
                url: config.url.clone(),
                reason: error_text.to_string(),
            });
        }

        self.next_event(Step::AwaitDomContent, &mut dom_content)
            .await?;
        self.next_event(Step::AwaitLoad, &mut load).await?;
        debug!(url = %config.url, "Page loaded");

        let layout = self
            .guard(
                Step::GetLayoutMetrics,
                page.execute(GetLayoutMetricsParams::default()),
            )
            .await?;
        let layout = LayoutSize {
            content_width: layout.css_content_size.width,
            content_height: layout.css_content_size.height,
            client_height: layout.css_visual_viewport.client_height,
        };
        let (width, height) = resolve_geometry(config.viewport, config.full_page, &layout);

        if layout.overflows() {
            let sheet = self
                .guard(
                    Step::CreateStyleSheet,
                    page.execute(CreateStyleSheetParams::new(navigation.frame_id.clone())),
                )
                .await?;
            self.guard(
                Step::SetStyleSheetText,
                page.execute(SetStyleSheetTextParams::new(
                    sheet.style_sheet_id.clone(),
                    OVERFLOW_OVERRIDE,
                )),
            )
            .await?;
        }

        let mut idle = match network {
            Some(events) => IdleSignal::spawn(events, config.network_idle_window),
            None => IdleSignal::disabled(),
        };
        let outcome = wait_for_settle(idle.fired(), config.wait, self.deadline).await;
        drop(idle);
        match outcome {
            SettleOutcome::Interrupted(interrupted) => {
                return Err(ScreenshotError::interrupted(
                    self.url(),
                    Step::Settle,
                    interrupted,
                    self.deadline.budget(),
                ));
            }
            outcome => debug!(url = %config.url, ?outcome, "Page settled"),
        }

        self.guard(Step::StopLoading, page.execute(StopLoadingParams::default()))
            .await?;

        let mut params = CaptureScreenshotParams::builder()
            .clip(capture_clip(width, height, config.padding))
            .capture_beyond_viewport(config.full_page);
        params = match config.output_format {
            OutputFormat::Png => params.format(CaptureScreenshotFormat::Png),
            OutputFormat::Jpeg => params
                .format(CaptureScreenshotFormat::Jpeg)
                .quality(i64::from(config.jpeg_quality)),
        };

        let shot = self
            .guard(Step::CaptureScreenshot, page.execute(params.build()))
            .await?;
        let image = STANDARD
            .decode(AsRef::<str>::as_ref(&shot.data))
            .map_err(|e| ScreenshotError::protocol(self.url(), Step::DecodeImage, e))?;

        if config.is_jpeg() && config.embed_url_comment {
            let comment = STANDARD.encode(config.url.as_bytes());
            return jpeg::add_comment(&image, comment.as_bytes()).map_err(|source| {
                ScreenshotError::Jpeg {
                    url: config.url.clone(),
                    source,
                }
            });
        }

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(content_width: f64, content_height: f64, client_height: f64) -> LayoutSize {
        LayoutSize {
            content_width,
            content_height,
            client_height,
        }
    }

    #[test]
    fn test_viewport_clip_without_padding() {
        let (width, height) =
            resolve_geometry(Viewport::new(800, 600), false, &layout(800.0, 600.0, 600.0));
        let clip = capture_clip(width, height, Padding::default());

        assert_eq!((clip.x, clip.y), (0.0, 0.0));
        assert_eq!((clip.width, clip.height), (800.0, 600.0));
        assert_eq!(clip.scale, 1.0);
    }

    #[test]
    fn test_full_page_uses_content_size() {
        let metrics = layout(800.0, 3000.0, 600.0);
        let (width, height) = resolve_geometry(Viewport::new(800, 600), true, &metrics);
        let clip = capture_clip(width, height, Padding::default());

        assert_eq!(clip.height, 3000.0);
        assert_eq!(clip.width, 800.0);
        assert!(metrics.overflows());
    }

    #[test]
    fn test_viewport_geometry_is_clamped() {
        let (width, height) =
            resolve_geometry(Viewport::new(10, 100_000), false, &layout(0.0, 0.0, 0.0));
        assert_eq!((width, height), (50.0, 8192.0));
    }

    #[test]
    fn test_padding_shifts_and_grows_clip() {
        let padding = Padding {
            left: 10,
            top: 20,
            right: 30,
            bottom: 40,
        };
        let clip = capture_clip(1024.0, 768.0, padding);

        assert_eq!((clip.x, clip.y), (10.0, 20.0));
        assert_eq!((clip.width, clip.height), (1054.0, 808.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_follows_deadline() {
        let deadline = Deadline::after(std::time::Duration::from_secs(300));
        tokio::time::advance(std::time::Duration::from_secs(20)).await;

        let config = handler_config(&deadline);
        assert_eq!(config.request_timeout, std::time::Duration::from_secs(280));
        assert!(config.request_timeout > std::time::Duration::from_secs(30));
    }

    #[test]
    fn test_short_page_does_not_overflow() {
        assert!(!layout(1920.0, 500.0, 1080.0).overflows());
        assert!(!layout(1920.0, 1080.0, 1080.0).overflows());
    }
}
