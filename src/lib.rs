//! # Webpage Screenshot
//!
//! Screenshots of web pages taken with a headless Chrome driven over the
//! DevTools protocol. Every capture launches its own browser with a private
//! profile directory and a free debugging port, drives one page through a
//! fixed sequence of protocol steps, and tears the browser down again, also
//! when a step fails, the deadline passes or the caller cancels.
//!
//! JPEG output can carry the captured URL (base64 encoded) in a comment
//! segment, injected without re-encoding the image.
//!
//! ## Pipeline
//!
//! | Stage | Module | Notes |
//! |-------|--------|-------|
//! | Port allocation | [`port`] | OS-assigned port, released before launch |
//! | Profile directory | [`profile`] | random directories are removed afterwards |
//! | Browser process | [`process`] | own process group, SIGTERM then SIGKILL |
//! | Readiness | [`devtools`] | polls `/json/list` every 100ms |
//! | Protocol session | [`session`] | domains, device metrics, navigate, capture |
//! | Settle | [`settle`] | network idle vs. wait vs. deadline |
//! | JPEG comment | [`jpeg`] | single forward pass over the markers |
//!
//! One [`Deadline`] bounds every step; expiry or cancellation surfaces as a
//! [`ScreenshotError`] naming the step and URL.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webpage_screenshot::{screenshot, Config, OutputFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         full_page: true,
//!         output_format: OutputFormat::Jpeg,
//!         ..Config::for_url("https://example.com")
//!     };
//!     let image = screenshot(&config).await?;
//!     println!("Screenshot captured: {} bytes", image.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ### Single Screenshot
//! ```bash
//! webpage-screenshot capture https://example.com --output example.png --full-page
//! ```
//!
//! ### HTTP Server
//! ```bash
//! webpage-screenshot serve --port 8888 --metrics
//! curl -s -X POST http://127.0.0.1:8888/screenshot -d 'url=https://example.com'
//! ```
//!
//! ### Reading the URL back from a JPEG
//! ```bash
//! webpage-screenshot comment example.jpg
//! ```
//!
//! ### Tracking visual changes
//! ```bash
//! # first run stores the capture, later runs print the difference distance
//! webpage-screenshot diff https://www.example.com --dir ./archive
//! ```

/// Configuration and browser launch flags
pub mod config;

/// Error types for screenshot operations
pub mod error;

/// Deadline and cancellation shared by all capture steps
pub mod deadline;

/// Free TCP port allocation
pub mod port;

/// Browser profile directory handling
pub mod profile;

/// Browser process lifecycle and process tree termination
pub mod process;

/// DevTools HTTP endpoint: readiness and websocket discovery
pub mod devtools;

/// DevTools domains toggled before navigation
pub mod domains;

/// Post-load settle wait and network idle detection
pub mod settle;

/// DevTools protocol session driving one capture
pub mod session;

/// JPEG comment segment injection
pub mod jpeg;

/// Screenshot entry points
pub mod capture;

/// Command-line interface
pub mod cli;

/// HTTP server front end
pub mod server;

/// Metrics collection and Prometheus export
pub mod metrics;

/// Utility functions
pub mod utils;

/// Archive full page captures per URL and report visual changes.
pub mod diff;


pub use capture::*;
pub use cli::*;
pub use config::*;
pub use deadline::{Deadline, Interrupted};
pub use diff::{DiffError, DiffOutcome};
pub use error::*;
pub use self::metrics::*;
pub use port::*;
pub use process::{BrowserProcess, ChildEnumeration, ProcessTree};
#[cfg(unix)]
pub use process::PosixProcessGroup;
pub use profile::ProfileDirectory;
pub use settle::SettleOutcome;
pub use utils::*;
