use crate::diff::{capture_and_compare, DiffOutcome};
use crate::server::{self, AppState};
use crate::{
    default_output_path, format_bytes, install_prometheus, jpeg, screenshot_with_cancel, Config,
    OutputFormat, Padding, ProfileDir, Viewport,
};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "webpage-screenshot")]
#[command(about = "Screenshots of web pages through a headless Chrome")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<PathBuf>,

    #[arg(long, global = true, help = "Deadline for one capture in seconds")]
    pub deadline: Option<u64>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Take a single screenshot
    Capture(CaptureOptions),

    /// Serve screenshots over HTTP
    Serve {
        #[arg(short, long, default_value = "8888", help = "Server port")]
        port: u16,

        #[arg(long, help = "Bind address (default: 0.0.0.0)")]
        bind: Option<String>,

        #[arg(long, help = "Expose Prometheus metrics on /metrics")]
        metrics: bool,
    },

    /// Print the URL comments embedded in a JPEG screenshot
    Comment {
        #[arg(help = "JPEG file")]
        path: PathBuf,
    },

    /// Store a full page capture of a URL, or compare it with the stored one
    Diff {
        #[arg(help = "URL to track")]
        url: String,

        #[arg(long, default_value = ".", help = "Archive root directory")]
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct CaptureOptions {
    #[arg(help = "URL to screenshot")]
    pub url: String,

    #[arg(short, long, help = "Output file path (default: derived from the URL)")]
    pub output: Option<PathBuf>,

    #[arg(long, help = "Write the image to stdout as base64 instead of a file")]
    pub base64: bool,

    #[arg(long, help = "Output format (png, jpeg)")]
    pub format: Option<OutputFormat>,

    #[arg(long, help = "JPEG quality (0-100)")]
    pub quality: Option<u8>,

    #[arg(long, help = "Do not embed the URL as a JPEG comment")]
    pub no_url_comment: bool,

    #[arg(long, help = "Viewport width")]
    pub width: Option<u32>,

    #[arg(long, help = "Viewport height")]
    pub height: Option<u32>,

    #[arg(long, help = "Take full page screenshot")]
    pub full_page: bool,

    #[arg(
        long,
        value_delimiter = ',',
        value_name = "LEFT,TOP,RIGHT,BOTTOM",
        help = "Clip padding in pixels"
    )]
    pub padding: Option<Vec<u32>>,

    #[arg(long, help = "Wait time in milliseconds before taking screenshot")]
    pub wait: Option<u64>,

    #[arg(long, help = "Do not stop waiting early when the network goes idle")]
    pub no_network_idle: bool,

    #[arg(long, help = "Network quiet window in milliseconds")]
    pub idle_window: Option<u64>,

    #[arg(long, help = "User-Agent override")]
    pub user_agent: Option<String>,

    #[arg(long, help = "Accept-Language (browser --lang)")]
    pub accept_language: Option<String>,

    #[arg(long, help = "Fixed browser profile directory (kept after the capture)")]
    pub profile_dir: Option<PathBuf>,

    #[arg(long, help = "DevTools host")]
    pub host: Option<String>,

    #[arg(long, help = "DevTools port (default: a free port)")]
    pub port: Option<u16>,

    #[arg(
        long = "flag",
        allow_hyphen_values = true,
        help = "Extra browser flag, may be repeated"
    )]
    pub extra_flags: Vec<String>,
}

impl CaptureOptions {
    /// Layer these options over `config`.
    pub fn apply(&self, mut config: Config) -> Result<Config> {
        config.url = self.url.clone();

        if let Some(format) = self.format {
            config.output_format = format;
        }
        if let Some(quality) = self.quality {
            config.jpeg_quality = quality;
        }
        if self.no_url_comment {
            config.embed_url_comment = false;
        }
        if self.width.is_some() || self.height.is_some() {
            config.viewport = Viewport::new(
                self.width.unwrap_or(config.viewport.width),
                self.height.unwrap_or(config.viewport.height),
            );
        }
        if self.full_page {
            config.full_page = true;
        }
        if let Some(padding) = &self.padding {
            let &[left, top, right, bottom] = padding.as_slice() else {
                bail!("--padding takes exactly four values");
            };
            config.padding = Padding {
                left,
                top,
                right,
                bottom,
            };
        }
        if let Some(wait) = self.wait {
            config.wait = Duration::from_millis(wait);
        }
        if self.no_network_idle {
            config.network_idle = false;
        }
        if let Some(window) = self.idle_window {
            config.network_idle_window = Duration::from_millis(window);
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = Some(user_agent.clone());
        }
        if let Some(language) = &self.accept_language {
            config.accept_language = Some(language.clone());
        }
        if let Some(dir) = &self.profile_dir {
            config.profile = ProfileDir::Fixed(dir.clone());
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.extra_flags.extend(self.extra_flags.iter().cloned());

        config.validate()?;
        Ok(config)
    }
}

pub struct CliRunner {
    pub config: Config,
    pub shutdown: CancellationToken,
}

impl CliRunner {
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Capture(options) => self.run_capture(options).await,
            Commands::Serve {
                port,
                bind,
                metrics,
            } => self.run_server(port, bind, metrics).await,
            Commands::Comment { path } => self.show_comments(path).await,
            Commands::Diff { url, dir } => self.run_diff(url, dir).await,
        }
    }

    pub async fn run_capture(&self, options: CaptureOptions) -> Result<()> {
        let config = options.apply(self.config.clone())?;
        info!("Taking screenshot of: {}", config.url);

        let image = screenshot_with_cancel(&config, self.shutdown.child_token()).await?;

        if options.base64 {
            println!("{}", STANDARD.encode(&image));
            return Ok(());
        }

        let output = options
            .output
            .unwrap_or_else(|| default_output_path(&config.url, config.output_format));
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&output, &image)
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;

        println!("Screenshot captured successfully:");
        println!("  URL: {}", config.url);
        println!("  Output: {}", output.display());
        println!("  Format: {:?}", config.output_format);
        println!("  Size: {}", format_bytes(image.len()));

        Ok(())
    }

    pub async fn run_server(&self, port: u16, bind: Option<String>, metrics: bool) -> Result<()> {
        let ip = bind.as_deref().unwrap_or("0.0.0.0");
        let addr: SocketAddr = format!("{ip}:{port}")
            .parse()
            .with_context(|| format!("invalid bind address {ip}"))?;

        let metrics = if metrics {
            Some(install_prometheus().context("failed to install metrics recorder")?)
        } else {
            None
        };

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let state = AppState::new(self.config.clone(), metrics, self.shutdown.clone());

        server::serve(listener, state).await?;
        info!("Server stopped");
        Ok(())
    }

    pub async fn run_diff(&self, url: String, dir: PathBuf) -> Result<()> {
        let config = Config {
            url,
            ..self.config.clone()
        };
        info!("Tracking: {}", config.url);

        match capture_and_compare(&config, &dir, self.shutdown.child_token()).await? {
            DiffOutcome::Saved(path) => {
                println!("New screenshot saved: {}", path.display());
            }
            DiffOutcome::Compared { path, distance } => {
                println!("Compared with: {}", path.display());
                println!("Image difference distance: {distance}");
            }
        }

        Ok(())
    }

    pub async fn show_comments(&self, path: PathBuf) -> Result<()> {
        let data = fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let comments = jpeg::comments(&data)
            .with_context(|| format!("{} is not a readable JPEG", path.display()))?;

        if comments.is_empty() {
            println!("No comments in {}", path.display());
        }
        for comment in comments {
            println!("{}", decode_comment(&comment));
        }

        Ok(())
    }
}

/// Comments written by this tool hold a base64 encoded URL; anything else is
/// shown as text.
pub fn decode_comment(comment: &[u8]) -> String {
    STANDARD
        .decode(comment)
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(comment).into_owned())
}

pub fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_capture_options_layer_over_config() {
        let cli = parse(&[
            "webpage-screenshot",
            "capture",
            "https://example.com",
            "--format",
            "jpeg",
            "--quality",
            "95",
            "--width",
            "800",
            "--full-page",
            "--padding",
            "1,2,3,4",
            "--wait",
            "250",
            "--flag",
            "--mute-audio",
            "--flag=--disable-sync",
        ]);
        let Commands::Capture(options) = cli.command else {
            panic!("expected capture");
        };

        let config = options.apply(Config::default()).unwrap();
        assert_eq!(config.url, "https://example.com");
        assert_eq!(config.output_format, OutputFormat::Jpeg);
        assert_eq!(config.jpeg_quality, 95);
        assert_eq!(config.viewport, Viewport::new(800, 1080));
        assert!(config.full_page);
        assert_eq!(
            config.padding,
            Padding {
                left: 1,
                top: 2,
                right: 3,
                bottom: 4
            }
        );
        assert_eq!(config.wait, Duration::from_millis(250));
        assert_eq!(config.extra_flags, vec!["--mute-audio", "--disable-sync"]);
    }

    #[test]
    fn test_capture_options_keep_file_values() {
        let base = Config {
            wait: Duration::from_secs(9),
            network_idle: false,
            ..Config::default()
        };
        let options = CaptureOptions {
            url: "https://example.com".to_string(),
            ..Default::default()
        };

        let config = options.apply(base).unwrap();
        assert_eq!(config.wait, Duration::from_secs(9));
        assert!(!config.network_idle);
        assert_eq!(config.profile, ProfileDir::Random);
    }

    #[test]
    fn test_capture_options_validate() {
        let options = CaptureOptions {
            url: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(options.apply(Config::default()).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&[
            "webpage-screenshot",
            "serve",
            "--port",
            "9000",
            "--deadline",
            "60",
            "--verbose",
        ]);
        assert_eq!(cli.deadline, Some(60));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { port: 9000, .. }));
    }

    #[test]
    fn test_diff_command_defaults_to_current_dir() {
        let cli = parse(&["webpage-screenshot", "diff", "https://example.com"]);
        let Commands::Diff { url, dir } = cli.command else {
            panic!("expected diff");
        };
        assert_eq!(url, "https://example.com");
        assert_eq!(dir, PathBuf::from("."));

        let cli = parse(&[
            "webpage-screenshot",
            "diff",
            "https://example.com",
            "--dir",
            "/var/archive",
        ]);
        assert!(matches!(
            cli.command,
            Commands::Diff { dir, .. } if dir == PathBuf::from("/var/archive")
        ));
    }

    #[test]
    fn test_decode_comment() {
        assert_eq!(
            decode_comment(b"aHR0cHM6Ly9leGFtcGxlLmNvbQ=="),
            "https://example.com"
        );
        assert_eq!(decode_comment(b"plain text!"), "plain text!");
    }
}
