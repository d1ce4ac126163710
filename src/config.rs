use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_LOG_FILE: &str = "request_log_http.log";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting `{0}` (config file or command line)")]
    Missing(&'static str),
    #[error("url list {0} contains no urls")]
    EmptyPool(PathBuf),
    #[error("asked for {requested} urls but the list only has {available}")]
    NotEnoughUrls { requested: usize, available: usize },
}

#[derive(Parser, Debug, Default)]
#[command(
    name = "zipfgen",
    version,
    about = "Replay HTTP GET traffic over a URL list with Zipf-Mandelbrot popularity"
)]
pub struct Cli {
    /// TOML run configuration; command-line values override it
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Newline-delimited list of target URLs
    #[arg(long)]
    pub url_file: Option<PathBuf>,
    /// Use only the first N URLs of the list
    #[arg(long = "urls", value_name = "N")]
    pub num_urls: Option<usize>,
    /// Number of requests to issue
    #[arg(long = "req", value_name = "N")]
    pub num_requests: Option<usize>,
    /// Target launch rate
    #[arg(long)]
    pub rps: Option<f64>,
    /// Zipf-Mandelbrot rank offset and exponent
    #[arg(long, num_args = 2, value_names = ["Q", "S"], allow_negative_numbers = true)]
    pub zipf: Option<Vec<f64>>,
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    /// Also export every record to an Arrow IPC file
    #[arg(long)]
    pub arrow_output: Option<PathBuf>,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Local address to bind outgoing connections to
    #[arg(long)]
    pub source_address: Option<IpAddr>,
    /// Fetch src/href resources of each page and count their bytes
    #[arg(long)]
    pub follow_embedded: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    pub source_address: Option<IpAddr>,
    pub follow_embedded: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            source_address: None,
            follow_embedded: false,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct FileConfig {
    pub url_file: Option<PathBuf>,
    pub num_urls: Option<usize>,
    pub num_requests: Option<usize>,
    pub requests_per_second: Option<f64>,
    pub q: Option<f64>,
    pub s: Option<f64>,
    pub log_file: Option<PathBuf>,
    pub arrow_output: Option<PathBuf>,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Read-only parameters of one dispatch run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunConfig {
    pub num_requests: usize,
    pub requests_per_second: f64,
    pub q: f64,
    pub s: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub url_file: PathBuf,
    pub num_urls: Option<usize>,
    pub run: RunConfig,
    pub log_file: PathBuf,
    pub arrow_output: Option<PathBuf>,
    pub http: HttpConfig,
}

pub fn load_config(path: &Path) -> Result<FileConfig> {
    let canonical = std::fs::canonicalize(path)
        .with_context(|| format!("config file {}", path.display()))?;
    let content = std::fs::read_to_string(&canonical)?;
    let cfg: FileConfig = toml::from_str(&content)
        .with_context(|| format!("parsing {}", canonical.display()))?;
    Ok(cfg)
}

/// Merges command-line values over the file values.
pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Settings, ConfigError> {
    let (cli_q, cli_s) = match cli.zipf.as_deref() {
        Some([q, s]) => (Some(*q), Some(*s)),
        _ => (None, None),
    };

    let mut http = file.http;
    if let Some(t) = cli.timeout_ms {
        http.timeout_ms = t;
    }
    if cli.source_address.is_some() {
        http.source_address = cli.source_address;
    }
    http.follow_embedded |= cli.follow_embedded;

    Ok(Settings {
        url_file: cli
            .url_file
            .clone()
            .or(file.url_file)
            .ok_or(ConfigError::Missing("url_file"))?,
        num_urls: cli.num_urls.or(file.num_urls),
        run: RunConfig {
            num_requests: cli
                .num_requests
                .or(file.num_requests)
                .ok_or(ConfigError::Missing("num_requests"))?,
            requests_per_second: cli
                .rps
                .or(file.requests_per_second)
                .ok_or(ConfigError::Missing("requests_per_second"))?,
            q: cli_q.or(file.q).ok_or(ConfigError::Missing("q"))?,
            s: cli_s.or(file.s).ok_or(ConfigError::Missing("s"))?,
        },
        log_file: cli
            .log_file
            .clone()
            .or(file.log_file)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        arrow_output: cli.arrow_output.clone().or(file.arrow_output),
        http,
    })
}

/// One URL per line; surrounding whitespace and blank lines are dropped.
pub fn parse_url_list(content: &str, limit: Option<usize>) -> Result<Vec<String>, ConfigError> {
    let mut urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if let Some(n) = limit {
        if n > urls.len() {
            return Err(ConfigError::NotEnoughUrls {
                requested: n,
                available: urls.len(),
            });
        }
        urls.truncate(n);
    }
    Ok(urls)
}

pub fn load_url_pool(path: &Path, limit: Option<usize>) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading url list {}", path.display()))?;
    let urls = parse_url_list(&content, limit)?;
    if urls.is_empty() {
        return Err(ConfigError::EmptyPool(path.to_path_buf()).into());
    }
    Ok(urls)
}
