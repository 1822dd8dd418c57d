//!
//! src/config.rs
//!
//! Environment-driven configuration for every collaborator the sync
//! talks to: the loved-list page, the Google Sheets row store and the
//! Spotify catalog
//!

use std::time;
use url::Url;
use crate::errors::SyncError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_ATTEMPTS: u8 = 4;
pub const RETRY_BASE_BACKOFF: u64 = 250;
pub const RETRY_JITTER: bool = true;
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub const DEFAULT_MATCH_CONCURRENCY: usize = 4;

/// Wrapper over env::var to return an invalid environment var error
fn env_check(s: &str) -> Result<String, SyncError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(SyncError::Config(format!("{s} was not set"))),
    }
}

fn env_opt(s: &str) -> Option<String> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn env_to_usize(s: &str, default: usize) -> usize {
    match std::env::var(s) {
        Ok(v) => v.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

/// Configuration for the loved-list scrape target
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub loved_list_base: Url,
    pub user_agent: String,
}

fn build_scrape() -> Result<ScrapeConfig, SyncError> {
    let base = std::env::var("LOVED_LIST_BASE")
        .unwrap_or_else(|_| "https://theneedledrop.com/loved-list/".to_string());

    let mut base = Url::parse(&base)
        .map_err(|e| SyncError::Config(format!("LOVED_LIST_BASE invalid: {e}")))?;

    ensure_https(&base).map_err(SyncError::Config)?;
    ensure_trailing_slash(&mut base);

    let user_agent = std::env::var("SCRAPE_USER_AGENT")
        .unwrap_or_else(|_| format!("loved-sync/{}", env!("CARGO_PKG_VERSION")));

    Ok( ScrapeConfig { loved_list_base: base, user_agent } )
}

/// Configuration for the Google Sheets row store
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub token_url: Url,
    pub api_base: Url,
    pub spreadsheet_id: String,
    pub sheet_name: String,   // tab holding the scraped-track log
    pub row_range: String,    // data rows below the header, e.g. A2:F
}

fn build_sheets() -> Result<SheetsConfig, SyncError> {
    let client_id     = env_check("SHEETS_CLIENT_ID")?;
    let client_secret = env_check("SHEETS_CLIENT_SECRET")?;
    let refresh_token = env_check("SHEETS_REFRESH_TOKEN")?;
    let spreadsheet_id = env_check("SHEETS_SPREADSHEET_ID")?;

    let token_url = std::env::var("SHEETS_TOKEN_URL")
        .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string());
    let api_base = std::env::var("SHEETS_API_BASE")
        .unwrap_or_else(|_| "https://sheets.googleapis.com/v4/spreadsheets/".to_string());

    let token_url = Url::parse(&token_url)
        .map_err(|e| SyncError::Config(format!("SHEETS_TOKEN_URL invalid: {e}")))?;
    let mut api_base = Url::parse(&api_base)
        .map_err(|e| SyncError::Config(format!("SHEETS_API_BASE invalid: {e}")))?;

    ensure_https(&token_url).map_err(SyncError::Config)?;
    ensure_https(&api_base).map_err(SyncError::Config)?;
    ensure_host(&token_url, "oauth2.googleapis.com")
        .map_err(SyncError::Config)?;
    ensure_host(&api_base, "sheets.googleapis.com")
        .map_err(SyncError::Config)?;
    ensure_trailing_slash(&mut api_base);

    let sheet_name = std::env::var("SHEETS_SHEET_NAME")
        .unwrap_or_else(|_| "Scraped Tracks".to_string());
    let row_range = std::env::var("SHEETS_ROW_RANGE")
        .unwrap_or_else(|_| "A2:F".to_string());

    Ok( SheetsConfig {
        client_id,
        client_secret,
        refresh_token,
        token_url,
        api_base,
        spreadsheet_id,
        sheet_name,
        row_range,
    })
}

/// Configuration that Spotify expects when hitting endpoints
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub user_id: String,
    pub token_url: Url,
    pub api_base: Url,
    pub playlist_name_prefix: Option<String>,
}

fn build_spotify() -> Result<SpotifyConfig, SyncError> {
    let client_id     = env_check("SPOTIFY_CLIENT_ID")?;
    let client_secret = env_check("SPOTIFY_CLIENT_SECRET")?;
    let refresh_token = env_check("SPOTIFY_REFRESH_TOKEN")?;
    let user_id       = env_check("SPOTIFY_USER_ID")?;

    let token_url = std::env::var("SPOTIFY_TOKEN_URL")
        .unwrap_or_else(|_| "https://accounts.spotify.com/api/token".to_string());
    let api_base  = std::env::var("SPOTIFY_API_BASE")
        .unwrap_or_else(|_| "https://api.spotify.com/v1/".to_string());

    let token_url = Url::parse(&token_url)
        .map_err(|e| SyncError::Config(format!("SPOTIFY_TOKEN_URL invalid: {e}")))?;
    let mut api_base = Url::parse(&api_base)
        .map_err(|e| SyncError::Config(format!("SPOTIFY_API_BASE invalid: {e}")))?;

    ensure_https(&token_url).map_err(SyncError::Config)?;
    ensure_https(&api_base).map_err(SyncError::Config)?;
    ensure_host(&token_url, "accounts.spotify.com")
        .map_err(SyncError::Config)?;
    ensure_host(&api_base, "api.spotify.com")
        .map_err(SyncError::Config)?;
    ensure_trailing_slash(&mut api_base);

    // playlist building is the optional terminal step; unset means skip it
    let playlist_name_prefix = env_opt("PLAYLIST_NAME_PREFIX");

    Ok( SpotifyConfig {
        client_id,
        client_secret,
        refresh_token,
        user_id,
        token_url,
        api_base,
        playlist_name_prefix,
    })
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_backoff: time::Duration,
    pub jitter: bool,
    pub retryable_statuses: Vec<u16>
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff: time::Duration::from_millis(RETRY_BASE_BACKOFF),
            jitter: RETRY_JITTER,
            retryable_statuses: RETRYABLE_STATUSES.to_vec()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: time::Duration,
    pub connect_timeout: time::Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: time::Duration,
    pub max_redirects: u8,
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: time::Duration::from_millis(HTTP_TIMEOUT),
            connect_timeout: time::Duration::from_millis(HTTP_CONNECT_TIMEOUT),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: time::Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT),
            max_redirects: HTTP_MAX_REDIRECTS,
            retry: RetryConfig::default()
        }
    }
}

///
/// Configuration for the matching phase. Each catalog lookup is
/// independent so they run under a bounded worker pool; staged-row
/// order is reassembled by scrape index afterwards.
///
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyConfig {
    pub match_concurrency: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { match_concurrency: DEFAULT_MATCH_CONCURRENCY }
    }
}

fn build_concurrency() -> ConcurrencyConfig {
    ConcurrencyConfig {
        match_concurrency: env_to_usize(
            "MATCH_CONCURRENCY", DEFAULT_MATCH_CONCURRENCY
        ).max(1),
    }
}

///
/// Configuration for Logger
///
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub include_file_line: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,loved_sync=debug,reqwest=warn".to_string(),
            include_file_line: true,
            include_target: true,
        }
    }
}

///
/// AppConfig which holds everything the collaborators need
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub scrape: ScrapeConfig,
    pub sheets: SheetsConfig,
    pub spotify: SpotifyConfig,
    pub http: HttpConfig,
    pub concurrency: ConcurrencyConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, SyncError> {
    dotenvy::dotenv().ok();

    let scrape      = build_scrape()?;
    let sheets      = build_sheets()?;
    let spotify     = build_spotify()?;
    let http        = HttpConfig::default();
    let concurrency = build_concurrency();
    let logging     = LoggingConfig::default();

    Ok( AppConfig { scrape, sheets, spotify, http, concurrency, logging } )
}
