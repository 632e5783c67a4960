//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheConfig, MAX_DURATION_SECONDS};

mod cli;

pub use cli::{CacheOverrides, CliArgs, Command, ConfigArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "supercache";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_SITE_URL: &str = "http://localhost:3000/";
const DEFAULT_LOCALE: &str = "en";
const DEFAULT_AUTH_COOKIE: &str = "sc_session";
const DEFAULT_SECTIONS: [&str; 3] = ["home", "board", "notice"];

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// The site the cache fronts.
#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Canonical URL; its host is the only one admitted unless aliased.
    pub default_url: Url,
    pub aliases: Vec<String>,
    /// Section names, seeded as scopes `1..=n` in order.
    pub sections: Vec<String>,
    /// Section rendered at `/`.
    pub index_section: String,
    pub locale: String,
    /// Cookie whose presence marks the caller as authenticated.
    pub auth_cookie: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("SUPERCACHE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("site.aliases")
            .with_list_parse_key("site.sections")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Config(args)) => raw.apply_cache_overrides(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    cache: CacheConfig,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.site_default_url.as_ref() {
            self.site.default_url = Some(url.clone());
        }
        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(seconds) = overrides.duration_seconds {
            self.cache.duration_seconds = seconds;
        }
        if let Some(percent) = overrides.stampede_percent {
            self.cache.stampede_percent = percent;
        }
        if let Some(enabled) = overrides.enabled {
            self.cache.enabled = enabled;
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            site,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            site: build_site_settings(site)?,
            cache: build_cache_settings(cache)?,
        })
    }

    /// Scope id of the section rendered at `/`.
    pub fn index_scope_id(&self) -> u64 {
        self.site
            .sections
            .iter()
            .position(|name| *name == self.site.index_section)
            .map_or(1, |index| index as u64 + 1)
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    let addr =
        parse_socket_addr(&host, port).map_err(|err| LoadError::invalid("server.host", err))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let raw_url = site
        .default_url
        .unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
    let default_url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("site.default_url", format!("failed to parse: {err}")))?;
    if !matches!(default_url.scheme(), "http" | "https") || default_url.host_str().is_none() {
        return Err(LoadError::invalid(
            "site.default_url",
            "must be an absolute http(s) URL",
        ));
    }

    let sections = site
        .sections
        .unwrap_or_else(|| DEFAULT_SECTIONS.iter().map(|name| name.to_string()).collect());
    if sections.is_empty() {
        return Err(LoadError::invalid("site.sections", "must not be empty"));
    }
    if let Some(bad) = sections.iter().find(|name| !is_section_name(name)) {
        return Err(LoadError::invalid(
            "site.sections",
            format!("`{bad}` is not a valid section name"),
        ));
    }

    let index_section = site
        .index_section
        .unwrap_or_else(|| sections[0].clone());
    if !sections.contains(&index_section) {
        return Err(LoadError::invalid(
            "site.index_section",
            format!("`{index_section}` is not one of the configured sections"),
        ));
    }

    let aliases = site
        .aliases
        .unwrap_or_default()
        .into_iter()
        .map(|alias| alias.trim().to_ascii_lowercase())
        .filter(|alias| !alias.is_empty())
        .collect();

    Ok(SiteSettings {
        default_url,
        aliases,
        sections,
        index_section,
        locale: site.locale.unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
        auth_cookie: site
            .auth_cookie
            .unwrap_or_else(|| DEFAULT_AUTH_COOKIE.to_string()),
    })
}

fn build_cache_settings(cache: CacheConfig) -> Result<CacheConfig, LoadError> {
    if cache.duration_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.duration_seconds",
            "must be greater than zero",
        ));
    }
    if cache.duration_seconds > MAX_DURATION_SECONDS {
        return Err(LoadError::invalid(
            "cache.duration_seconds",
            format!("must not exceed {MAX_DURATION_SECONDS} (one year)"),
        ));
    }
    if cache.stampede_percent > 100 {
        return Err(LoadError::invalid(
            "cache.stampede_percent",
            "must be between 0 and 100",
        ));
    }
    if cache.consume_batch_limit == 0 {
        return Err(LoadError::invalid(
            "cache.consume_batch_limit",
            "must be greater than zero",
        ));
    }
    Ok(cache)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    default_url: Option<String>,
    aliases: Option<Vec<String>>,
    sections: Option<Vec<String>>,
    index_section: Option<String>,
    locale: Option<String>,
    auth_cookie: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn is_section_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
        && !name.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
