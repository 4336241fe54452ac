//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ilmsdump_core::ilms::DEFAULT_TARGET_ORIGIN;
use ilmsdump_core::transport::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_RETRIES, REQUEST_TIMEOUT_SECS,
};
use ilmsdump_core::{RetryPolicy, engine::DEFAULT_REPORT_INTERVAL};
use url::Url;

use crate::cli::Args;

/// Environment variable naming the iLMS site to archive.
pub const TARGET_ORIGIN_ENV: &str = "ILMSDUMP_TARGET_ORIGIN";

/// Output directory used when neither the config file nor the CLI names one.
pub const DEFAULT_OUTPUT_DIR: &str = "ilmsdump.out";

/// Key = value file configuration for ilmsdump defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Site origin, e.g. `http://lms.csmu.edu.tw`.
    pub target_origin: Option<String>,
    /// Default output directory for credentials, items and checkpoints.
    pub output_dir: Option<PathBuf>,
    /// Total timeout of one request in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Retries of the transient status.
    pub max_retries: Option<u32>,
    /// Delay before the first retry in seconds.
    pub retry_initial_delay_secs: Option<u64>,
    /// Multiplier applied to the delay after each retry.
    pub retry_backoff_factor: Option<u32>,
    /// Status line refresh period in milliseconds.
    pub report_interval_ms: Option<u64>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        validate_range("request_timeout_secs", self.request_timeout_secs, 1, 3600)?;
        validate_range(
            "max_retries",
            self.max_retries.map(u64::from),
            0,
            10,
        )?;
        validate_range(
            "retry_initial_delay_secs",
            self.retry_initial_delay_secs,
            0,
            600,
        )?;
        validate_range(
            "retry_backoff_factor",
            self.retry_backoff_factor.map(u64::from),
            1,
            10,
        )?;
        validate_range("report_interval_ms", self.report_interval_ms, 50, 10_000)?;
        if let Some(origin) = &self.target_origin {
            parse_origin(origin)
                .with_context(|| format!("Invalid config value for `target_origin`: {origin}"))?;
        }
        Ok(())
    }
}

fn validate_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

fn parse_origin(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        bail!("Expected an http(s) origin");
    }
    Ok(url)
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/ilmsdump/config.toml`
/// 2. `$HOME/.config/ilmsdump/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("ilmsdump")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("ilmsdump")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file named by `--config`, or the default one if present.
///
/// An explicit path must exist; the default path is optional.
pub fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return read_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "target_origin" => {
                cfg.target_origin = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "output_dir" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.output_dir = Some(PathBuf::from(parsed));
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "max_retries" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("max_retries out of range for u32"))?;
                cfg.max_retries = Some(n);
            }
            "retry_initial_delay_secs" => {
                cfg.retry_initial_delay_secs =
                    Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "retry_backoff_factor" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let n = u32::try_from(parsed)
                    .map_err(|_| anyhow::anyhow!("retry_backoff_factor out of range for u32"))?;
                cfg.retry_backoff_factor = Some(n);
            }
            "report_interval_ms" => {
                cfg.report_interval_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

/// Effective settings of one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Site to archive.
    pub target_origin: Url,
    /// Data directory.
    pub output_dir: PathBuf,
    /// Total timeout of one request.
    pub request_timeout: Duration,
    /// Retry policy of the transport.
    pub retry_policy: RetryPolicy,
    /// Status line refresh period.
    pub report_interval: Duration,
}

/// Layers defaults < config file < environment < CLI flags.
pub fn resolve_settings(
    args: &Args,
    file: Option<&FileConfig>,
    env_origin: Option<&str>,
) -> Result<Settings> {
    let file = file.cloned().unwrap_or_default();

    let origin = env_origin
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or(file.target_origin)
        .unwrap_or_else(|| DEFAULT_TARGET_ORIGIN.to_string());
    let target_origin = parse_origin(&origin)
        .with_context(|| format!("Invalid target origin '{origin}'"))?;

    let output_dir = args
        .output_dir
        .clone()
        .or(file.output_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

    let retry_policy = RetryPolicy::new(
        file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        file.retry_initial_delay_secs
            .map_or(DEFAULT_INITIAL_DELAY, Duration::from_secs),
        file.retry_backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR),
    );

    Ok(Settings {
        target_origin,
        output_dir,
        request_timeout: Duration::from_secs(
            file.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS),
        ),
        retry_policy,
        report_interval: file
            .report_interval_ms
            .map_or(DEFAULT_REPORT_INTERVAL, Duration::from_millis),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
# ilmsdump defaults
output_dir = "/data/ilms"   # archive
max_retries = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/data/ilms")));
        assert_eq!(cfg.max_retries, Some(5));
        assert_eq!(cfg.request_timeout_secs, None);
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"target_origin = "https://lms.example.edu"
output_dir = "out"
request_timeout_secs = 30
max_retries = 0
retry_initial_delay_secs = 1
retry_backoff_factor = 2
report_interval_ms = 250"#,
        )
        .unwrap();
        assert_eq!(cfg.target_origin.as_deref(), Some("https://lms.example.edu"));
        assert_eq!(cfg.request_timeout_secs, Some(30));
        assert_eq!(cfg.max_retries, Some(0));
        assert_eq!(cfg.retry_initial_delay_secs, Some(1));
        assert_eq!(cfg.retry_backoff_factor, Some(2));
        assert_eq!(cfg.report_interval_ms, Some(250));
    }

    #[test]
    fn test_parse_config_hash_inside_string_is_kept() {
        let cfg = parse_config_str(r#"output_dir = "dump#1""#).unwrap();
        assert_eq!(cfg.output_dir, Some(PathBuf::from("dump#1")));
    }

    #[test]
    fn test_parse_config_unknown_key_reports_line() {
        let err = parse_config_str("max_retries = 1\nthreads = 4").unwrap_err();
        assert!(err.to_string().contains("Unknown configuration key: 'threads' on line 2"));
    }

    #[test]
    fn test_parse_config_missing_equals() {
        let err = parse_config_str("output_dir").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_parse_config_unquoted_string_rejected() {
        let err = parse_config_str("output_dir = out").unwrap_err();
        assert!(format!("{err:#}").contains("Expected double-quoted string"));
    }

    #[test]
    fn test_parse_config_out_of_range_rejected() {
        let err = parse_config_str("max_retries = 11").unwrap_err();
        assert!(err.to_string().contains("Expected range: 0..=10"));

        let err = parse_config_str("report_interval_ms = 10").unwrap_err();
        assert!(err.to_string().contains("report_interval_ms"));

        assert!(parse_config_str("retry_backoff_factor = 0").is_err());
        assert!(parse_config_str("request_timeout_secs = -1").is_err());
    }

    #[test]
    fn test_parse_config_bad_origin_rejected() {
        assert!(parse_config_str(r#"target_origin = "ftp://lms.example""#).is_err());
        assert!(parse_config_str(r#"target_origin = "not a url""#).is_err());
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let err = load_file_config(Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_load_explicit_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "max_retries = 2\n").unwrap();
        let cfg = load_file_config(Some(&path)).unwrap().unwrap();
        assert_eq!(cfg.max_retries, Some(2));
    }

    #[test]
    fn test_resolve_settings_defaults() {
        let args = Args::try_parse_from(["ilmsdump"]).unwrap();
        let settings = resolve_settings(&args, None, None).unwrap();
        assert_eq!(settings.target_origin.as_str(), "http://lms.csmu.edu.tw/");
        assert_eq!(settings.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(settings.request_timeout, Duration::from_secs(80));
        assert_eq!(settings.retry_policy.max_retries(), 3);
        assert_eq!(settings.retry_policy.delay_for(0), Duration::from_secs(5));
        assert_eq!(settings.report_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_resolve_settings_layering() {
        let file = FileConfig {
            target_origin: Some("http://file.example".to_string()),
            output_dir: Some(PathBuf::from("from-file")),
            max_retries: Some(1),
            ..FileConfig::default()
        };

        let args = Args::try_parse_from(["ilmsdump"]).unwrap();
        let settings = resolve_settings(&args, Some(&file), None).unwrap();
        assert_eq!(settings.target_origin.as_str(), "http://file.example/");
        assert_eq!(settings.output_dir, PathBuf::from("from-file"));
        assert_eq!(settings.retry_policy.max_retries(), 1);

        let args = Args::try_parse_from(["ilmsdump", "-o", "from-cli"]).unwrap();
        let settings = resolve_settings(&args, Some(&file), Some("http://env.example")).unwrap();
        assert_eq!(settings.target_origin.as_str(), "http://env.example/");
        assert_eq!(settings.output_dir, PathBuf::from("from-cli"));
    }

    #[test]
    fn test_resolve_settings_rejects_bad_env_origin() {
        let args = Args::try_parse_from(["ilmsdump"]).unwrap();
        assert!(resolve_settings(&args, None, Some("lms.example")).is_err());
    }
}
