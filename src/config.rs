// =============================================================================
// config.rs - THE REACTOR'S CONTROL PANEL
// =============================================================================
//
// Configuration lives in an ini file:
//
//   [syslog]
//   host = 10.0.0.5
//   port = 514
//   name = qradar
//   max  = 0
//
// plus optional [paths], [pastebin], [otx], [runner], [http], [breaker] and
// [status] sections. Anything in the file can be overridden from the
// environment as ARCREACTOR_<SECTION>__<KEY>, e.g. ARCREACTOR_SYSLOG__HOST.
// A .env file is read first if one is lying around.
// =============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ReactorError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/opt/arcreactor/conf/reactor.conf";

/// Fully resolved configuration for one process.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // SIEM
    // =========================================================================
    pub siem_host: String,
    pub siem_port: u16,
    /// Label for the SIEM in log lines.
    pub siem_name: String,
    /// Upper bound on findings reported per module run. 0 means no limit.
    pub siem_max: u64,

    // =========================================================================
    // FILES
    // =========================================================================
    pub keywords_path: PathBuf,
    pub sources_path: PathBuf,
    pub log_path: PathBuf,

    // =========================================================================
    // COLLECTION ENDPOINTS
    // =========================================================================
    pub pastebin_archive_url: String,
    pub pastebin_raw_url: String,
    pub otx_feed_url: String,

    // =========================================================================
    // RUNNER / HTTP / CIRCUIT BREAKER
    // =========================================================================
    /// How many fetch passes a run may make while its pending queue drains.
    pub max_fetch_passes: u32,
    pub pass_delay: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_timeout: Duration,

    /// Port for the JSON status endpoint. 0 disables it.
    pub status_port: u16,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    syslog: SyslogSection,
    #[serde(default)]
    paths: PathsSection,
    #[serde(default)]
    pastebin: PastebinSection,
    #[serde(default)]
    otx: OtxSection,
    #[serde(default)]
    runner: RunnerSection,
    #[serde(default)]
    http: HttpSection,
    #[serde(default)]
    breaker: BreakerSection,
    #[serde(default)]
    status: StatusSection,
}

#[derive(Debug, Deserialize)]
struct SyslogSection {
    host: String,
    port: u16,
    #[serde(default = "default_siem_name")]
    name: String,
    #[serde(default)]
    max: u64,
}

fn default_siem_name() -> String {
    "siem".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PathsSection {
    keywords: PathBuf,
    sources: PathBuf,
    log: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            keywords: PathBuf::from("/opt/arcreactor/conf/keywords.conf"),
            sources: PathBuf::from("/opt/arcreactor/conf/sources.conf"),
            log: PathBuf::from("/opt/arcreactor/var/logs/reactor.log"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PastebinSection {
    archive_url: String,
    raw_url: String,
}

impl Default for PastebinSection {
    fn default() -> Self {
        Self {
            archive_url: "https://pastebin.com/archive".to_string(),
            raw_url: "https://pastebin.com/raw".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct OtxSection {
    feed_url: String,
}

impl Default for OtxSection {
    fn default() -> Self {
        Self {
            feed_url: "https://reputation.alienvault.com/reputation.data".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RunnerSection {
    max_fetch_passes: u32,
    pass_delay_secs: u64,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            max_fetch_passes: 8,
            pass_delay_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HttpSection {
    timeout_secs: u64,
    user_agent: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            user_agent: "ArcReactor/1.0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BreakerSection {
    failure_threshold: u32,
    reset_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_secs: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusSection {
    port: u16,
}

impl Config {
    /// Load the ini file at `path`, then apply environment overrides.
    ///
    /// A missing file is [`ReactorError::ConfigMissing`]; a file without
    /// `[syslog] host`/`port`, or with values of the wrong type, is
    /// [`ReactorError::Config`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let _ = dotenvy::dotenv();

        if !path.exists() {
            return Err(ReactorError::ConfigMissing {
                path: path.display().to_string(),
            });
        }

        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Ini)
                    .required(true),
            )
            .add_source(
                ::config::Environment::with_prefix("ARCREACTOR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let raw: RawConfig = settings.try_deserialize()?;
        raw.resolve()
    }
}

impl RawConfig {
    fn resolve(self) -> Result<Config> {
        if self.syslog.host.trim().is_empty() {
            return Err(ReactorError::Config("syslog.host is empty".to_string()));
        }
        if self.syslog.port == 0 {
            return Err(ReactorError::Config("syslog.port must be non-zero".to_string()));
        }
        if self.runner.max_fetch_passes == 0 {
            return Err(ReactorError::Config(
                "runner.max_fetch_passes must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            siem_host: self.syslog.host.trim().to_string(),
            siem_port: self.syslog.port,
            siem_name: self.syslog.name,
            siem_max: self.syslog.max,
            keywords_path: self.paths.keywords,
            sources_path: self.paths.sources,
            log_path: self.paths.log,
            pastebin_archive_url: self.pastebin.archive_url,
            pastebin_raw_url: self.pastebin.raw_url.trim_end_matches('/').to_string(),
            otx_feed_url: self.otx.feed_url,
            max_fetch_passes: self.runner.max_fetch_passes,
            pass_delay: Duration::from_secs(self.runner.pass_delay_secs),
            http_timeout: Duration::from_secs(self.http.timeout_secs),
            user_agent: self.http.user_agent,
            breaker_failure_threshold: self.breaker.failure_threshold,
            breaker_reset_timeout: Duration::from_secs(self.breaker.reset_secs),
            status_port: self.status.port,
        })
    }
}

#[cfg(test)]
impl Config {
    /// Defaults for every section with the given SIEM endpoint.
    pub(crate) fn for_siem(host: &str, port: u16) -> Self {
        RawConfig {
            syslog: SyslogSection {
                host: host.to_string(),
                port,
                name: default_siem_name(),
                max: 0,
            },
            paths: PathsSection::default(),
            pastebin: PastebinSection::default(),
            otx: OtxSection::default(),
            runner: RunnerSection {
                max_fetch_passes: 4,
                pass_delay_secs: 0,
            },
            http: HttpSection::default(),
            breaker: BreakerSection::default(),
            status: StatusSection::default(),
        }
        .resolve()
        .expect("test config is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn ini(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".conf").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_syslog_section() {
        let file = ini("[syslog]\nhost = 127.0.0.1\nport = 5141\nname = qradar\nmax = 250\n");
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.siem_host, "127.0.0.1");
        assert_eq!(config.siem_port, 5141);
        assert_eq!(config.siem_name, "qradar");
        assert_eq!(config.siem_max, 250);
        assert_eq!(config.max_fetch_passes, 8);
        assert_eq!(config.pass_delay, Duration::from_secs(5));
        assert_eq!(config.status_port, 0);
        assert_eq!(config.pastebin_raw_url, "https://pastebin.com/raw");
    }

    #[test]
    fn test_optional_sections_override_defaults() {
        let file = ini(
            "[syslog]\nhost = siem.local\nport = 514\n\n\
             [paths]\nkeywords = /tmp/kw.conf\nsources = /tmp/src.conf\nlog = /tmp/reactor.log\n\n\
             [pastebin]\nraw_url = http://127.0.0.1:8080/raw/\n\n\
             [runner]\nmax_fetch_passes = 3\npass_delay_secs = 0\n",
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.keywords_path, PathBuf::from("/tmp/kw.conf"));
        assert_eq!(config.sources_path, PathBuf::from("/tmp/src.conf"));
        assert_eq!(config.pastebin_raw_url, "http://127.0.0.1:8080/raw");
        assert_eq!(config.max_fetch_passes, 3);
        assert_eq!(config.pass_delay, Duration::ZERO);
        assert_eq!(config.siem_name, "siem");
        assert_eq!(config.siem_max, 0);
    }

    #[test]
    fn test_missing_file_is_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("reactor.conf")).unwrap_err();
        assert!(matches!(err, ReactorError::ConfigMissing { .. }));
    }

    #[test]
    fn test_missing_syslog_port_is_config_error() {
        let file = ini("[syslog]\nhost = 127.0.0.1\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ReactorError::Config(_)));
    }

    #[test]
    fn test_non_numeric_port_is_config_error() {
        let file = ini("[syslog]\nhost = 127.0.0.1\nport = five-one-four\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ReactorError::Config(_)));
    }
}
