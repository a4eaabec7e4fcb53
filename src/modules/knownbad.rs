// =============================================================================
// modules/knownbad.rs - PUBLIC MALICIOUS HOST LISTS
// =============================================================================
//
// The sources file lists URLs of plain-text blocklists. Each list is fetched
// and every host on it is reported once per run, with the list it came from
// as the event message. The lists come in a few shapes:
//
//   evil.example.com
//   0.0.0.0 evil.example.com        (hosts-file style)
//   http://evil.example.com/payload (full URLs)
//   203.0.113.9  # trailing comment
//
// All of them reduce to the host.
// =============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, warn};
use url::{Host, Url};

use super::{get_text, http_client, CollectionModule, FetchPass};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::Result;
use crate::loader;
use crate::models::{CefEvent, Finding, Phase};

const SINKHOLE_ADDRESSES: &[&str] = &["0.0.0.0", "127.0.0.1", "::", "::1"];

pub struct KnownBad {
    client: reqwest::Client,
    sources_path: PathBuf,
    breaker: CircuitBreaker,
    /// Hosts already reported during the current run.
    seen: Mutex<HashSet<String>>,
}

impl KnownBad {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: http_client(config.http_timeout, &config.user_agent)?,
            sources_path: config.sources_path.clone(),
            breaker: CircuitBreaker::new(
                "knownbad",
                config.breaker_failure_threshold,
                config.breaker_reset_timeout,
            ),
            seen: Mutex::new(HashSet::new()),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

fn host_of(token: &str) -> Option<String> {
    let candidate = if token.contains("://") {
        Url::parse(token).ok()?.host_str()?.to_string()
    } else {
        token.trim_end_matches('.').to_string()
    };

    let candidate = candidate.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = candidate.parse::<IpAddr>() {
        return (!ip.is_unspecified() && !ip.is_loopback()).then(|| ip.to_string());
    }

    match Host::parse(candidate).ok()? {
        Host::Domain(domain) if domain.contains('.') => Some(domain.to_lowercase()),
        _ => None,
    }
}

/// Hosts listed in a blocklist body, in order of appearance.
pub fn parse_hosts(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or("").trim();
            let mut tokens = line.split_whitespace();
            let first = tokens.next()?;
            let token = if SINKHOLE_ADDRESSES.contains(&first) {
                tokens.next()?
            } else {
                first
            };
            host_of(token)
        })
        .collect()
}

#[async_trait]
impl CollectionModule for KnownBad {
    fn name(&self) -> &str {
        "knownbad"
    }

    fn describe(&self, phase: Phase) -> Cow<'static, str> {
        match phase {
            Phase::Loading => "loading sources".into(),
            Phase::Fetching => "gathering data from sources".into(),
            Phase::Reporting => "sending syslog events".into(),
        }
    }

    async fn load(&self) -> Result<Vec<String>> {
        loader::load_sources(&self.sources_path).await
    }

    async fn seed(&self, inputs: &[String]) -> Result<Vec<String>> {
        self.seen.lock().clear();
        Ok(inputs.to_vec())
    }

    async fn fetch(&self, _inputs: &[String], work: Vec<String>) -> Result<FetchPass> {
        let mut pass = FetchPass::default();

        for source in work {
            if !self.breaker.allow_request() {
                pass.pending.push(source);
                continue;
            }

            match get_text(&self.client, &source).await {
                Ok(body) => {
                    self.breaker.record_success();
                    let hosts = parse_hosts(&body);
                    debug!(source = %source, hosts = hosts.len(), "source parsed");
                    let mut seen = self.seen.lock();
                    for host in hosts {
                        if seen.insert(host.clone()) {
                            pass.findings.push(Finding::new(host, source.as_str()));
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    self.breaker.record_failure();
                    debug!(source = %source, error = %e, "source deferred to next pass");
                    pass.pending.push(source);
                }
                Err(e) => {
                    warn!(source = %source, error = %e, "unable to gather data from source");
                    pass.failures += 1;
                }
            }
        }

        if !pass.pending.is_empty() {
            debug!(
                pending = pass.pending.len(),
                breaker = %self.breaker.state(),
                "sources deferred to next pass"
            );
        }
        Ok(pass)
    }

    fn to_event(&self, finding: &Finding) -> CefEvent {
        CefEvent::new(100, "Known Malicious Host", 1, finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_http;

    #[test]
    fn test_parse_hosts_handles_list_shapes() {
        let body = "\
# malware domains, updated hourly
evil.example.com
0.0.0.0 tracker.example.net
127.0.0.1 localhost
http://Payload.Example.org/drop.exe
203.0.113.9   # c2

::1 ip6-localhost
not_a_host
2001:db8::7
";
        assert_eq!(
            parse_hosts(body),
            vec![
                "evil.example.com",
                "tracker.example.net",
                "payload.example.org",
                "203.0.113.9",
                "2001:db8::7",
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_dedups_hosts_and_defers_throttled_sources() {
        let base = test_http::serve(vec![
            ("/a.txt", vec![(200, "evil.example.com\nbad.example.net\n".to_string())]),
            ("/b.txt", vec![(200, "0.0.0.0 evil.example.com\n".to_string())]),
            ("/c.txt", vec![(429, String::new())]),
            ("/d.txt", vec![(403, String::new())]),
        ])
        .await;
        let config = Config::for_siem("127.0.0.1", 5141);
        let module = KnownBad::new(&config).unwrap().with_client(test_http::client());

        let sources: Vec<String> = ["a.txt", "b.txt", "c.txt", "d.txt"]
            .iter()
            .map(|p| format!("{}/{}", base, p))
            .collect();
        let work = module.seed(&sources).await.unwrap();
        let pass = module.fetch(&sources, work).await.unwrap();

        assert_eq!(
            pass.findings,
            vec![
                Finding::new("evil.example.com", sources[0].as_str()),
                Finding::new("bad.example.net", sources[0].as_str()),
            ]
        );
        assert_eq!(pass.pending, vec![sources[2].clone()]);
        assert_eq!(pass.failures, 1);

        // A fresh run starts with an empty seen-set.
        let work = module.seed(&sources[..1]).await.unwrap();
        let again = module.fetch(&sources[..1], work).await.unwrap();
        assert_eq!(again.findings.len(), 2);
    }
}
