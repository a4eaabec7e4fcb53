// =============================================================================
// modules/pastebin.rs - WATCHLIST KEYWORDS IN FRESH PASTES
// =============================================================================
//
// 1. Pull the public archive page and collect the IDs of the newest posts.
// 2. Download each post's raw text and scan it for watchlist keywords.
// 3. Every post with at least one hit becomes a finding.
//
// Pastebin throttles aggressively, so a pass rarely gets through the whole
// archive in one go: posts that time out or come back 429/5xx are handed back
// as pending and the runner brings them around on the next pass. The circuit
// breaker defers the rest of a pass once the site stops answering.
// =============================================================================

use async_trait::async_trait;
use memchr::memmem;
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{get_text, http_client, CollectionModule, FetchPass};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::{ReactorError, Result};
use crate::loader;
use crate::matcher::KeywordMatcher;
use crate::models::{CefEvent, Finding, Phase};

const POST_ID_LEN: usize = 8;

pub struct Pastebin {
    client: reqwest::Client,
    keywords_path: PathBuf,
    archive_url: String,
    raw_url: String,
    breaker: CircuitBreaker,
}

impl Pastebin {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: http_client(config.http_timeout, &config.user_agent)?,
            keywords_path: config.keywords_path.clone(),
            archive_url: config.pastebin_archive_url.clone(),
            raw_url: config.pastebin_raw_url.clone(),
            breaker: CircuitBreaker::new(
                "pastebin",
                config.breaker_failure_threshold,
                config.breaker_reset_timeout,
            ),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

/// Post IDs linked from the archive table, in page order, without repeats.
///
/// Only `href="/XXXXXXXX"` links with an eight character alphanumeric target
/// count, which skips navigation like `/archive/python` or `/u/someone`.
pub fn parse_archive(html: &str) -> Vec<String> {
    let bytes = html.as_bytes();
    let start = memmem::find(bytes, b"maintable").unwrap_or(0);
    let table = &html[start..];

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for pos in memmem::find_iter(table.as_bytes(), b"href=\"/") {
        let rest = &table[pos + 7..];
        let Some(end) = rest.find('"') else { continue };
        let candidate = &rest[..end];
        if candidate.len() == POST_ID_LEN
            && candidate.bytes().all(|b| b.is_ascii_alphanumeric())
            && seen.insert(candidate.to_string())
        {
            ids.push(candidate.to_string());
        }
    }
    ids
}

fn is_not_found(err: &ReactorError) -> bool {
    matches!(err, ReactorError::Http(e) if e.status() == Some(reqwest::StatusCode::NOT_FOUND))
}

#[async_trait]
impl CollectionModule for Pastebin {
    fn name(&self) -> &str {
        "pastebin"
    }

    fn describe(&self, phase: Phase) -> Cow<'static, str> {
        match phase {
            Phase::Loading => "loading keywords".into(),
            Phase::Fetching => "collecting post archive".into(),
            Phase::Reporting => "sending syslog events".into(),
        }
    }

    async fn load(&self) -> Result<Vec<String>> {
        loader::load_keywords(&self.keywords_path).await
    }

    async fn seed(&self, _inputs: &[String]) -> Result<Vec<String>> {
        let html = get_text(&self.client, &self.archive_url).await?;
        let ids = parse_archive(&html);
        debug!(posts = ids.len(), "archive collected");
        Ok(ids)
    }

    async fn fetch(&self, inputs: &[String], work: Vec<String>) -> Result<FetchPass> {
        let matcher = KeywordMatcher::new(inputs)?;
        let mut pass = FetchPass::default();

        for post in work {
            if !self.breaker.allow_request() {
                pass.pending.push(post);
                continue;
            }

            let url = format!("{}/{}", self.raw_url, post);
            match get_text(&self.client, &url).await {
                Ok(text) => {
                    self.breaker.record_success();
                    let hits = matcher.matches(&text);
                    if !hits.is_empty() {
                        debug!(post = %post, hits = hits.len(), "watchlist keyword found");
                        pass.findings.push(Finding::new(
                            post.as_str(),
                            format!("keywords matched: {}", hits.join(", ")),
                        ));
                    }
                }
                Err(e) if is_not_found(&e) => {
                    self.breaker.record_success();
                    debug!(post = %post, "post removed before it could be searched");
                }
                Err(e) if e.is_transient() => {
                    self.breaker.record_failure();
                    debug!(post = %post, error = %e, "post deferred to next pass");
                    pass.pending.push(post);
                }
                Err(e) => {
                    warn!(post = %post, error = %e, "unable to search post");
                    pass.failures += 1;
                }
            }
        }

        if !pass.pending.is_empty() {
            debug!(
                pending = pass.pending.len(),
                breaker = %self.breaker.state(),
                "posts deferred to next pass"
            );
        }
        Ok(pass)
    }

    fn to_event(&self, finding: &Finding) -> CefEvent {
        CefEvent::new(100, "Watchlist Keyword Found", 1, finding)
    }
}
