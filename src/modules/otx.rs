// =============================================================================
// modules/otx.rs - ALIENVAULT IP REPUTATION FEED
// =============================================================================
//
// The reputation feed is one big '#'-separated text file:
//
//   ip#reliability#risk#activity#country#city#lat,lon#flag
//
// One GET, one finding per well-formed line. There is nothing to retry
// item by item here, so a failed download fails the run.
// =============================================================================

use async_trait::async_trait;
use std::borrow::Cow;
use std::net::IpAddr;
use tracing::{debug, info};

use super::{get_text, http_client, CollectionModule, FetchPass};
use crate::config::Config;
use crate::error::Result;
use crate::models::{CefEvent, Finding, Phase};

pub struct Otx {
    client: reqwest::Client,
    feed_url: String,
}

impl Otx {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: http_client(config.http_timeout, &config.user_agent)?,
            feed_url: config.otx_feed_url.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

/// One finding per feed line with a valid IP and an activity field.
pub fn parse_reputation(body: &str) -> Vec<Finding> {
    body.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split('#').collect();
            if fields.len() < 4 {
                return None;
            }
            let ip: IpAddr = fields[0].trim().parse().ok()?;
            let activity = fields[3].trim().replace(';', ", ");
            if activity.is_empty() {
                return None;
            }
            let message = match fields.get(4).map(|c| c.trim()) {
                Some(country) if !country.is_empty() => format!("{} ({})", activity, country),
                _ => activity,
            };
            Some(Finding::new(ip.to_string(), message))
        })
        .collect()
}

#[async_trait]
impl CollectionModule for Otx {
    fn name(&self) -> &str {
        "otx"
    }

    fn describe(&self, phase: Phase) -> Cow<'static, str> {
        match phase {
            Phase::Loading => "loading feed location".into(),
            Phase::Fetching => "downloading reputation data".into(),
            Phase::Reporting => "sending syslog events".into(),
        }
    }

    async fn load(&self) -> Result<Vec<String>> {
        Ok(vec![self.feed_url.clone()])
    }

    async fn fetch(&self, _inputs: &[String], work: Vec<String>) -> Result<FetchPass> {
        let mut pass = FetchPass::default();
        for feed in work {
            let body = get_text(&self.client, &feed).await?;
            let entries = parse_reputation(&body);
            debug!(feed = %feed, bytes = body.len(), entries = entries.len(), "feed parsed");
            pass.findings.extend(entries);
        }
        info!(entries = pass.findings.len(), "reputation entries collected");
        Ok(pass)
    }

    fn to_event(&self, finding: &Finding) -> CefEvent {
        CefEvent::new(100, "Reputation Feed Host", 1, finding)
    }
}
