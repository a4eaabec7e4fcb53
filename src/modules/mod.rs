// =============================================================================
// modules/mod.rs - THE COLLECTION MODULE CONTRACT
// =============================================================================
//
// Every data source plugs into the runner through `CollectionModule`:
//
//   load   -> the run's inputs (keywords, source URLs, a feed URL)
//   seed   -> the first work queue built from those inputs
//   fetch  -> one pass over a work queue, returning findings plus whatever
//             is still pending and has to go around again
//   to_event -> how a finding is spelled as a CEF event
//
// The runner owns all registry bookkeeping, so a module never touches job
// state and never talks to the SIEM directly.
// =============================================================================

pub mod knownbad;
pub mod otx;
pub mod pastebin;

use async_trait::async_trait;
use std::borrow::Cow;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ReactorError, Result};
use crate::models::{CefEvent, Finding, Phase};

/// Result of one fetch pass.
#[derive(Debug, Clone, Default)]
pub struct FetchPass {
    pub findings: Vec<Finding>,
    /// Work items that could not be processed this pass and should be
    /// handed back to `fetch` on the next one.
    pub pending: Vec<String>,
    /// Items that failed for good. The run still reports what it found but
    /// finishes with errors.
    pub failures: usize,
}

#[async_trait]
pub trait CollectionModule: Send + Sync {
    /// Registry key and log target for this module.
    fn name(&self) -> &str;

    /// Registry message shown while `phase` is in progress.
    fn describe(&self, phase: Phase) -> Cow<'static, str> {
        match phase {
            Phase::Loading => "loading sources".into(),
            Phase::Fetching => "gathering data from sources".into(),
            Phase::Reporting => "sending syslog events".into(),
        }
    }

    async fn load(&self) -> Result<Vec<String>>;

    /// Build the first work queue. Defaults to the inputs themselves.
    async fn seed(&self, inputs: &[String]) -> Result<Vec<String>> {
        Ok(inputs.to_vec())
    }

    async fn fetch(&self, inputs: &[String], work: Vec<String>) -> Result<FetchPass>;

    fn to_event(&self, finding: &Finding) -> CefEvent;
}

/// HTTP client shared by the modules' construction paths.
pub(crate) fn http_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(ReactorError::from)
}

/// GET `url` and return the body, turning non-2xx statuses into errors so
/// `ReactorError::is_transient` can look at the status code.
pub(crate) async fn get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

pub const MODULE_NAMES: &[&str] = &["pastebin", "knownbad", "otx"];

/// Build a module by name.
pub fn build(name: &str, config: &Config) -> Result<Box<dyn CollectionModule>> {
    match name {
        "pastebin" => Ok(Box::new(pastebin::Pastebin::new(config)?)),
        "knownbad" => Ok(Box::new(knownbad::KnownBad::new(config)?)),
        "otx" => Ok(Box::new(otx::Otx::new(config)?)),
        other => Err(ReactorError::JobNotFound(other.to_string())),
    }
}

/// Minimal HTTP stub for module tests. Each path answers with a scripted
/// sequence of `(status, body)` responses; the last one repeats.
#[cfg(test)]
pub(crate) mod test_http {
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub type Routes = Vec<(&'static str, Vec<(u16, String)>)>;

    pub fn client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    /// Serve `routes` on an ephemeral loopback port and return the base URL.
    pub async fn serve(routes: Routes) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let table: HashMap<String, VecDeque<(u16, String)>> = routes
            .into_iter()
            .map(|(path, responses)| (path.to_string(), responses.into()))
            .collect();
        let table = Arc::new(Mutex::new(table));

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let table = Arc::clone(&table);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    loop {
                        match stream.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                read += n;
                                if buf[..read].windows(4).any(|w| w == b"\r\n\r\n")
                                    || read == buf.len()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]);
                    let path = request
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("/")
                        .to_string();

                    let (status, body) = {
                        let mut table = table.lock();
                        match table.get_mut(&path) {
                            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                            Some(queue) => queue.front().cloned().unwrap(),
                            None => (404, "not found".to_string()),
                        }
                    };
                    let response = format!(
                        "HTTP/1.1 {} STUB\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body,
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        base
    }
}
