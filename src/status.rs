// =============================================================================
// status.rs - READ-ONLY JSON STATUS ENDPOINT
// =============================================================================
//
// A tiny HTTP server so a dashboard or a curl loop can see what the reactor is
// doing without scraping the log:
//
//   GET /  ->  { "jobs": [...], "syslog": {...}, "uptime_seconds": 42 }
//
// Anything else gets a 404. One response per connection, then close.
// =============================================================================

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::{ReactorError, Result};
use crate::models::JobRecord;
use crate::registry::JobRegistry;
use crate::syslog::{EmitterSnapshot, SyslogEmitter};

#[derive(Debug, Serialize)]
pub struct StatusSnapshot {
    pub jobs: Vec<JobRecord>,
    pub syslog: EmitterSnapshot,
    pub uptime_seconds: u64,
}

/// How long a client gets to send its request line.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct StatusServer {
    registry: Arc<JobRegistry>,
    emitter: Arc<SyslogEmitter>,
    start_time: Instant,
}

impl StatusServer {
    pub fn new(registry: Arc<JobRegistry>, emitter: Arc<SyslogEmitter>) -> Self {
        Self {
            registry,
            emitter,
            start_time: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            jobs: self.registry.list_all(),
            syslog: self.emitter.snapshot(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub async fn bind(port: u16) -> Result<TcpListener> {
        Ok(TcpListener::bind(("0.0.0.0", port)).await?)
    }

    /// Answer requests on `listener` until `shutdown` flips.
    pub async fn serve(self, listener: TcpListener, shutdown: &mut watch::Receiver<bool>) {
        if let Ok(addr) = listener.local_addr() {
            info!("status server listening on http://{}", addr);
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = server.respond(stream).await {
                                    debug!(peer = %peer, error = %e, "status request dropped");
                                }
                            });
                        }
                        Err(e) => error!("status server accept error: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    info!("status server: shutting down");
                    break;
                }
            }
        }
    }

    async fn respond(&self, mut stream: TcpStream) -> Result<()> {
        let mut buf = [0u8; 1024];
        let n = tokio::time::timeout(REQUEST_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| ReactorError::transport("status client", "no request within timeout"))??;
        let request = String::from_utf8_lossy(&buf[..n]);
        let mut parts = request.lines().next().unwrap_or("").split_whitespace();

        let response = match (parts.next(), parts.next()) {
            (Some("GET"), Some("/")) => {
                let json = serde_json::to_string_pretty(&self.snapshot())
                    .unwrap_or_else(|_| "{}".to_string());
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    json.len(),
                    json,
                )
            }
            _ => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
        };

        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }
}
