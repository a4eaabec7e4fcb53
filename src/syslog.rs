// =============================================================================
// syslog.rs - SHOUTING CEF AT THE SIEM OVER UDP
// =============================================================================
//
// Every finding leaves the process as one UDP datagram:
//
//   <29>CEF:0|OSINT|ArcReactor|1.0|<id>|<name>|<severity>|src=... msg=...
//
// The priority is fixed: facility 3 (system daemons), severity 5 (notice),
// so 3 * 8 + 5 = 29. A fresh ephemeral socket is bound per event and dropped
// right after the send. Delivery is best effort: a failed send comes back as
// a typed error for the caller to log, and it is counted here.
// =============================================================================

use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{ReactorError, Result};

pub const FACILITY_DAEMON: u8 = 3;
pub const SEVERITY_NOTICE: u8 = 5;

/// Syslog priority value, `facility * 8 + severity`.
pub const fn priority(facility: u8, severity: u8) -> u8 {
    facility * 8 + severity
}

pub const PRIORITY: u8 = priority(FACILITY_DAEMON, SEVERITY_NOTICE);

/// Sends CEF payloads to one SIEM endpoint.
#[derive(Debug)]
pub struct SyslogEmitter {
    host: String,
    port: u16,
    sent: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmitterSnapshot {
    pub target: String,
    pub priority: u8,
    pub sent: u64,
    pub failed: u64,
}

impl SyslogEmitter {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Send one event. The payload is prefixed with `<29>`.
    pub async fn send(&self, event: &str) -> Result<()> {
        match self.send_datagram(event).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn send_datagram(&self, event: &str) -> Result<()> {
        let target = self.target();
        let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| ReactorError::transport(&target, e))?
            .next()
            .ok_or_else(|| ReactorError::transport(&target, "host did not resolve"))?;

        let bind: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| ReactorError::transport(&target, e))?;

        let payload = format!("<{}>{}", PRIORITY, event);
        socket
            .send_to(payload.as_bytes(), addr)
            .await
            .map_err(|e| ReactorError::transport(&target, e))?;

        debug!(target = %target, bytes = payload.len(), "syslog event sent");
        Ok(())
    }

    /// Fire a throwaway event at the SIEM to check the path works.
    pub async fn test_connection(&self) -> Result<()> {
        self.send("DEBUG MESSAGE").await
    }

    pub fn snapshot(&self) -> EmitterSnapshot {
        EmitterSnapshot {
            target: self.target(),
            priority: PRIORITY,
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
