//! Bounded reconnection on top of [`LinkSession::connect`].
//!
//! The session never retries by itself; this is the policy the CLI
//! applies instead: a fixed number of attempts with a fixed pause.

use std::time::Duration;

use tracing::{info, warn};

use epd_core::{DeviceCapabilities, EpdError, GattTransport, LinkSession};

use crate::config::ReconnectConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: Duration::from_millis(cfg.delay_ms),
        }
    }
}

impl ReconnectPolicy {
    /// Connect, retrying until `max_attempts` attempts have failed.
    /// Returns the last error.
    pub async fn connect<T: GattTransport>(
        &self,
        session: &LinkSession<T>,
    ) -> Result<DeviceCapabilities, EpdError> {
        let mut attempt = 1;
        loop {
            match session.connect().await {
                Ok(caps) => {
                    if attempt > 1 {
                        info!(attempt, "reconnected");
                    }
                    return Ok(caps);
                }
                Err(e) if attempt >= self.max_attempts => {
                    warn!(attempts = attempt, "giving up: {e}");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, max = self.max_attempts, "connect failed: {e}");
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use epd_core::{LinkOptions, SimulatedPeripheral};

    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::from(&ReconnectConfig::default())
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let p = ReconnectPolicy::from(&ReconnectConfig {
            max_attempts: 0,
            delay_ms: 10,
        });
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.delay, Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_connected() {
        let sim = Arc::new(SimulatedPeripheral::new().refuse_connects(3));
        let session = LinkSession::new(Arc::clone(&sim), LinkOptions::default()).unwrap();

        let started = tokio::time::Instant::now();
        policy().connect(&session).await.unwrap();
        assert!(session.state().is_ready());
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert_eq!(sim.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let sim = Arc::new(SimulatedPeripheral::new().refuse_connects(5));
        let session = LinkSession::new(Arc::clone(&sim), LinkOptions::default()).unwrap();

        let err = policy().connect(&session).await.unwrap_err();
        assert!(matches!(err, EpdError::LinkSetupFailed(_)));
        assert!(session.state().is_disconnected());

        // The sixth attempt would have succeeded.
        policy().connect(&session).await.unwrap();
    }
}
