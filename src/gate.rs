use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::config::GateConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("too many sessions waiting for a transcode slot")]
    TooBusy,
    #[error("concurrency gate closed")]
    Closed,
}

/// Counting admission control for transcode sessions.
///
/// A session holds its `SessionPermit` for its whole lifetime; dropping the
/// permit is the only way a slot is returned, so every exit path releases
/// exactly once.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    waiting: Arc<AtomicUsize>,
    config: GateConfig,
}

#[derive(Debug)]
pub struct SessionPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSnapshot {
    pub capacity: usize,
    pub in_flight: usize,
    pub waiting: usize,
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    pub fn new(config: GateConfig) -> Self {
        let capacity = config.max_concurrent_sessions.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    pub async fn acquire(&self) -> Result<SessionPermit, GateError> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(SessionPermit { _permit: permit });
        }

        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard(&self.waiting);
        if self.config.max_waiting > 0 && queued >= self.config.max_waiting {
            return Err(GateError::TooBusy);
        }

        let acquire = self.semaphore.clone().acquire_owned();
        let permit = match self.config.wait_timeout {
            Some(limit) => timeout(limit, acquire)
                .await
                .map_err(|_| GateError::TooBusy)?,
            None => acquire.await,
        }
        .map_err(|_| GateError::Closed)?;

        Ok(SessionPermit { _permit: permit })
    }

    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            capacity: self.capacity,
            in_flight: self.capacity - self.semaphore.available_permits(),
            waiting: self.waiting.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn gate(
        capacity: usize,
        max_waiting: usize,
        wait_timeout: Option<Duration>,
    ) -> ConcurrencyGate {
        ConcurrencyGate::new(GateConfig {
            max_concurrent_sessions: capacity,
            max_waiting,
            wait_timeout,
        })
    }

    #[tokio::test]
    async fn extra_session_waits_until_a_slot_is_released() {
        let gate = gate(2, 0, None);
        let first = gate.acquire().await.unwrap();
        let _second = gate.acquire().await.unwrap();

        let (started_tx, started_rx) = oneshot::channel();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let permit = gate.acquire().await.unwrap();
                let _ = started_tx.send(());
                permit
            })
        };

        let mut started_rx = started_rx;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started_rx.try_recv().is_err(), "third session must not start yet");
        assert_eq!(gate.snapshot().waiting, 1);
        assert_eq!(gate.snapshot().in_flight, 2);

        drop(first);
        let _third = waiter.await.unwrap();
        assert!(started_rx.await.is_ok());
        assert_eq!(gate.snapshot().waiting, 0);
        assert_eq!(gate.snapshot().in_flight, 2);
    }

    #[tokio::test]
    async fn permit_is_released_when_session_fails() {
        let gate = gate(1, 0, None);
        let failing = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                panic!("stage blew up");
            })
        };
        assert!(failing.await.is_err());
        assert_eq!(gate.snapshot().in_flight, 0);
        assert!(gate.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn wait_timeout_maps_to_too_busy() {
        let gate = gate(1, 0, Some(Duration::from_millis(20)));
        let _held = gate.acquire().await.unwrap();
        assert_eq!(gate.acquire().await.unwrap_err(), GateError::TooBusy);
        assert_eq!(gate.snapshot().waiting, 0);
    }

    #[tokio::test]
    async fn waiting_queue_bound_rejects_overflow() {
        let gate = gate(1, 1, None);
        let _held = gate.acquire().await.unwrap();

        let queued = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(gate.acquire().await.unwrap_err(), GateError::TooBusy);
        queued.abort();
    }
}
