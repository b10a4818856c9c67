//! One meter shared between threads
//!
//! Meters handle a single conversation at a time. `SharedMeter` serialises
//! callers on a lock and gives up with `MeterBusy` when it cannot be taken
//! in time, instead of queueing forever behind a stuck exchange.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::MeterClient;
use crate::constants::METER_LOCK_TIMEOUT_SECS;
use crate::error::{EmopError, Result};
use crate::transport::{TcpTransport, Transport};

/// Cloneable handle to a lock-protected meter client
pub struct SharedMeter<T: Transport = TcpTransport> {
    inner: Arc<Mutex<MeterClient<T>>>,
    endpoint: String,
    lock_timeout: Duration,
}

impl<T: Transport> Clone for SharedMeter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            endpoint: self.endpoint.clone(),
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<T: Transport> SharedMeter<T> {
    pub fn new(client: MeterClient<T>) -> Self {
        Self::with_lock_timeout(client, Duration::from_secs(METER_LOCK_TIMEOUT_SECS))
    }

    pub fn with_lock_timeout(client: MeterClient<T>, lock_timeout: Duration) -> Self {
        let endpoint = client.runner().endpoint();
        Self {
            inner: Arc::new(Mutex::new(client)),
            endpoint,
            lock_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run `f` with exclusive access to the meter
    ///
    /// # Errors
    ///
    /// `MeterBusy` if another caller holds the meter past the lock timeout,
    /// otherwise whatever `f` returns.
    pub fn with<R>(&self, f: impl FnOnce(&mut MeterClient<T>) -> Result<R>) -> Result<R> {
        let started = Instant::now();
        let Some(mut client) = self.inner.try_lock_for(self.lock_timeout) else {
            warn!(endpoint = %self.endpoint, "meter busy");
            return Err(EmopError::MeterBusy {
                endpoint: self.endpoint.clone(),
                waited: started.elapsed(),
            });
        };
        debug!(
            endpoint = %self.endpoint,
            waited_ms = started.elapsed().as_millis() as u64,
            "meter lock acquired"
        );
        f(&mut *client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{RunnerSettings, TransactionRunner};
    use crate::transport::Progress;
    use bytes::Bytes;
    use std::sync::mpsc;

    struct Silent;

    impl Transport for Silent {
        fn exchange_with(
            &mut self,
            _request: &[u8],
            _progress: &mut dyn FnMut(Progress),
        ) -> Result<Bytes> {
            Ok(Bytes::new())
        }

        fn endpoint(&self) -> String {
            "silent:8080".into()
        }
    }

    fn shared(timeout: Duration) -> SharedMeter<Silent> {
        let runner = TransactionRunner::new(Silent, RunnerSettings::default());
        SharedMeter::with_lock_timeout(MeterClient::new(runner), timeout)
    }

    #[test]
    fn test_lock_released_between_calls() {
        let meter = shared(Duration::from_millis(10));
        assert_eq!(meter.with(|_| Ok(1)).unwrap(), 1);
        assert_eq!(meter.with(|_| Ok(2)).unwrap(), 2);
        assert_eq!(meter.endpoint(), "silent:8080");
    }

    #[test]
    fn test_busy_when_held() {
        let meter = shared(Duration::from_millis(20));
        let holder = meter.clone();
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let handle = std::thread::spawn(move || {
            holder
                .with(|_| {
                    locked_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
                .unwrap();
        });

        locked_rx.recv().unwrap();
        let err = meter.with(|_| Ok(())).unwrap_err();
        assert!(matches!(err, EmopError::MeterBusy { .. }));

        release_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(meter.with(|_| Ok(())).is_ok());
    }
}
