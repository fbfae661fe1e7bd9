//! Background reaper for abandoned sessions.
//!
//! Clients sometimes disappear without calling close (browser tab gone,
//! network drop), which would leak connections forever. When enabled, the
//! reaper periodically closes every session whose last start/poll activity
//! is older than the configured timeout.

use crate::engine::QueryEngine;
use log::{debug, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Periodic idle-session sweeper. One per engine, started at bootstrap.
pub struct SessionReaper {
    engine: Arc<QueryEngine>,
    idle_timeout: Duration,
    sweep_interval: Duration,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionReaper {
    pub fn new(engine: Arc<QueryEngine>, idle_timeout: Duration, sweep_interval: Duration) -> Self {
        Self {
            engine,
            idle_timeout,
            sweep_interval,
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the sweep loop. Calling start twice replaces the previous
    /// loop.
    pub fn start(&self) {
        let engine = Arc::clone(&self.engine);
        let idle_timeout = self.idle_timeout;
        let sweep_interval = self.sweep_interval;
        let shutdown = Arc::clone(&self.shutdown);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            // The first tick fires immediately; skip it so a fresh server
            // does not sweep before anyone has connected.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        sweep(&engine, idle_timeout).await;
                    }
                    _ = shutdown.notified() => {
                        debug!("Session reaper shutting down");
                        break;
                    }
                }
            }
        });

        let mut guard = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = guard.replace(task) {
            previous.abort();
        }
        info!(
            "Session reaper started (idle timeout {:?}, sweep every {:?})",
            self.idle_timeout, self.sweep_interval
        );
    }

    /// Stops the sweep loop. Safe to call without a prior start.
    pub fn stop(&self) {
        self.shutdown.notify_one();
        let mut guard = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = guard.take() {
            task.abort();
        }
    }
}

impl Drop for SessionReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep(engine: &Arc<QueryEngine>, idle_timeout: Duration) {
    let stale = engine.registry().idle_sessions(idle_timeout);
    if stale.is_empty() {
        return;
    }
    info!("Reaping {} idle session(s)", stale.len());
    for transaction_id in stale {
        engine.close(&transaction_id).await;
    }
}
