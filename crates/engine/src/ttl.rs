//! TTL expiration reaper
//!
//! A background thread that periodically removes records whose version is
//! older than `now - ttl`. Each candidate is deleted conditioned on the
//! version the scan observed, so a record updated while the reaper runs is
//! spared: its version changed and the conditional delete simply drops.
//!
//! The reaper holds only a `Weak` reference to its table; dropping the
//! table (or the database) ends the loop on the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::table::Table;

// Shutdown poll granularity; keeps stop() prompt even with long intervals.
const SLICE: Duration = Duration::from_millis(10);

/// Handle to a running reaper thread
#[derive(Debug)]
pub struct TtlReaper {
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TtlReaper {
    /// Start reaping `table` every `interval`, expiring entries older than
    /// `ttl`
    pub(crate) fn spawn(table: Weak<Table>, ttl: Duration, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || loop {
            let mut slept = Duration::ZERO;
            while slept < interval {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                let step = SLICE.min(interval - slept);
                std::thread::sleep(step);
                slept += step;
            }
            let Some(table) = table.upgrade() else {
                return;
            };
            match table.reap_expired(ttl) {
                Ok(0) => {}
                Ok(removed) => debug!(table = table.name(), removed, "ttl reap"),
                Err(err) => warn!(table = table.name(), %err, "ttl reap failed"),
            }
        });
        Self {
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for TtlReaper {
    fn drop(&mut self) {
        self.stop();
    }
}
