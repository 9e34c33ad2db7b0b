//! Per-session background persistence.
//!
//! One recurring task per live connection flushes the session's mutable
//! fields into its profile and saves it. Each tick re-fetches the session by
//! identifier; a removed session simply ends the task. Cancellation is
//! synchronous (`JoinHandle::abort`) and must be issued before the session
//! is removed from the registry on disconnect.

use crate::registry::SessionRegistry;
use crate::store::ProfileStore;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub struct AutosaveScheduler {
    interval: Duration,
    tasks: HashMap<u32, JoinHandle<()>>,
}

impl AutosaveScheduler {
    pub fn new(interval: Duration) -> Self {
        AutosaveScheduler {
            interval,
            tasks: HashMap::new(),
        }
    }

    /// Launches the recurring flush task for one connection. Starting over
    /// an existing timer replaces it, keeping at most one per connection.
    pub fn start(
        &mut self,
        conn_id: u32,
        registry: Arc<RwLock<SessionRegistry>>,
        store: ProfileStore,
    ) {
        if let Some(previous) = self.tasks.remove(&conn_id) {
            previous.abort();
        }

        let interval = self.interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                // Re-fetch by identifier on every tick; the session may have
                // disconnected since the last one.
                let snapshot = {
                    let mut registry = registry.write().await;
                    match registry.get_mut(conn_id) {
                        Some(session) => {
                            session.sync_profile();
                            session.profile.clone()
                        }
                        None => return,
                    }
                };

                let mut profile = snapshot;
                match store.save(&mut profile).await {
                    Ok(()) => debug!(
                        "autosaved profile {} for connection {conn_id}",
                        profile.trainer.id
                    ),
                    Err(err) => {
                        // Non-fatal: the next tick retries.
                        warn!("autosave for connection {conn_id} failed: {err}");
                    }
                }
            }
        });

        self.tasks.insert(conn_id, handle);
    }

    /// Cancels the timer for a connection. Unknown or already-stopped
    /// identifiers are a no-op.
    pub fn stop(&mut self, conn_id: u32) {
        if let Some(handle) = self.tasks.remove(&conn_id) {
            handle.abort();
        }
    }

    pub fn stop_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }

    pub fn is_running(&self, conn_id: u32) -> bool {
        self.tasks.contains_key(&conn_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
