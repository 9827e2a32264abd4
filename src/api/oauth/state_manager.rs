//! CSRF state for the authorization redirect.
//!
//! Each redirect issues a random state value that the callback must return
//! exactly once before it expires.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct StateEntry {
    pub issued_at: DateTime<Utc>,
}

/// Issued state values with automatic expiration
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    expiry_duration: Duration,
}

impl StateManager {
    /// # Arguments
    /// * `expiry_seconds` - How long an issued state stays valid
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration: Duration::seconds(expiry_seconds),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, StateEntry>> {
        // Entries are plain data, a poisoned map is still consistent
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Issues a new state value (UUID v4).
    pub fn issue(&self) -> String {
        let state = Uuid::new_v4().to_string();
        self.states().insert(
            state.clone(),
            StateEntry {
                issued_at: Utc::now(),
            },
        );
        state
    }

    /// Consumes a state value. Returns `None` if it was never issued, was
    /// already used or has expired.
    pub fn consume(&self, state: &str) -> Option<StateEntry> {
        let entry = self.states().remove(state)?;

        if Utc::now() - entry.issued_at > self.expiry_duration {
            return None;
        }

        Some(entry)
    }

    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let expiry = self.expiry_duration;
        self.states().retain(|_, entry| now - entry.issued_at <= expiry);
    }

    pub fn count(&self) -> usize {
        self.states().len()
    }
}

/// Background task: drops expired state values every `interval_seconds`.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(remaining = manager.count(), "OAuth state cleanup complete");
    }
}
