// In-process window store

use crate::errors::StoreError;
use crate::rate_limit::clock::{Clock, SystemClock};
use crate::rate_limit::scripts::WindowScript;
use crate::rate_limit::store::ScriptStore;
use crate::rate_limit::window::Algorithm;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Expired keys of absent clients are dropped every this many evals
const SWEEP_EVERY: u64 = 1_024;

#[derive(Debug)]
enum Value {
    Counter(u64),
    /// Admission timestamps in milliseconds, oldest first
    Events(Vec<u64>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

#[derive(Debug, Default)]
struct MemoryState {
    scripts: HashMap<String, Algorithm>,
    entries: HashMap<String, Entry>,
    evals: u64,
}

impl MemoryState {
    fn purge_expired(&mut self, key: &str, now: u64) {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.entries.remove(key);
        }
    }

    fn sweep_expired(&mut self, now: u64) {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));

        tracing::trace!(
            swept = before - self.entries.len(),
            remaining = self.entries.len(),
            "Expired window state swept"
        );
    }

    fn pttl(&self, key: &str, now: u64) -> i64 {
        match self.entries.get(key) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => i64::try_from(at.saturating_sub(now)).unwrap_or(i64::MAX),
        }
    }

    fn fixed_window(
        &mut self,
        key: &str,
        limit: u64,
        window_ms: u64,
        now: u64,
    ) -> Result<Vec<i64>, StoreError> {
        let current = match self.entries.get(key) {
            None => 0,
            Some(Entry {
                value: Value::Counter(count),
                ..
            }) => *count,
            Some(_) => return Err(wrong_type(key)),
        };

        // A fresh window always admits its first request
        if current == 0 {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Counter(1),
                    expires_at: (window_ms > 0).then(|| now + window_ms),
                },
            );
            return Ok(vec![1, 0]);
        }

        if current + 1 > limit {
            return Ok(vec![0, self.pttl(key, now)]);
        }

        if let Some(Entry {
            value: Value::Counter(count),
            ..
        }) = self.entries.get_mut(key)
        {
            *count += 1;
        }

        Ok(vec![1, 0])
    }

    fn sliding_window(
        &mut self,
        key: &str,
        limit: u64,
        window_ms: u64,
        now: u64,
    ) -> Result<Vec<i64>, StoreError> {
        if window_ms > 0 {
            let emptied = match self.entries.get_mut(key) {
                Some(Entry {
                    value: Value::Events(events),
                    ..
                }) => {
                    events.retain(|&at| at + window_ms > now);
                    events.is_empty()
                }
                Some(_) => return Err(wrong_type(key)),
                None => false,
            };
            // Redis drops a sorted set once its last member is removed
            if emptied {
                self.entries.remove(key);
            }
        }

        let current = match self.entries.get(key) {
            None => 0,
            Some(Entry {
                value: Value::Events(events),
                ..
            }) => events.len() as u64,
            Some(_) => return Err(wrong_type(key)),
        };

        if current >= limit {
            return Ok(vec![0, self.pttl(key, now)]);
        }

        let entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Events(Vec::new()),
            expires_at: None,
        });
        if let Value::Events(events) = &mut entry.value {
            events.push(now);
        }
        if window_ms > 0 {
            entry.expires_at = Some(now + window_ms);
        }

        Ok(vec![1, 0])
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Logic(format!(
        "WRONGTYPE key {} holds the wrong kind of value",
        key
    ))
}

/// Single-process [`ScriptStore`]
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            clock: Arc::new(clock),
        }
    }

    /// Forget every loaded script, as a server restart would
    pub fn flush_scripts(&self) {
        self.state.lock().scripts.clear();
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn load_script(&self, script: &WindowScript) -> Result<String, StoreError> {
        let hash = script.hash().to_string();
        self.state
            .lock()
            .scripts
            .insert(hash.clone(), script.algorithm());
        Ok(hash)
    }

    async fn eval_script(
        &self,
        hash: &str,
        key: &str,
        limit: u64,
        duration_ms: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let window_ms = u64::try_from(duration_ms)
            .map_err(|_| StoreError::Logic(format!("invalid expire time {}", duration_ms)))?;
        let now = self.clock.now_millis();

        let mut state = self.state.lock();
        let algorithm = *state.scripts.get(hash).ok_or(StoreError::NoScript)?;
        state.purge_expired(key, now);

        state.evals += 1;
        if state.evals % SWEEP_EVERY == 0 {
            state.sweep_expired(now);
        }

        match algorithm {
            Algorithm::FixedWindow => state.fixed_window(key, limit, window_ms, now),
            Algorithm::SlidingWindow => state.sliding_window(key, limit, window_ms, now),
        }
    }

    async fn pttl(&self, key: &str) -> Result<i64, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        state.purge_expired(key, now);
        Ok(state.pttl(key, now))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.state.lock().entries.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
