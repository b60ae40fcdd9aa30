use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netvault_domain::plugins::BackupPlugin;
use netvault_domain::storage::{ArtifactVersion, StorageBackend, StoredArtifact};
use netvault_errors::{CollectError, StorageError};

/// Plugin that replays a scripted sequence of outcomes, one per call.
/// When the script runs out it keeps returning the last outcome.
pub struct ScriptedPlugin {
    key: &'static str,
    script: Mutex<VecDeque<Result<String, CollectError>>>,
    last: Mutex<Option<Result<String, CollectError>>>,
    calls: AtomicU32,
}

impl ScriptedPlugin {
    pub fn new(key: &'static str, outcomes: Vec<Result<String, CollectError>>) -> Arc<Self> {
        Arc::new(Self {
            key,
            script: Mutex::new(outcomes.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        })
    }

    pub fn always_ok(key: &'static str, config_text: &str) -> Arc<Self> {
        Self::new(key, vec![Ok(config_text.to_string())])
    }

    pub fn always_err(key: &'static str, error: CollectError) -> Arc<Self> {
        Self::new(key, vec![Err(error)])
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackupPlugin for ScriptedPlugin {
    fn key(&self) -> &str {
        self.key
    }

    async fn run(
        &self,
        _address: &str,
        _credential: &serde_json::Value,
    ) -> Result<String, CollectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("script lock");
        match script.pop_front() {
            Some(outcome) => {
                *self.last.lock().expect("last lock") = Some(outcome.clone());
                outcome
            }
            None => self
                .last
                .lock()
                .expect("last lock")
                .clone()
                .unwrap_or_else(|| Ok(String::new())),
        }
    }
}

/// Storage backend wrapper that fails the first `failures` saves with
/// a transient error before delegating to the inner backend.
pub struct FlakyBackend<B> {
    inner: B,
    failures: AtomicU32,
}

impl<B> FlakyBackend<B> {
    pub fn new(inner: B, failures: u32) -> Self {
        Self {
            inner,
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for FlakyBackend<B> {
    fn key(&self) -> &'static str {
        self.inner.key()
    }

    async fn save(
        &self,
        location: &str,
        device_id: i64,
        timestamp: DateTime<Utc>,
        payload: &str,
        idempotency_key: &str,
    ) -> Result<StoredArtifact, StorageError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Unavailable(format!(
                "scripted outage, {remaining} failures left"
            )));
        }
        self.inner
            .save(location, device_id, timestamp, payload, idempotency_key)
            .await
    }

    async fn retrieve(
        &self,
        location: &str,
        version_marker: &str,
    ) -> Result<String, StorageError> {
        self.inner.retrieve(location, version_marker).await
    }

    async fn list_versions(
        &self,
        location: &str,
        device_id: i64,
    ) -> Result<Vec<ArtifactVersion>, StorageError> {
        self.inner.list_versions(location, device_id).await
    }
}
