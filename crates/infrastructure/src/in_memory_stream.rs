use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use netvault_domain::messaging::{ResultStream, StreamEntry};
use netvault_errors::{VaultError, VaultResult};
use tokio::sync::{Mutex, Notify};

struct PendingEntry {
    index: usize,
    consumer: String,
    delivered_at: Instant,
}

#[derive(Default)]
struct GroupState {
    /// 下一个要投递的条目下标，只在 ack 后之前的条目才算处理完
    cursor: usize,
    /// 已投递未确认的条目，entry_id -> 投递信息
    pending: HashMap<String, PendingEntry>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<(String, serde_json::Value)>,
    next_seq: u64,
    groups: HashMap<String, GroupState>,
}

/// 进程内只追加结果流，带消费组游标。
///
/// 条目id形如 "{seq}-0"，流内单调递增。读到未确认的条目
/// 保留在消费组的pending表里，可被 `claim_pending` 重新认领。
#[derive(Default)]
pub struct InMemoryStream {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// 消费组内未确认条目数（测试用）
    pub async fn pending_count(&self, stream: &str, group: &str) -> usize {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    async fn try_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> VaultResult<Vec<StreamEntry>> {
        let mut streams = self.streams.lock().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| VaultError::stream_error(format!("结果流不存在: {stream}")))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| VaultError::stream_error(format!("消费组不存在: {group}")))?;

        let mut out = Vec::new();
        while out.len() < count && group_state.cursor < state.entries.len() {
            let index = group_state.cursor;
            let (id, payload) = &state.entries[index];
            group_state.pending.insert(
                id.clone(),
                PendingEntry {
                    index,
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                },
            );
            out.push(StreamEntry {
                id: id.clone(),
                payload: payload.clone(),
            });
            group_state.cursor += 1;
        }
        Ok(out)
    }
}

#[async_trait]
impl ResultStream for InMemoryStream {
    async fn append(&self, stream: &str, payload: &serde_json::Value) -> VaultResult<String> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();
        let id = format!("{}-0", state.next_seq);
        state.next_seq += 1;
        state.entries.push((id.clone(), payload.clone()));
        drop(streams);
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> VaultResult<()> {
        let mut streams = self.streams.lock().await;
        let state = streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> VaultResult<Vec<StreamEntry>> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        loop {
            let entries = self.try_read(stream, group, consumer, count).await?;
            if !entries.is_empty() {
                return Ok(entries);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, self.appended.notified()).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> VaultResult<()> {
        let mut streams = self.streams.lock().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| VaultError::stream_error(format!("结果流不存在: {stream}")))?;
        if let Some(group_state) = state.groups.get_mut(group) {
            group_state.pending.remove(entry_id);
        }
        Ok(())
    }

    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> VaultResult<Vec<StreamEntry>> {
        let mut streams = self.streams.lock().await;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let min_idle = Duration::from_millis(min_idle_ms);
        let now = Instant::now();
        let mut claimed = Vec::new();
        for (id, pending) in group_state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(pending.delivered_at) >= min_idle {
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                let (_, payload) = &state.entries[pending.index];
                claimed.push(StreamEntry {
                    id: id.clone(),
                    payload: payload.clone(),
                });
            }
        }
        Ok(claimed)
    }

    async fn stream_len(&self, stream: &str) -> VaultResult<usize> {
        let streams = self.streams.lock().await;
        Ok(streams.get(stream).map_or(0, |s| s.entries.len()))
    }
}
