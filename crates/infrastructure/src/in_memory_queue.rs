use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use netvault_domain::messaging::{Message, MessageQueue};
use netvault_errors::{VaultError, VaultResult};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    /// 待投递的消息，FIFO
    ready: VecDeque<Message>,
    /// 已取走、尚未确认的消息
    pending: HashMap<String, Message>,
    /// 当前在队列中（ready或pending）的消息id，发布时据此去重
    ids: HashSet<String>,
}

/// 进程内任务队列。
///
/// 相同id的消息在前一份被确认前重复发布会被静默合并，
/// 调度器崩溃恢复后重放tick因此不会产生重复任务。
#[derive(Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 未确认消息数（测试用）
    pub async fn pending_count(&self, queue: &str) -> usize {
        let queues = self.queues.lock().await;
        queues.get(queue).map_or(0, |q| q.pending.len())
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> VaultResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        if !state.ids.insert(message.id.clone()) {
            debug!(queue, message_id = %message.id, "duplicate message suppressed");
            return Ok(());
        }
        state.ready.push_back(message.clone());
        Ok(())
    }

    async fn consume_messages(&self, queue: &str, count: usize) -> VaultResult<Vec<Message>> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };
        let mut taken = Vec::new();
        while taken.len() < count {
            let Some(message) = state.ready.pop_front() else {
                break;
            };
            state.pending.insert(message.id.clone(), message.clone());
            taken.push(message);
        }
        Ok(taken)
    }

    async fn ack_message(&self, queue: &str, message_id: &str) -> VaultResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| VaultError::queue_error(format!("队列不存在: {queue}")))?;
        if state.pending.remove(message_id).is_some() {
            state.ids.remove(message_id);
        }
        Ok(())
    }

    async fn nack_message(&self, queue: &str, message_id: &str) -> VaultResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| VaultError::queue_error(format!("队列不存在: {queue}")))?;
        if let Some(message) = state.pending.remove(message_id) {
            state.ready.push_front(message);
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str) -> VaultResult<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn queue_size(&self, queue: &str) -> VaultResult<usize> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map_or(0, |q| q.ready.len()))
    }

    async fn purge_queue(&self, queue: &str) -> VaultResult<()> {
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(queue) {
            state.ready.clear();
            state.pending.clear();
            state.ids.clear();
        }
        Ok(())
    }
}

/// 便于在组件间共享
pub type SharedQueue = Arc<dyn MessageQueue>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use netvault_domain::entities::CollectionJob;
    use serde_json::json;

    fn job(id: &str) -> Message {
        Message::collection(CollectionJob {
            id: id.to_string(),
            device_id: 1,
            device_address: "10.0.0.1".into(),
            queue: "backup_tasks".into(),
            credential: json!({}),
            backup_method: "noop".into(),
            timeout_seconds: 10,
            enqueued_at: Utc::now(),
            attempt: 1,
            max_attempts: 3,
        })
    }

    #[tokio::test]
    async fn fifo_order_per_queue() {
        let queue = InMemoryQueue::new();
        queue.publish_message("q", &job("a")).await.unwrap();
        queue.publish_message("q", &job("b")).await.unwrap();
        let got = queue.consume_messages("q", 10).await.unwrap();
        assert_eq!(
            got.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["a#1", "b#1"]
        );
    }

    #[tokio::test]
    async fn duplicate_ids_collapse_until_acked() {
        let queue = InMemoryQueue::new();
        queue.publish_message("q", &job("a")).await.unwrap();
        queue.publish_message("q", &job("a")).await.unwrap();
        assert_eq!(queue.queue_size("q").await.unwrap(), 1);

        let got = queue.consume_messages("q", 10).await.unwrap();
        assert_eq!(got.len(), 1);
        // 取走但未确认，仍处于去重窗口内
        queue.publish_message("q", &job("a")).await.unwrap();
        assert_eq!(queue.queue_size("q").await.unwrap(), 0);

        queue.ack_message("q", "a#1").await.unwrap();
        // 确认后同id可以再次入队（新一轮采集）
        queue.publish_message("q", &job("a")).await.unwrap();
        assert_eq!(queue.queue_size("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn nack_returns_message_to_head() {
        let queue = InMemoryQueue::new();
        queue.publish_message("q", &job("a")).await.unwrap();
        queue.publish_message("q", &job("b")).await.unwrap();
        let got = queue.consume_messages("q", 1).await.unwrap();
        assert_eq!(got[0].id, "a#1");
        queue.nack_message("q", "a#1").await.unwrap();
        let got = queue.consume_messages("q", 2).await.unwrap();
        assert_eq!(
            got.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["a#1", "b#1"]
        );
    }
}
