//! Redis任务队列的集成测试，需要本地Redis。
//! 连不上Redis时直接跳过（CI里由专门的job提供实例）。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use netvault_domain::entities::CollectionJob;
use netvault_domain::messaging::{Message, MessageQueue};
use netvault_infrastructure::{RedisConnectionManager, RedisQueue};
use serde_json::json;

async fn connect() -> Option<Arc<RedisConnectionManager>> {
    let url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    RedisConnectionManager::new(&url, Duration::from_secs(1))
        .await
        .ok()
        .map(Arc::new)
}

fn test_prefix() -> String {
    format!(
        "nvtest:{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

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
async fn crashed_consumer_pending_is_reclaimed() {
    let Some(conn) = connect().await else {
        return;
    };
    let prefix = test_prefix();
    let queue = "backup_tasks";

    let worker_a =
        RedisQueue::new(conn.clone(), prefix.clone(), "worker-a").with_claim_min_idle_ms(100);
    worker_a.create_queue(queue).await.unwrap();
    worker_a.publish_message(queue, &job("j1")).await.unwrap();

    let got = worker_a.consume_messages(queue, 10).await.unwrap();
    assert_eq!(got.len(), 1);

    // worker-a在确认前崩溃；接替进程以新的消费者名接入，
    // 滞留超过空闲阈值的消息必须被接管重投
    tokio::time::sleep(Duration::from_millis(300)).await;
    let worker_b =
        RedisQueue::new(conn.clone(), prefix.clone(), "worker-b").with_claim_min_idle_ms(100);
    let reclaimed = worker_b.consume_messages(queue, 10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, got[0].id);

    // 接管后正常确认，消息不再出现
    worker_b.ack_message(queue, &reclaimed[0].id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(worker_b.consume_messages(queue, 10).await.unwrap().is_empty());

    worker_b.purge_queue(queue).await.unwrap();
}

#[tokio::test]
async fn fresh_pending_is_not_stolen() {
    let Some(conn) = connect().await else {
        return;
    };
    let prefix = test_prefix();
    let queue = "backup_tasks";

    let worker_a =
        RedisQueue::new(conn.clone(), prefix.clone(), "worker-a").with_claim_min_idle_ms(60_000);
    worker_a.create_queue(queue).await.unwrap();
    worker_a.publish_message(queue, &job("j2")).await.unwrap();
    assert_eq!(worker_a.consume_messages(queue, 10).await.unwrap().len(), 1);

    // 在途消息尚未超过空闲阈值，另一个worker拿不到它
    let worker_b =
        RedisQueue::new(conn.clone(), prefix.clone(), "worker-b").with_claim_min_idle_ms(60_000);
    assert!(worker_b.consume_messages(queue, 10).await.unwrap().is_empty());

    worker_a.purge_queue(queue).await.unwrap();
}
