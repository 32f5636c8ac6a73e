//! Push-notification queue for callees that are offline.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use voip_core::{VoipError, VoipResult};

/// Append-only queues keyed by name. Each item is one JSON document.
pub trait PushQueue: Send + Sync {
    fn enqueue<'a>(
        &'a self,
        queue: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = VoipResult<()>> + Send + 'a>>;
}

/// Writes each queue as `<dir>/<queue>.jsonl`, one item per line.
pub struct JsonlPushQueue {
    dir: PathBuf,
}

impl JsonlPushQueue {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn queue_path(&self, queue: &str) -> PathBuf {
        self.dir.join(format!("{queue}.jsonl"))
    }
}

impl PushQueue for JsonlPushQueue {
    fn enqueue<'a>(
        &'a self,
        queue: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = VoipResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if payload.contains(&b'\n') {
                return Err(VoipError::Push("payload spans multiple lines".into()));
            }
            tokio::fs::create_dir_all(&self.dir).await?;
            let mut line = Vec::with_capacity(payload.len() + 1);
            line.extend_from_slice(payload);
            line.push(b'\n');

            let mut f = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.queue_path(queue))
                .await?;
            f.write_all(&line).await?;
            f.flush().await?;
            Ok(())
        })
    }
}

/// Chooses which queue an application's notifications go to.
#[derive(Debug, Clone, Default)]
pub struct PushPolicy {
    per_app_queues: Vec<i64>,
}

impl PushPolicy {
    pub const DEFAULT_QUEUE: &'static str = "voip_push_queue";

    pub fn new(per_app_queues: Vec<i64>) -> Self {
        Self { per_app_queues }
    }

    pub fn queue_name(&self, appid: i64) -> String {
        if self.per_app_queues.contains(&appid) {
            format!("{}_{appid}", Self::DEFAULT_QUEUE)
        } else {
            Self::DEFAULT_QUEUE.to_string()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use voip_core::control::DialNotification;

    #[test]
    fn test_queue_names() {
        let policy = PushPolicy::new(vec![7]);
        assert_eq!(policy.queue_name(7), "voip_push_queue_7");
        assert_eq!(policy.queue_name(8), "voip_push_queue");
        assert_eq!(PushPolicy::default().queue_name(7), "voip_push_queue");
    }

    #[tokio::test]
    async fn test_jsonl_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JsonlPushQueue::new(dir.path().join("queues"));
        let first = DialNotification {
            sender: 1,
            receiver: 2,
            appid: 7,
        };
        let second = DialNotification {
            sender: 3,
            receiver: 4,
            appid: 7,
        };
        queue
            .enqueue("voip_push_queue", &first.to_json().unwrap())
            .await
            .unwrap();
        queue
            .enqueue("voip_push_queue", &second.to_json().unwrap())
            .await
            .unwrap();

        let text =
            std::fs::read_to_string(dir.path().join("queues").join("voip_push_queue.jsonl"))
                .unwrap();
        let lines: Vec<DialNotification> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines, vec![first, second]);
    }

    #[tokio::test]
    async fn test_jsonl_rejects_multiline_payload() {
        let dir = tempfile::tempdir().unwrap();
        let queue = JsonlPushQueue::new(dir.path().to_path_buf());
        assert!(queue.enqueue("q", b"{\n}").await.is_err());
    }
}
