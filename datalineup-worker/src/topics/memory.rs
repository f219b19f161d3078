// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::WorkerError;
use crate::topics::{Topic, TopicOutput};
use async_trait::async_trait;
use datalineup_common::model::TopicMessage;
use futures::stream::BoxStream;
use futures::StreamExt;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

const DEFAULT_CAPACITY: usize = 100;

/// A named in-process bounded queue. Queues are process-global so tests and
/// unrelated jobs can observe each other's traffic by name.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<MemoryQueueInner>,
}

struct MemoryQueueInner {
    capacity: usize,
    items: Mutex<VecDeque<TopicMessage>>,
    readable: Notify,
    writable: Notify,
}

impl MemoryQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(MemoryQueueInner {
                capacity: capacity.max(1),
                items: Mutex::new(VecDeque::new()),
                readable: Notify::new(),
                writable: Notify::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_put(&self, message: TopicMessage) -> bool {
        let mut items = self.inner.items.lock().unwrap();
        if items.len() >= self.inner.capacity {
            return false;
        }
        items.push_back(message);
        drop(items);
        self.inner.readable.notify_waiters();
        true
    }

    pub async fn put(&self, message: TopicMessage) {
        let mut message = Some(message);
        loop {
            let writable = self.inner.writable.notified();
            {
                let mut items = self.inner.items.lock().unwrap();
                if items.len() < self.inner.capacity {
                    items.push_back(message.take().expect("message still pending"));
                    drop(items);
                    self.inner.readable.notify_waiters();
                    return;
                }
            }
            writable.await;
        }
    }

    pub fn try_get(&self) -> Option<TopicMessage> {
        let item = self.inner.items.lock().unwrap().pop_front();
        if item.is_some() {
            self.inner.writable.notify_waiters();
        }
        item
    }

    pub async fn get(&self) -> TopicMessage {
        loop {
            let readable = self.inner.readable.notified();
            if let Some(message) = self.try_get() {
                return message;
            }
            readable.await;
        }
    }
}

lazy_static! {
    static ref QUEUES: Mutex<HashMap<String, MemoryQueue>> = Mutex::new(HashMap::new());
}

/// The queue registered under `name`, created with `capacity` on first use.
pub fn get_queue(name: &str, capacity: usize) -> MemoryQueue {
    QUEUES
        .lock()
        .unwrap()
        .entry(name.to_string())
        .or_insert_with(|| MemoryQueue::new(capacity))
        .clone()
}

/// Drops the named queue; the next `get_queue` recreates it empty.
pub fn drop_queue(name: &str) {
    QUEUES.lock().unwrap().remove(name);
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryTopicOptions {
    pub name: String,
    #[serde(default)]
    pub maxsize: Option<usize>,
}

pub struct MemoryTopic {
    options: MemoryTopicOptions,
    queue: MemoryQueue,
}

impl MemoryTopic {
    pub fn new(options: MemoryTopicOptions) -> Self {
        let queue = get_queue(
            &options.name,
            options.maxsize.unwrap_or(DEFAULT_CAPACITY),
        );
        Self { options, queue }
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    fn name(&self) -> &str {
        &self.options.name
    }

    async fn run(&self) -> Result<BoxStream<'static, Result<TopicOutput, WorkerError>>, WorkerError> {
        let queue = self.queue.clone();
        Ok(futures::stream::unfold(queue, |queue| async move {
            let message = queue.get().await;
            Some((Ok(TopicOutput::new(message)), queue))
        })
        .boxed())
    }

    async fn publish(&self, message: TopicMessage, wait: bool) -> Result<bool, WorkerError> {
        if wait {
            self.queue.put(message).await;
            Ok(true)
        } else {
            Ok(self.queue.try_put(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn queue_blocks_at_capacity_and_wakes_on_pop() {
        let queue = MemoryQueue::new(1);
        assert!(queue.try_put(TopicMessage::default()));
        assert!(!queue.try_put(TopicMessage::default()));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.put(TopicMessage::default()).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        queue.try_get().unwrap();
        waiter.await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    async fn topic_round_trip() {
        drop_queue("memory-test");
        let topic = MemoryTopic::new(MemoryTopicOptions {
            name: "memory-test".to_string(),
            maxsize: Some(10),
        });

        let sent = TopicMessage::default();
        assert!(topic.publish(sent.clone(), false).await.unwrap());

        let mut stream = topic.run().await.unwrap();
        let output = stream.next().await.unwrap().unwrap();
        assert_eq!(output.message, sent);
        output.context.close().await;
    }
}
