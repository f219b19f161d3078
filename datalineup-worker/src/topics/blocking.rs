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
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// A synchronous driver pair. `run_once` returning `None` terminates the
/// source.
pub trait BlockingTopicDriver: Send + Sync + 'static {
    fn run_once(&self) -> Result<Option<TopicMessage>, WorkerError>;

    fn publish_blocking(&self, message: TopicMessage) -> Result<bool, WorkerError>;
}

/// Adapts a blocking driver into the async topic contract. Each call is
/// confined to the blocking pool; driver errors are logged and retried
/// with a fixed backoff.
pub struct BlockingTopic {
    name: String,
    driver: Arc<dyn BlockingTopicDriver>,
    retry_backoff: Duration,
}

impl BlockingTopic {
    pub fn new(name: impl Into<String>, driver: Arc<dyn BlockingTopicDriver>) -> Self {
        Self {
            name: name.into(),
            driver,
            retry_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }
}

#[async_trait]
impl Topic for BlockingTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<BoxStream<'static, Result<TopicOutput, WorkerError>>, WorkerError> {
        let driver = self.driver.clone();
        let name = self.name.clone();
        let backoff = self.retry_backoff;

        Ok(futures::stream::unfold(
            (driver, name, backoff),
            |(driver, name, backoff)| async move {
                loop {
                    let call = driver.clone();
                    let result = tokio::task::spawn_blocking(move || call.run_once())
                        .await
                        .expect("blocking topic worker panicked");
                    match result {
                        Ok(Some(message)) => {
                            return Some((Ok(TopicOutput::new(message)), (driver, name, backoff)));
                        }
                        Ok(None) => return None,
                        Err(err) => {
                            error!(topic = name, error = %err, "blocking topic failed, retrying");
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            },
        )
        .boxed())
    }

    async fn publish(&self, message: TopicMessage, _wait: bool) -> Result<bool, WorkerError> {
        let driver = self.driver.clone();
        tokio::task::spawn_blocking(move || driver.publish_blocking(message))
            .await
            .expect("blocking topic worker panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use test_r::test;

    struct FlakyDriver {
        steps: Mutex<Vec<Result<Option<TopicMessage>, WorkerError>>>,
        published: Mutex<Vec<TopicMessage>>,
    }

    impl BlockingTopicDriver for FlakyDriver {
        fn run_once(&self) -> Result<Option<TopicMessage>, WorkerError> {
            self.steps.lock().unwrap().remove(0)
        }

        fn publish_blocking(&self, message: TopicMessage) -> Result<bool, WorkerError> {
            self.published.lock().unwrap().push(message);
            Ok(true)
        }
    }

    #[test]
    async fn retries_errors_and_terminates_on_none() {
        let message = TopicMessage::default();
        let driver = Arc::new(FlakyDriver {
            steps: Mutex::new(vec![
                Err(WorkerError::Topic("broker hiccup".to_string())),
                Ok(Some(message.clone())),
                Ok(None),
            ]),
            published: Mutex::new(Vec::new()),
        });

        let topic = BlockingTopic::new("blocking-test", driver.clone())
            .with_retry_backoff(Duration::from_millis(1));
        let received: Vec<_> = topic
            .run()
            .await
            .unwrap()
            .map(|output| output.unwrap().message)
            .collect()
            .await;

        assert_eq!(received, vec![message]);
        assert!(topic.publish(TopicMessage::default(), true).await.unwrap());
        assert_eq!(driver.published.lock().unwrap().len(), 1);
    }
}
