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
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Clone, Deserialize)]
pub struct FileTopicOptions {
    pub name: String,
    pub path: PathBuf,
}

/// JSON-lines file topic: publishes append one line, running reads the file
/// from the start. Meant for local development and tests.
pub struct FileTopic {
    options: FileTopicOptions,
    writer: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl FileTopic {
    pub fn new(options: FileTopicOptions) -> Self {
        Self {
            options,
            writer: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl Topic for FileTopic {
    fn name(&self) -> &str {
        &self.options.name
    }

    async fn run(&self) -> Result<BoxStream<'static, Result<TopicOutput, WorkerError>>, WorkerError> {
        let file = tokio::fs::File::open(&self.options.path).await?;
        let lines = BufReader::new(file).lines();

        Ok(futures::stream::unfold(lines, |mut lines| async move {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {
                    Some((None, lines))
                }
                Ok(Some(line)) => {
                    let parsed = serde_json::from_str::<TopicMessage>(&line)
                        .map(TopicOutput::new)
                        .map_err(WorkerError::from);
                    Some((Some(parsed), lines))
                }
                Ok(None) => None,
                Err(error) => Some((Some(Err(WorkerError::from(error))), lines)),
            }
        })
        .filter_map(|entry| async move { entry })
        .boxed())
    }

    async fn publish(&self, message: TopicMessage, _wait: bool) -> Result<bool, WorkerError> {
        let mut writer = self.writer.lock().await;
        if writer.is_none() {
            *writer = Some(
                tokio::fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&self.options.path)
                    .await?,
            );
        }
        let file = writer.as_mut().expect("writer opened above");
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(true)
    }

    async fn close(&self) {
        *self.writer.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn publish_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topic.jsonl");
        let topic = FileTopic::new(FileTopicOptions {
            name: "file-test".to_string(),
            path: path.clone(),
        });

        let first = TopicMessage::default();
        let second = TopicMessage::default();
        topic.publish(first.clone(), true).await.unwrap();
        topic.publish(second.clone(), true).await.unwrap();
        topic.close().await;

        let outputs: Vec<_> = topic
            .run()
            .await
            .unwrap()
            .map(|output| output.unwrap().message)
            .collect()
            .await;
        assert_eq!(outputs, vec![first, second]);
    }
}
