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
use crate::topics::Topic;
use async_trait::async_trait;
use datalineup_common::model::TopicMessage;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingTopicOptions {
    pub name: String,
}

/// Logs every published message; useful as a development sink.
pub struct LoggingTopic {
    options: LoggingTopicOptions,
}

impl LoggingTopic {
    pub fn new(options: LoggingTopicOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Topic for LoggingTopic {
    fn name(&self) -> &str {
        &self.options.name
    }

    async fn publish(&self, message: TopicMessage, _wait: bool) -> Result<bool, WorkerError> {
        info!(
            topic = self.options.name,
            message_id = %message.id,
            args = %serde_json::to_string(&message.args).unwrap_or_default(),
            "message published"
        );
        Ok(true)
    }
}
