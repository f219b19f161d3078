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

#[derive(Debug, Clone, Deserialize)]
pub struct StaticTopicOptions {
    pub name: String,
    pub messages: Vec<TopicMessage>,
}

/// Yields a fixed list of messages, then ends.
pub struct StaticTopic {
    options: StaticTopicOptions,
}

impl StaticTopic {
    pub fn new(options: StaticTopicOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Topic for StaticTopic {
    fn name(&self) -> &str {
        &self.options.name
    }

    async fn run(&self) -> Result<BoxStream<'static, Result<TopicOutput, WorkerError>>, WorkerError> {
        Ok(
            futures::stream::iter(self.options.messages.clone().into_iter())
                .map(|message| Ok(TopicOutput::new(message)))
                .boxed(),
        )
    }
}
