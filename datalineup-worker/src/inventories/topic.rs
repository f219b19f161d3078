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
use crate::inventory::{CursorTracker, Inventory, Item};
use crate::topics::Topic;
use async_trait::async_trait;
use datalineup_common::model::Cursor;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

/// Wraps a topic as an inventory. Items carry no cursor (a topic is not
/// resumable); the topic's scoped acquisition moves into the item context
/// so the upstream ack fires on item completion.
pub struct TopicAdapter {
    name: String,
    topic: Arc<dyn Topic>,
    tracker: CursorTracker,
}

impl TopicAdapter {
    pub fn new(name: impl Into<String>, topic: Arc<dyn Topic>) -> Self {
        Self {
            name: name.into(),
            topic,
            tracker: CursorTracker::new(),
        }
    }
}

#[async_trait]
impl Inventory for TopicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn tracker(&self) -> &CursorTracker {
        &self.tracker
    }

    async fn open(&self) -> Result<(), WorkerError> {
        self.topic.open().await
    }

    async fn iterate(
        &self,
        _after: Option<Cursor>,
    ) -> Result<BoxStream<'static, Result<Item, WorkerError>>, WorkerError> {
        let stream = self.topic.run().await?;
        Ok(stream
            .map(|result| {
                result.map(|output| {
                    let mut item = Item::new(output.message.id.clone(), None, output.message.args);
                    item.tags = output.message.tags;
                    item.metadata = output.message.metadata;
                    item.context.merge(output.context);
                    item
                })
            })
            .boxed())
    }
}
