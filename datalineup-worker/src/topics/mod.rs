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

pub mod blocking;
pub mod file;
pub mod logging;
pub mod memory;
pub mod null;
pub mod static_;

use crate::error::WorkerError;
use crate::inventory::{EventObserver, ScopedContext};
use async_trait::async_trait;
use datalineup_common::model::{Cursor, TopicMessage};
use futures::stream::BoxStream;

/// A message together with its scoped acquisition (e.g. an upstream ack
/// handle), released exactly once when the consumer closes the context.
pub struct TopicOutput {
    pub message: TopicMessage,
    pub context: ScopedContext,
    /// Set when the message originated from a cursor-addressable item.
    pub cursor: Option<Cursor>,
    pub on_event: Option<EventObserver>,
}

impl TopicOutput {
    pub fn new(message: TopicMessage) -> Self {
        Self {
            message,
            context: ScopedContext::new(),
            cursor: None,
            on_event: None,
        }
    }
}

/// An async source and/or sink of `TopicMessage`s.
///
/// `publish` returning `Ok(false)` signals transient backpressure: the
/// caller should park and retry. With `wait = true` it blocks until the
/// message is accepted.
#[async_trait]
pub trait Topic: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn run(&self) -> Result<BoxStream<'static, Result<TopicOutput, WorkerError>>, WorkerError> {
        Err(WorkerError::Fatal(format!(
            "topic {} cannot be used as a source",
            self.name()
        )))
    }

    async fn publish(&self, message: TopicMessage, wait: bool) -> Result<bool, WorkerError> {
        let _ = (message, wait);
        Err(WorkerError::Fatal(format!(
            "topic {} cannot be used as a sink",
            self.name()
        )))
    }

    async fn close(&self) {}
}
