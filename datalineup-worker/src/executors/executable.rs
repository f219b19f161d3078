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
use crate::executors::parkers::Parkers;
use crate::hooks::{Hooks, MessageContext};
use crate::inventory::{EventObserver, ScopedContext};
use crate::resources::{ResourceData, ResourceLease};
use crate::topics::Topic;
use datalineup_common::model::{
    Cursor, ErrorHandler, JobId, QueueItemWithState, QueuePipeline, TopicMessage,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Where one output channel publishes, and how errors on it are handled.
#[derive(Default)]
pub struct OutputChannel {
    pub topics: Vec<Arc<dyn Topic>>,
    pub handler: Option<ErrorHandler>,
}

pub type OutputMap = HashMap<String, OutputChannel>;

/// One inventory item on its way through the executor pipeline, enriched
/// with everything the stages need. Owns two scoped contexts: the executing
/// context closes on pipeline completion, the full context on cursor
/// commit.
pub struct ExecutableMessage {
    pub message: TopicMessage,
    pub cursor: Option<Cursor>,
    pub pipeline: QueuePipeline,
    pub job: JobId,
    pub executor: String,
    pub labels: HashMap<String, String>,
    pub output: Arc<OutputMap>,
    pub parkers: Parkers,
    pub hooks: Arc<Hooks>,
    pub on_event: Option<EventObserver>,
    leases: Mutex<Vec<ResourceLease>>,
    cursor_state: Mutex<Option<serde_json::Value>>,
    executing_context: Mutex<Option<ScopedContext>>,
    context: Mutex<Option<ScopedContext>>,
}

impl ExecutableMessage {
    pub fn message_context(&self) -> MessageContext {
        MessageContext {
            job: self.job.clone(),
            executor: self.executor.clone(),
            pipeline: self.pipeline.info.name.clone(),
            labels: self.labels.clone(),
            message_id: self.message.id.clone(),
            tags: self.message.tags.clone(),
        }
    }

    /// The declared resource types this message must hold before executing.
    pub fn required_resources(&self) -> Vec<String> {
        self.pipeline.info.resources.values().cloned().collect()
    }

    pub fn attach_leases(&self, leases: Vec<ResourceLease>) {
        *self.leases.lock().unwrap() = leases;
    }

    /// Previously persisted user state for this message's cursor.
    pub fn cursor_state(&self) -> Option<serde_json::Value> {
        self.cursor_state.lock().unwrap().clone()
    }

    pub fn set_cursor_state(&self, state: Option<serde_json::Value>) {
        *self.cursor_state.lock().unwrap() = state;
    }

    pub fn take_leases(&self) -> Vec<ResourceLease> {
        std::mem::take(&mut self.leases.lock().unwrap())
    }

    /// Acquired resources keyed by the pipeline argument that asked for
    /// them.
    pub fn resources_by_argument(&self) -> HashMap<String, Arc<ResourceData>> {
        let leases = self.leases.lock().unwrap();
        self.pipeline
            .info
            .resources
            .iter()
            .filter_map(|(argument, type_name)| {
                leases
                    .iter()
                    .find(|lease| lease.type_name() == type_name)
                    .map(|lease| (argument.clone(), lease.data().clone()))
            })
            .collect()
    }

    pub fn push_executing_release(&self, release: impl FnOnce() + Send + 'static) {
        if let Some(context) = self.executing_context.lock().unwrap().as_mut() {
            context.push_release(release);
        }
    }

    pub fn push_context_release(&self, release: impl FnOnce() + Send + 'static) {
        if let Some(context) = self.context.lock().unwrap().as_mut() {
            context.push_release(release);
        }
    }

    /// Closes the executing context; the first call wins.
    pub async fn close_executing(&self) {
        let context = self.executing_context.lock().unwrap().take();
        if let Some(context) = context {
            context.close().await;
        }
    }

    /// Closes the full context, which commits the item's cursor.
    pub async fn close_context(&self) {
        let context = self.context.lock().unwrap().take();
        if let Some(context) = context {
            context.close().await;
        }
    }
}

/// The per-job runtime object: the job's source, the resolved output
/// channels and the backpressure gate, yielding executable messages.
pub struct ExecutableQueue {
    pub definition: QueueItemWithState,
    pub input: Arc<dyn Topic>,
    pub output: Arc<OutputMap>,
    pub parkers: Parkers,
    pub hooks: Arc<Hooks>,
}

impl ExecutableQueue {
    pub fn new(
        definition: QueueItemWithState,
        input: Arc<dyn Topic>,
        output: OutputMap,
        hooks: Arc<Hooks>,
    ) -> Self {
        Self {
            definition,
            input,
            output: Arc::new(output),
            parkers: Parkers::new(),
            hooks,
        }
    }

    pub fn name(&self) -> &JobId {
        &self.definition.item.name
    }

    pub fn executor(&self) -> &str {
        &self.definition.item.executor
    }

    pub async fn run(
        &self,
    ) -> Result<BoxStream<'static, Result<ExecutableMessage, WorkerError>>, WorkerError> {
        let stream = self.input.run().await?;
        let pipeline = self.definition.item.pipeline.clone();
        let job = self.definition.item.name.clone();
        let executor = self.definition.item.executor.clone();
        let labels = self.definition.item.labels.clone();
        let output = self.output.clone();
        let parkers = self.parkers.clone();
        let hooks = self.hooks.clone();

        Ok(stream
            .map(move |result| {
                result.map(|topic_output| ExecutableMessage {
                    message: topic_output.message,
                    cursor: topic_output.cursor,
                    pipeline: pipeline.clone(),
                    job: job.clone(),
                    executor: executor.clone(),
                    labels: labels.clone(),
                    output: output.clone(),
                    parkers: parkers.clone(),
                    hooks: hooks.clone(),
                    on_event: topic_output.on_event,
                    leases: Mutex::new(Vec::new()),
                    cursor_state: Mutex::new(None),
                    executing_context: Mutex::new(Some(ScopedContext::new())),
                    context: Mutex::new(Some(topic_output.context)),
                })
            })
            .boxed())
    }

    pub async fn close(&self) {
        self.input.close().await;
    }
}
