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

use crate::error::PipelineError;
use datalineup_common::model::{JobId, MessageId, PipelineEvent, PipelineResults, QueueItemWithState};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Identifying attributes of a message inside the executor pipeline, handed
/// to every stage hook.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub job: JobId,
    pub executor: String,
    pub pipeline: String,
    pub labels: HashMap<String, String>,
    pub message_id: MessageId,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PublishContext {
    pub message: MessageContext,
    pub channel: String,
    pub topic: String,
}

#[derive(Debug, Clone)]
pub struct PipelineEventsContext {
    pub message: MessageContext,
    pub events: Vec<PipelineEvent>,
}

pub type EventHandler<C> =
    Arc<dyn Fn(&C) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A fire-and-observe interception point. Handler failures are logged and
/// never abort the producer.
pub struct EventHook<C> {
    name: &'static str,
    handlers: Mutex<Vec<EventHandler<C>>>,
}

impl<C> EventHook<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, handler: EventHandler<C>) {
        self.handlers.lock().unwrap().push(handler);
    }

    pub async fn emit(&self, context: &C) {
        let handlers: Vec<_> = self.handlers.lock().unwrap().clone();
        let futures: Vec<_> = handlers.iter().map(|handler| handler(context)).collect();
        for result in futures::future::join_all(futures).await {
            if let Err(error) = result {
                warn!(hook = self.name, error = %error, "hook handler failed");
            }
        }
    }
}

/// The completion half of a scoped hook handler, run after the guarded
/// region, in reverse registration order.
pub type ScopedCompletion<R> =
    Box<dyn FnOnce(Result<&R, &PipelineError>) -> BoxFuture<'static, ()> + Send>;

pub type ScopedHandler<C, R> = Arc<
    dyn Fn(&C) -> BoxFuture<'static, anyhow::Result<ScopedCompletion<R>>> + Send + Sync,
>;

/// An interception point wrapping a guarded region: each handler observes
/// the context before the region and its result after it. Completions
/// unwind LIFO so handlers nest like scopes.
pub struct ScopedHook<C, R> {
    name: &'static str,
    handlers: Mutex<Vec<ScopedHandler<C, R>>>,
}

impl<C, R> ScopedHook<C, R> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, handler: ScopedHandler<C, R>) {
        self.handlers.lock().unwrap().push(handler);
    }

    pub async fn open(&self, context: &C) -> ScopedHookGuard<R> {
        let handlers: Vec<_> = self.handlers.lock().unwrap().clone();
        let mut completions = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            match handler(context).await {
                Ok(completion) => completions.push(completion),
                Err(error) => {
                    warn!(hook = self.name, error = %error, "hook handler failed");
                }
            }
        }
        ScopedHookGuard { completions }
    }
}

pub struct ScopedHookGuard<R> {
    completions: Vec<ScopedCompletion<R>>,
}

impl<R> ScopedHookGuard<R> {
    pub async fn complete(self, result: Result<&R, &PipelineError>) {
        for completion in self.completions.into_iter().rev() {
            completion(result).await;
        }
    }
}

/// Every stage transition of the executor pipeline, exposed for metrics,
/// tracing and policy.
pub struct Hooks {
    pub work_queue_built: EventHook<QueueItemWithState>,
    pub message_polled: EventHook<MessageContext>,
    pub message_scheduled: EventHook<MessageContext>,
    pub message_submitted: EventHook<MessageContext>,
    pub message_executed: ScopedHook<MessageContext, PipelineResults>,
    pub message_published: ScopedHook<PublishContext, ()>,
    pub output_blocked: ScopedHook<PublishContext, ()>,
    pub pipeline_events_emitted: EventHook<PipelineEventsContext>,
}

impl Hooks {
    pub fn new() -> Self {
        Self {
            work_queue_built: EventHook::new("work_queue_built"),
            message_polled: EventHook::new("message_polled"),
            message_scheduled: EventHook::new("message_scheduled"),
            message_submitted: EventHook::new("message_submitted"),
            message_executed: ScopedHook::new("message_executed"),
            message_published: ScopedHook::new("message_published"),
            output_blocked: ScopedHook::new("output_blocked"),
            pipeline_events_emitted: EventHook::new("pipeline_events_emitted"),
        }
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new()
    }
}
