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
use crate::executors::error_handling::{self, ErrorRouting};
use crate::executors::executable::ExecutableMessage;
use crate::executors::Executor;
use crate::hooks::{Hooks, PublishContext};
use crate::state::JobStateStore;
use crate::resources::ResourcesManager;
use datalineup_common::model::{PipelineEvent, PipelineOutput, PipelineResults};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

/// Drives messages through schedule → submit → execute → publish → commit
/// for one executor, bounding concurrent `process_message` calls by the
/// executor's declared concurrency.
#[derive(Clone)]
pub struct ExecutorQueue {
    inner: Arc<ExecutorQueueInner>,
}

struct ExecutorQueueInner {
    executor: Arc<dyn Executor>,
    semaphore: Arc<Semaphore>,
    resources: ResourcesManager,
    state: Arc<JobStateStore>,
    hooks: Arc<Hooks>,
    tasks: TaskTracker,
}

impl ExecutorQueue {
    pub fn new(
        executor: Arc<dyn Executor>,
        resources: ResourcesManager,
        state: Arc<JobStateStore>,
        hooks: Arc<Hooks>,
    ) -> Self {
        let concurrency = executor.concurrency().max(1);
        Self {
            inner: Arc::new(ExecutorQueueInner {
                executor,
                semaphore: Arc::new(Semaphore::new(concurrency)),
                resources,
                state,
                hooks,
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn executor_name(&self) -> &str {
        self.inner.executor.name()
    }

    /// Schedule stage: acquire every required resource. When an instance is
    /// not immediately available the queue parks and a background waiter
    /// resumes it once the acquisition completes; the submit stage then
    /// waits for an executor slot.
    pub async fn submit(&self, xmsg: ExecutableMessage) {
        let required = xmsg.required_resources();
        if required.is_empty() {
            self.scheduled(xmsg, Vec::new()).await;
            return;
        }

        match self.inner.resources.try_acquire_many(&required) {
            Some(leases) => self.scheduled(xmsg, leases).await,
            None => {
                let token = xmsg.parkers.park();
                let this = self.clone();
                self.inner.tasks.spawn(async move {
                    let leases = this.inner.resources.acquire_many(&required).await;
                    xmsg.parkers.unpark(token);
                    this.scheduled(xmsg, leases).await;
                });
            }
        }
    }

    async fn scheduled(&self, xmsg: ExecutableMessage, leases: Vec<crate::resources::ResourceLease>) {
        xmsg.attach_leases(leases);
        let context = xmsg.message_context();
        self.inner.hooks.message_scheduled.emit(&context).await;

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("executor semaphore closed");
        self.inner.hooks.message_submitted.emit(&context).await;

        let this = self.clone();
        self.inner.tasks.spawn(async move {
            this.process(permit, xmsg).await;
        });
    }

    async fn process(
        &self,
        permit: tokio::sync::OwnedSemaphorePermit,
        xmsg: ExecutableMessage,
    ) {
        if let Some(cursor) = &xmsg.cursor {
            xmsg.set_cursor_state(self.inner.state.cursor_state(&xmsg.job, cursor));
        }

        let context = xmsg.message_context();
        let guard = self.inner.hooks.message_executed.open(&context).await;
        let result = self.inner.executor.process_message(&xmsg).await;
        guard.complete(result.as_ref()).await;
        // The executor slot frees once process_message returns; publishing
        // is gated by the topics, not by executor concurrency.
        drop(permit);

        let (results, surfaced) = match result {
            Ok(results) => (results, None),
            Err(error) => match error_handling::route(&xmsg, error) {
                ErrorRouting::Handled(results) => (results, None),
                ErrorRouting::Unhandled { results, error } => (results, Some(error)),
            },
        };

        self.publish_outputs(&xmsg, &results.outputs).await;
        self.apply_events(&xmsg, &results).await;
        self.release_resources(&xmsg, &results);

        xmsg.close_executing().await;
        xmsg.close_context().await;

        if let Some(surfaced) = surfaced {
            error!(
                job = %xmsg.job,
                pipeline = xmsg.pipeline.info.name,
                error = %surfaced,
                "pipeline failed unhandled"
            );
        }
    }

    /// Publish stage: each output goes to every topic of its channel. A
    /// topic reporting backpressure parks the queue and blocks this message
    /// until the publish is accepted.
    async fn publish_outputs(&self, xmsg: &ExecutableMessage, outputs: &[PipelineOutput]) {
        for output in outputs {
            let Some(channel) = xmsg.output.get(&output.channel) else {
                warn!(
                    job = %xmsg.job,
                    channel = output.channel,
                    "dropping output for undeclared channel"
                );
                continue;
            };

            for topic in &channel.topics {
                let publish_context = PublishContext {
                    message: xmsg.message_context(),
                    channel: output.channel.clone(),
                    topic: topic.name().to_string(),
                };
                let guard = self
                    .inner
                    .hooks
                    .message_published
                    .open(&publish_context)
                    .await;

                let accepted = match topic.publish(output.message.clone(), false).await {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        let token = xmsg.parkers.park();
                        let blocked_guard = self
                            .inner
                            .hooks
                            .output_blocked
                            .open(&publish_context)
                            .await;
                        let result = topic.publish(output.message.clone(), true).await;
                        let blocked_result = match &result {
                            Ok(_) => Ok(()),
                            Err(error) => Err(PipelineError::new("PublishError", error.to_string())),
                        };
                        blocked_guard.complete(blocked_result.as_ref()).await;
                        xmsg.parkers.unpark(token);
                        result.map(|_| ())
                    }
                    Err(error) => Err(error),
                }
                .map_err(|error| PipelineError::new("PublishError", error.to_string()));

                match &accepted {
                    Ok(()) => guard.complete(Ok(&())).await,
                    Err(error) => {
                        guard.complete(Err(error)).await;
                        error!(
                            job = %xmsg.job,
                            topic = topic.name(),
                            error = %error,
                            "publish failed"
                        );
                    }
                }
            }
        }
    }

    /// Events stage: forward pipeline events to the hook bus, the item's
    /// own observer and the cursor-state store.
    async fn apply_events(&self, xmsg: &ExecutableMessage, results: &PipelineResults) {
        if results.events.is_empty() {
            return;
        }
        self.inner
            .hooks
            .pipeline_events_emitted
            .emit(&crate::hooks::PipelineEventsContext {
                message: xmsg.message_context(),
                events: results.events.clone(),
            })
            .await;

        for event in &results.events {
            if let Some(observer) = &xmsg.on_event {
                observer(event);
            }
            if let PipelineEvent::CursorStateUpdated { state, cursor } = event {
                let cursor = cursor.clone().or_else(|| xmsg.cursor.clone());
                match cursor {
                    Some(cursor) => {
                        self.inner
                            .state
                            .set_cursor_state(&xmsg.job, cursor, state.clone());
                    }
                    None => warn!(
                        job = %xmsg.job,
                        "cursor state update without a cursor"
                    ),
                }
            }
        }
    }

    fn release_resources(&self, xmsg: &ExecutableMessage, results: &PipelineResults) {
        for lease in xmsg.take_leases() {
            let release_at = results
                .resources
                .iter()
                .find(|used| used.type_name == lease.type_name())
                .and_then(|used| used.release_at);
            lease.release(release_at);
        }
    }

    /// Stops accepting internal tasks and waits for in-flight ones.
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}
