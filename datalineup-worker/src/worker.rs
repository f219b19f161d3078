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
use crate::executors::executable::ExecutableQueue;
use crate::executors::queue::ExecutorQueue;
use crate::executors::{self, InlineExecutorOptions};
use crate::hooks::Hooks;
use crate::resources::provider::ProviderHandle;
use crate::services::WorkerServices;
use crate::work_manager::{WorkManager, WorkSync};
use datalineup_common::cancellation::CancellationToken;
use datalineup_common::model::JobId;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct RunningQueue {
    queue: Arc<ExecutableQueue>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// The worker runtime: owns the sync loop, one executor queue per declared
/// executor, and a poll task per assigned queue. Shutdown is hierarchical:
/// cancelling the worker stops the sync loop, drains queues for a bounded
/// grace and then cancels their pipelines.
pub struct Worker {
    services: Arc<WorkerServices>,
    work_manager: WorkManager,
    executors: HashMap<String, ExecutorQueue>,
    queues: HashMap<JobId, RunningQueue>,
}

impl Worker {
    pub fn new(services: Arc<WorkerServices>) -> Self {
        Self {
            work_manager: WorkManager::new(services.clone()),
            services,
            executors: HashMap::new(),
            queues: HashMap::new(),
        }
    }

    pub async fn run(&mut self) -> Result<(), WorkerError> {
        let token = self.services.cancellation.clone();
        let flusher = tokio::spawn(flush_loop(self.services.clone(), token.child_token()));

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                sync = self.work_manager.sync() => match sync {
                    Ok(sync) => self.apply(sync).await,
                    Err(error) => warn!(error = %error, "sync failed, retrying next period"),
                },
            }
        }

        self.shutdown().await;
        let _ = flusher.await;
        Ok(())
    }

    /// Applies one reconciliation: additions first, then drained drops.
    async fn apply(&mut self, sync: WorkSync) {
        for definition in &sync.executors.add {
            match executors::build_executor(
                definition,
                self.services.pipelines.clone(),
                self.services.cancellation.child_token(),
            ) {
                Ok(executor) => {
                    self.executors.insert(
                        definition.name.clone(),
                        ExecutorQueue::new(
                            executor,
                            self.services.resources.clone(),
                            self.services.job_state.clone(),
                            self.services.hooks.clone(),
                        ),
                    );
                }
                Err(e) => error!(executor = definition.name, error = %e, "failed to build executor"),
            }
        }

        for resource in sync.resources.add {
            if let Err(error) = self.services.resources.add(resource.clone()) {
                error!(resource = resource.name, error = %error, "failed to add resource");
            }
        }

        for entry in &sync.resources_providers.add {
            let handle = ProviderHandle::new(self.services.resources.clone(), entry.item.clone());
            if let Err(error) = entry.provider.open(&handle).await {
                error!(provider = entry.item.name, error = %error, "failed to open resources provider");
            }
        }

        for queue in sync.queues.add {
            self.start_queue(queue);
        }

        for queue in sync.queues.drop {
            self.stop_queue(queue.name().clone()).await;
        }

        for resource in sync.resources.drop {
            self.services.resources.remove(&resource.name);
        }

        for entry in sync.resources_providers.drop {
            entry.provider.close().await;
            self.services
                .resources
                .remove_provider_resources(&entry.item.name);
        }

        for definition in sync.executors.drop {
            if let Some(executor) = self.executors.remove(&definition.name) {
                executor.drain().await;
            }
        }
    }

    fn start_queue(&mut self, queue: Arc<ExecutableQueue>) {
        let executor_queue = match self.executors.get(queue.executor()).cloned() {
            Some(executor_queue) => executor_queue,
            None => {
                // An undeclared executor gets inline defaults so a lone
                // misnamed declaration cannot strand every queue using it.
                warn!(
                    job = %queue.name(),
                    executor = queue.executor(),
                    "executor not declared, using inline defaults"
                );
                let executor = Arc::new(executors::InlineExecutor::new(
                    queue.executor(),
                    InlineExecutorOptions::default(),
                    self.services.pipelines.clone(),
                    self.services.cancellation.child_token(),
                ));
                let executor_queue = ExecutorQueue::new(
                    executor,
                    self.services.resources.clone(),
                    self.services.job_state.clone(),
                    self.services.hooks.clone(),
                );
                self.executors
                    .insert(queue.executor().to_string(), executor_queue.clone());
                executor_queue
            }
        };

        info!(job = %queue.name(), "starting queue");
        let token = self.services.cancellation.child_token();
        let handle = tokio::spawn(run_queue(
            queue.clone(),
            executor_queue,
            self.services.hooks.clone(),
            token.clone(),
        ));
        self.queues.insert(
            queue.name().clone(),
            RunningQueue {
                queue,
                token,
                handle,
            },
        );
    }

    /// Drains a dropped queue within the configured grace, then cancels it.
    async fn stop_queue(&mut self, name: JobId) {
        let Some(running) = self.queues.remove(&name) else {
            return;
        };
        info!(job = %name, "stopping queue");
        running.token.cancel();
        let grace = self.services.config.drain_grace;
        if tokio::time::timeout(grace, running.handle).await.is_err() {
            warn!(job = %name, "queue did not drain in time, cancelling");
        }
        running.queue.close().await;
    }

    async fn shutdown(&mut self) {
        let names: Vec<JobId> = self.queues.keys().cloned().collect();
        for name in names {
            self.stop_queue(name).await;
        }
        for executor in self.executors.values() {
            let grace = self.services.config.drain_grace;
            if tokio::time::timeout(grace, executor.drain()).await.is_err() {
                warn!(
                    executor = executor.executor_name(),
                    "executor did not drain in time"
                );
            }
        }
        info!("worker stopped");
    }
}

/// Poll stage for one queue: one item at a time, gated by the queue's
/// parker while any stage is backpressured.
async fn run_queue(
    queue: Arc<ExecutableQueue>,
    executor_queue: ExecutorQueue,
    hooks: Arc<Hooks>,
    token: CancellationToken,
) {
    let stream = match queue.run().await {
        Ok(stream) => stream,
        Err(error) => {
            error!(job = %queue.name(), error = %error, "failed to start queue");
            return;
        }
    };
    let mut stream = stream;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = queue.parkers.wait() => {}
        }

        tokio::select! {
            _ = token.cancelled() => break,
            next = stream.next() => match next {
                None => break,
                Some(Err(error)) => {
                    error!(job = %queue.name(), error = %error, "queue source failed");
                    break;
                }
                Some(Ok(xmsg)) => {
                    hooks.message_polled.emit(&xmsg.message_context()).await;
                    executor_queue.submit(xmsg).await;
                }
            },
        }
    }
}

/// Pushes dirty job states to the manager on a fixed cadence, with a final
/// flush at shutdown.
async fn flush_loop(services: Arc<WorkerServices>, token: CancellationToken) {
    let interval = services.config.job_state_flush_interval;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                flush_once(&services).await;
            }
        }
    }
    flush_once(&services).await;
}

async fn flush_once(services: &Arc<WorkerServices>) {
    if let Some(payload) = services.job_state.flush() {
        match services.client.sync_jobs_states(payload.clone()).await {
            Ok(_) => services.job_state.mark_flushed(&payload),
            Err(error) => warn!(error = %error, "failed to flush job states"),
        }
    }
}
