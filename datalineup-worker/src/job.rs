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
use crate::inventory::Inventory;
use crate::state::JobStateStore;
use crate::topics::{Topic, TopicOutput};
use async_trait::async_trait;
use datalineup_common::model::{JobId, QueueItemWithState};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Binds an inventory, the job's stored cursor and the cursor-state store
/// into a topic-shaped source. Every yielded item commits its cursor on
/// context close; once the source drains and all in-flight items complete,
/// the job's terminal completion is recorded.
pub struct Job {
    inventory: Arc<dyn Inventory>,
    definition: QueueItemWithState,
    state: Arc<JobStateStore>,
}

struct JobProgress {
    job: JobId,
    inventory: Arc<dyn Inventory>,
    state: Arc<JobStateStore>,
    outstanding: AtomicUsize,
    drained: AtomicBool,
    failed: AtomicBool,
    completed: AtomicBool,
}

impl JobProgress {
    fn item_completed(&self) {
        self.state
            .set_job_cursor(&self.job, self.inventory.cursor());
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.maybe_complete();
    }

    fn maybe_complete(&self) {
        if self.drained.load(Ordering::SeqCst)
            && !self.failed.load(Ordering::SeqCst)
            && self.outstanding.load(Ordering::SeqCst) == 0
            && !self.completed.swap(true, Ordering::SeqCst)
        {
            info!(job = %self.job, "job completed");
            self.state.set_job_completed(&self.job);
        }
    }
}

impl Job {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        definition: QueueItemWithState,
        state: Arc<JobStateStore>,
    ) -> Self {
        Self {
            inventory,
            definition,
            state,
        }
    }
}

#[async_trait]
impl Topic for Job {
    fn name(&self) -> &str {
        self.definition.item.name.as_str()
    }

    async fn open(&self) -> Result<(), WorkerError> {
        self.inventory.open().await
    }

    async fn run(&self) -> Result<BoxStream<'static, Result<TopicOutput, WorkerError>>, WorkerError> {
        let after = self.definition.state.cursor.clone();
        let stream = self.inventory.run(after).await?;
        let progress = Arc::new(JobProgress {
            job: self.definition.item.name.clone(),
            inventory: self.inventory.clone(),
            state: self.state.clone(),
            outstanding: AtomicUsize::new(0),
            drained: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        });

        let mapped = {
            let progress = progress.clone();
            stream.map(move |result| match result {
                Ok(mut item) => {
                    progress.outstanding.fetch_add(1, Ordering::SeqCst);
                    let on_complete = progress.clone();
                    item.context.on_close(move || on_complete.item_completed());

                    let mut output = TopicOutput::new(item.to_message());
                    output.cursor = item.cursor.clone();
                    output.on_event = item.on_event.take();
                    output.context.merge(item.context);
                    Ok(output)
                }
                Err(err) => {
                    error!(job = %progress.job, error = %err, "job source failed");
                    progress.failed.store(true, Ordering::SeqCst);
                    progress.state.set_job_failed(&progress.job, err.to_string());
                    Err(err)
                }
            })
        };

        let on_drained = {
            let progress = progress.clone();
            futures::stream::poll_fn(move |_| {
                progress.drained.store(true, Ordering::SeqCst);
                progress.maybe_complete();
                std::task::Poll::Ready(None)
            })
        };

        Ok(mapped.chain(on_drained).boxed())
    }
}
