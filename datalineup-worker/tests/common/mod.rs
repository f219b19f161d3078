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

use async_trait::async_trait;
use datalineup_client::{ClientError, WorkerManagerClient};
use datalineup_common::model::{
    ComponentDefinition, FetchCursorsStatesInput, FetchCursorsStatesResponse, JobId,
    JobsStatesSyncInput, JobsStatesSyncResponse, LockResponse, OutputMap, PipelineInfo,
    QueueItem, QueueItemState, QueueItemWithState, QueuePipeline,
};
use datalineup_worker::config::WorkerConfig;
use datalineup_worker::executors::executable::ExecutableQueue;
use datalineup_worker::executors::queue::ExecutorQueue;
use datalineup_worker::executors::{InlineExecutor, InlineExecutorOptions};
use datalineup_worker::services::WorkerServices;
use datalineup_common::cancellation::CancellationToken;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

pub struct NullClient;

#[async_trait]
impl WorkerManagerClient for NullClient {
    async fn lock(&self) -> Result<LockResponse, ClientError> {
        Ok(LockResponse::default())
    }

    async fn sync_jobs_states(
        &self,
        _input: JobsStatesSyncInput,
    ) -> Result<JobsStatesSyncResponse, ClientError> {
        Ok(JobsStatesSyncResponse::default())
    }

    async fn fetch_cursors_states(
        &self,
        _input: FetchCursorsStatesInput,
    ) -> Result<FetchCursorsStatesResponse, ClientError> {
        Ok(FetchCursorsStatesResponse::default())
    }

    async fn sync_jobs(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

pub fn services() -> Arc<WorkerServices> {
    WorkerServices::new(WorkerConfig::default(), Arc::new(NullClient))
}

pub fn queue_item(
    name: &str,
    input: ComponentDefinition,
    output: OutputMap,
    pipeline_name: &str,
    resources: BTreeMap<String, String>,
    cursor: Option<datalineup_common::model::Cursor>,
) -> QueueItemWithState {
    QueueItem {
        name: JobId::from(name),
        input,
        output,
        pipeline: QueuePipeline {
            info: PipelineInfo {
                name: pipeline_name.to_string(),
                resources,
            },
            args: HashMap::new(),
        },
        labels: HashMap::from([("owner".to_string(), "team-datalineup".to_string())]),
        executor: "default".to_string(),
        config: HashMap::new(),
    }
    .with_state(QueueItemState {
        cursor,
        started_at: None,
    })
}

pub fn static_inventory_input(items: Vec<Value>) -> ComponentDefinition {
    ComponentDefinition::new("inv", "StaticInventory").with_options(HashMap::from([(
        "items".to_string(),
        Value::Array(items),
    )]))
}

pub fn memory_output(channel: &str, queue_name: &str, maxsize: usize) -> (String, Value) {
    (
        channel.to_string(),
        serde_json::json!([
            {"name": queue_name, "type": "MemoryTopic", "options": {"maxsize": maxsize}}
        ]),
    )
}

pub fn output_map(entries: Vec<(String, Value)>) -> OutputMap {
    entries
        .into_iter()
        .map(|(channel, value)| (channel, serde_json::from_value(value).unwrap()))
        .collect()
}

pub fn inline_executor_queue(services: &Arc<WorkerServices>, concurrency: usize) -> ExecutorQueue {
    let executor = Arc::new(InlineExecutor::new(
        "default",
        InlineExecutorOptions { concurrency },
        services.pipelines.clone(),
        services.cancellation.child_token(),
    ));
    ExecutorQueue::new(
        executor,
        services.resources.clone(),
        services.job_state.clone(),
        services.hooks.clone(),
    )
}

/// The poll stage: one item at a time, gated by the queue's parkers.
pub fn spawn_poller(
    queue: Arc<ExecutableQueue>,
    executor_queue: ExecutorQueue,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = queue.run().await.expect("queue starts");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = queue.parkers.wait() => {}
            }
            tokio::select! {
                _ = token.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(xmsg)) => {
                        queue
                            .hooks
                            .message_polled
                            .emit(&xmsg.message_context())
                            .await;
                        executor_queue.submit(xmsg).await;
                    }
                    Some(Err(_)) | None => break,
                },
            }
        }
    })
}

/// Polls a condition until it holds or a 5 second deadline passes.
pub async fn wait_until(description: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {description}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
