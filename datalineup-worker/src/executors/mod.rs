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

pub mod error_handling;
pub mod executable;
pub mod parkers;
pub mod queue;

use crate::error::{PipelineError, WorkerError};
use crate::executors::executable::ExecutableMessage;
use crate::pipeline::{PipelineCall, PipelineRegistry};
use async_trait::async_trait;
use datalineup_common::cancellation::CancellationToken;
use datalineup_common::model::PipelineResults;
use serde::Deserialize;
use std::sync::Arc;

/// Runs user pipelines. `process_message` calls are bounded by
/// `concurrency` per executor.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    fn concurrency(&self) -> usize {
        1
    }

    async fn process_message(
        &self,
        message: &ExecutableMessage,
    ) -> Result<PipelineResults, PipelineError>;
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct InlineExecutorOptions {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for InlineExecutorOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Runs pipelines on the worker's own runtime, resolved from the pipeline
/// registry.
pub struct InlineExecutor {
    name: String,
    options: InlineExecutorOptions,
    registry: Arc<PipelineRegistry>,
    cancellation: CancellationToken,
}

impl InlineExecutor {
    pub fn new(
        name: impl Into<String>,
        options: InlineExecutorOptions,
        registry: Arc<PipelineRegistry>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            registry,
            cancellation,
        }
    }
}

#[async_trait]
impl Executor for InlineExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn concurrency(&self) -> usize {
        self.options.concurrency
    }

    async fn process_message(
        &self,
        message: &ExecutableMessage,
    ) -> Result<PipelineResults, PipelineError> {
        let Some(pipeline) = self.registry.resolve(&message.pipeline.info.name) else {
            return Err(PipelineError::new(
                "UnknownPipeline",
                format!("pipeline {} is not registered", message.pipeline.info.name),
            ));
        };

        let call = PipelineCall {
            message: message.message.clone(),
            args: message.pipeline.args.clone(),
            resources: message.resources_by_argument(),
            cursor_state: message.cursor_state(),
            cancellation: self.cancellation.child_token(),
        };
        pipeline(call).await
    }
}

/// Builds an executor from its component definition. Unknown types are a
/// configuration error; sync skips the queue and retries later.
pub fn build_executor(
    definition: &datalineup_common::model::ComponentDefinition,
    registry: Arc<PipelineRegistry>,
    cancellation: CancellationToken,
) -> Result<Arc<dyn Executor>, WorkerError> {
    match definition.type_name.as_str() {
        "InlineExecutor" => {
            let options: InlineExecutorOptions = if definition.options.is_empty() {
                InlineExecutorOptions::default()
            } else {
                serde_json::from_value(serde_json::to_value(&definition.options)?)?
            };
            Ok(Arc::new(InlineExecutor::new(
                &definition.name,
                options,
                registry,
                cancellation,
            )))
        }
        other => Err(WorkerError::configuration(format!(
            "unknown executor type: {other}"
        ))),
    }
}
