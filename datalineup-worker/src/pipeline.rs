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
use crate::resources::ResourceData;
use datalineup_common::cancellation::CancellationToken;
use datalineup_common::model::{PipelineResults, TopicMessage};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Everything a registered pipeline receives for one message.
pub struct PipelineCall {
    pub message: TopicMessage,
    /// Static arguments from the queue definition.
    pub args: HashMap<String, Value>,
    /// Acquired resources, keyed by the pipeline argument name.
    pub resources: HashMap<String, Arc<ResourceData>>,
    /// Previously persisted state for this message's cursor, if any.
    pub cursor_state: Option<Value>,
    pub cancellation: CancellationToken,
}

pub type PipelineFuture = BoxFuture<'static, Result<PipelineResults, PipelineError>>;

pub type PipelineFn = Arc<dyn Fn(PipelineCall) -> PipelineFuture + Send + Sync>;

/// Pipelines are resolved by name against this registry; there is no symbol
/// lookup at runtime. Register application pipelines before starting the
/// worker.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: Mutex<HashMap<String, PipelineFn>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, pipeline: PipelineFn) {
        self.pipelines.lock().unwrap().insert(name.into(), pipeline);
    }

    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, pipeline: F)
    where
        F: Fn(PipelineCall) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<PipelineResults, PipelineError>> + Send + 'static,
    {
        self.register(
            name,
            Arc::new(move |call| Box::pin(pipeline(call)) as PipelineFuture),
        );
    }

    pub fn resolve(&self, name: &str) -> Option<PipelineFn> {
        self.pipelines.lock().unwrap().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn registered_pipelines_resolve_and_run() {
        let registry = PipelineRegistry::new();
        registry.register_fn("example.noop", |_call| async {
            Ok(PipelineResults::default())
        });

        let pipeline = registry.resolve("example.noop").unwrap();
        let call = PipelineCall {
            message: TopicMessage::default(),
            args: HashMap::new(),
            resources: HashMap::new(),
            cursor_state: None,
            cancellation: CancellationToken::new(),
        };
        assert!(pipeline(call).await.is_ok());
        assert!(registry.resolve("missing").is_none());
    }
}
