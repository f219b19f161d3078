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

use crate::config::WorkerConfig;
use crate::hooks::Hooks;
use crate::pipeline::PipelineRegistry;
use crate::resources::ResourcesManager;
use crate::state::JobStateStore;
use crate::work_factory::ComponentRegistry;
use datalineup_client::WorkerManagerClient;
use datalineup_common::cancellation::CancellationToken;
use std::sync::Arc;

/// Everything shared across a worker: configuration, the hook bus, the two
/// mutable singletons (resources, job state), the pipeline and component
/// registries and the manager client.
pub struct WorkerServices {
    pub config: WorkerConfig,
    pub hooks: Arc<Hooks>,
    pub resources: ResourcesManager,
    pub job_state: Arc<JobStateStore>,
    pub pipelines: Arc<PipelineRegistry>,
    pub registry: ComponentRegistry,
    pub client: Arc<dyn WorkerManagerClient>,
    pub cancellation: CancellationToken,
}

impl WorkerServices {
    pub fn new(config: WorkerConfig, client: Arc<dyn WorkerManagerClient>) -> Arc<Self> {
        Arc::new(Self {
            config,
            hooks: Arc::new(Hooks::new()),
            resources: ResourcesManager::new(),
            job_state: Arc::new(JobStateStore::new()),
            pipelines: Arc::new(PipelineRegistry::new()),
            registry: ComponentRegistry::with_builtins(),
            client,
            cancellation: CancellationToken::new(),
        })
    }
}
