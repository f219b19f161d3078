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

use crate::config::WorkerManagerConfig;
use crate::declarative::{load_objects_from_path, BaseObject};
use crate::error::ManagerError;
use crate::static_definitions::StaticDefinitions;
use crate::store::Store;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Shared state of a running manager: the store, the compiled static
/// definitions and a lock serializing assignment decisions.
pub struct WorkerManagerContext {
    pub config: WorkerManagerConfig,
    pub store: Store,
    definitions: RwLock<Arc<StaticDefinitions>>,
    /// Serializes lock requests so two workers cannot claim the same queue.
    pub assignment_lock: Mutex<()>,
}

impl WorkerManagerContext {
    pub async fn connect(config: WorkerManagerConfig) -> Result<Arc<Self>, ManagerError> {
        let store = Store::connect(&config.database_url).await?;
        let context = Arc::new(Self {
            config,
            store,
            definitions: RwLock::new(Arc::new(StaticDefinitions::default())),
            assignment_lock: Mutex::new(()),
        });
        context.load_static_definitions().await?;
        Ok(context)
    }

    /// Reloads declarative objects from the configured directories and
    /// re-applies stored topology patches.
    pub async fn load_static_definitions(&self) -> Result<(), ManagerError> {
        let mut objects: Vec<BaseObject> = Vec::new();
        for directory in &self.config.static_definitions_dirs {
            objects.extend(load_objects_from_path(directory)?);
        }
        if let Some(selector) = &self.config.static_definitions_jobs_selector {
            let selector = regex::Regex::new(selector).map_err(|error| {
                ManagerError::configuration(format!("invalid jobs selector: {error}"))
            })?;
            objects.retain(|object| {
                object.kind != crate::declarative::KIND_JOB
                    || selector.is_match(&object.metadata.name)
            });
        }
        let patches = self.store.load_topology_patches().await?;
        let definitions = StaticDefinitions::compile_with_patches(&objects, &patches)?;
        info!(
            jobs = definitions.jobs.len(),
            job_definitions = definitions.job_definitions.len(),
            "static definitions loaded"
        );
        *self.definitions.write().await = Arc::new(definitions);
        Ok(())
    }

    pub async fn static_definitions(&self) -> Arc<StaticDefinitions> {
        self.definitions.read().await.clone()
    }
}
