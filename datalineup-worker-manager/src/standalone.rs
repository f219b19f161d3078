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
use crate::context::WorkerManagerContext;
use crate::error::ManagerError;
use crate::services::{lock, sync};
use async_trait::async_trait;
use datalineup_client::{ClientError, WorkerManagerClient};
use datalineup_common::model::{
    FetchCursorsStatesInput, FetchCursorsStatesResponse, JobsStatesSyncInput,
    JobsStatesSyncResponse, LockInput, LockResponse,
};
use std::sync::Arc;
use tracing::warn;

fn client_error(error: ManagerError) -> ClientError {
    ClientError::UnexpectedStatus {
        status: poem::http::StatusCode::INTERNAL_SERVER_ERROR,
        body: error.to_string(),
    }
}

/// An embedded manager: the same lock/sync/state services as the HTTP API,
/// called in-process. Used by workers running standalone.
pub struct StandaloneWorkerManagerClient {
    context: Arc<WorkerManagerContext>,
    lock_input: LockInput,
}

impl StandaloneWorkerManagerClient {
    pub async fn connect(
        config: &WorkerManagerConfig,
        lock_input: LockInput,
    ) -> Result<Self, ManagerError> {
        let context = WorkerManagerContext::connect(config.clone()).await?;
        let client = Self {
            context,
            lock_input,
        };
        client.sync_jobs().await.map_err(|error| {
            ManagerError::configuration(format!("initial jobs sync failed: {error}"))
        })?;
        client.spawn_sync_loop();
        Ok(client)
    }

    fn spawn_sync_loop(&self) {
        let context = self.context.clone();
        let period = self.context.config.jobs_sync_period;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if let Err(error) = context.load_static_definitions().await {
                    warn!(error = %error, "failed to reload static definitions");
                    continue;
                }
                let definitions = context.static_definitions().await;
                if let Err(error) = sync::sync_jobs(&definitions, &context.store).await {
                    warn!(error = %error, "failed to sync jobs");
                }
            }
        });
    }
}

#[async_trait]
impl WorkerManagerClient for StandaloneWorkerManagerClient {
    async fn lock(&self) -> Result<LockResponse, ClientError> {
        let _guard = self.context.assignment_lock.lock().await;
        let definitions = self.context.static_definitions().await;
        lock::lock_jobs(
            &self.lock_input,
            &self.context.config,
            &definitions,
            &self.context.store,
        )
        .await
        .map_err(client_error)
    }

    async fn sync_jobs_states(
        &self,
        input: JobsStatesSyncInput,
    ) -> Result<JobsStatesSyncResponse, ClientError> {
        self.context
            .store
            .sync_jobs_states(&input.state)
            .await
            .map_err(client_error)?;
        Ok(JobsStatesSyncResponse::default())
    }

    async fn fetch_cursors_states(
        &self,
        input: FetchCursorsStatesInput,
    ) -> Result<FetchCursorsStatesResponse, ClientError> {
        let cursors = self
            .context
            .store
            .fetch_cursors_states(&input.cursors)
            .await
            .map_err(client_error)?;
        Ok(FetchCursorsStatesResponse { cursors })
    }

    async fn sync_jobs(&self) -> Result<(), ClientError> {
        let definitions = self.context.static_definitions().await;
        sync::sync_jobs(&definitions, &self.context.store)
            .await
            .map_err(client_error)
    }
}
