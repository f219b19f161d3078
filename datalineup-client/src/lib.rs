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
use datalineup_common::config::RetryConfig;
use datalineup_common::model::{
    ComponentDefinition, FetchCursorsStatesInput, FetchCursorsStatesResponse, ItemsResponse,
    JobDefinitionItem, JobsStatesSyncInput, JobsStatesSyncResponse, LockInput, LockResponse,
};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
test_r::enable!();

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("worker manager request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("worker manager returned {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("invalid worker manager url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// The manager as seen by a worker. The HTTP implementation talks to a
/// remote manager; the standalone implementation embeds the manager store.
#[async_trait]
pub trait WorkerManagerClient: Send + Sync {
    async fn lock(&self) -> Result<LockResponse, ClientError>;

    async fn sync_jobs_states(
        &self,
        input: JobsStatesSyncInput,
    ) -> Result<JobsStatesSyncResponse, ClientError>;

    async fn fetch_cursors_states(
        &self,
        input: FetchCursorsStatesInput,
    ) -> Result<FetchCursorsStatesResponse, ClientError>;

    /// Asks the manager to rebuild queues from job definitions.
    async fn sync_jobs(&self) -> Result<(), ClientError>;
}

pub struct HttpWorkerManagerClient {
    http: reqwest::Client,
    base_url: Url,
    lock_input: LockInput,
    retries: RetryConfig,
}

impl HttpWorkerManagerClient {
    pub fn new(
        base_url: &str,
        lock_input: LockInput,
        retries: RetryConfig,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url)?,
            lock_input,
            retries,
        })
    }

    async fn call<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R, ClientError> {
        let url = self.base_url.join(path)?;
        debug!(%url, %method, "worker manager call");

        let response = tryhard::retry_fn(|| async {
            let mut request = self.http.request(method.clone(), url.clone());
            if let Some(body) = body {
                request = request.json(body);
            }
            request.send().await?.error_for_status()
        })
        .retries(self.retries.max_attempts)
        .exponential_backoff(self.retries.min_delay)
        .max_delay(self.retries.max_delay)
        .await;

        match response {
            Ok(response) => Ok(response.json().await?),
            Err(error) => match error.status() {
                Some(status) => Err(ClientError::UnexpectedStatus {
                    status,
                    body: error.to_string(),
                }),
                None => Err(ClientError::Request(error)),
            },
        }
    }

    pub async fn topics(&self) -> Result<Vec<ComponentDefinition>, ClientError> {
        let response: ItemsResponse<ComponentDefinition> = self
            .call(Method::GET, "api/topics", None::<&()>)
            .await?;
        Ok(response.items)
    }

    pub async fn inventories(&self) -> Result<Vec<ComponentDefinition>, ClientError> {
        let response: ItemsResponse<ComponentDefinition> = self
            .call(Method::GET, "api/inventories", None::<&()>)
            .await?;
        Ok(response.items)
    }

    pub async fn job_definitions(&self) -> Result<Vec<JobDefinitionItem>, ClientError> {
        let response: ItemsResponse<JobDefinitionItem> = self
            .call(Method::GET, "api/job_definitions", None::<&()>)
            .await?;
        Ok(response.items)
    }
}

#[async_trait]
impl WorkerManagerClient for HttpWorkerManagerClient {
    async fn lock(&self) -> Result<LockResponse, ClientError> {
        self.call(Method::POST, "api/lock", Some(&self.lock_input))
            .await
    }

    async fn sync_jobs_states(
        &self,
        input: JobsStatesSyncInput,
    ) -> Result<JobsStatesSyncResponse, ClientError> {
        self.call(Method::PUT, "api/jobs/states", Some(&input)).await
    }

    async fn fetch_cursors_states(
        &self,
        input: FetchCursorsStatesInput,
    ) -> Result<FetchCursorsStatesResponse, ClientError> {
        self.call(Method::POST, "api/jobs/cursors/states/fetch", Some(&input))
            .await
    }

    async fn sync_jobs(&self) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .call(Method::POST, "api/jobs/sync", Some(&serde_json::json!({})))
            .await?;
        Ok(())
    }
}
