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

use crate::context::WorkerManagerContext;
use crate::declarative::BaseObject;
use crate::services::{lock, sync};
use crate::static_definitions::apply_patch;
use datalineup_common::model::{
    ComponentDefinition, FetchCursorsStatesInput, FetchCursorsStatesResponse, ItemsResponse,
    JobDefinitionItem, JobsStatesSyncInput, JobsStatesSyncResponse, LockInput, LockResponse,
};
use poem::web::{Data, Json};
use poem::{get, handler, post, put, EndpointExt, Route};
use serde_json::json;
use std::sync::Arc;

#[handler]
async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({}))
}

#[handler]
async fn post_lock(
    Data(context): Data<&Arc<WorkerManagerContext>>,
    Json(input): Json<LockInput>,
) -> poem::Result<Json<LockResponse>> {
    let _guard = context.assignment_lock.lock().await;
    let definitions = context.static_definitions().await;
    let response = lock::lock_jobs(&input, &context.config, &definitions, &context.store).await?;
    Ok(Json(response))
}

#[handler]
async fn post_jobs_sync(
    Data(context): Data<&Arc<WorkerManagerContext>>,
) -> poem::Result<Json<serde_json::Value>> {
    context.load_static_definitions().await?;
    let definitions = context.static_definitions().await;
    sync::sync_jobs(&definitions, &context.store).await?;
    Ok(Json(json!({})))
}

#[handler]
async fn put_jobs_states(
    Data(context): Data<&Arc<WorkerManagerContext>>,
    Json(input): Json<JobsStatesSyncInput>,
) -> poem::Result<Json<JobsStatesSyncResponse>> {
    context.store.sync_jobs_states(&input.state).await?;
    Ok(Json(JobsStatesSyncResponse::default()))
}

#[handler]
async fn post_fetch_cursors_states(
    Data(context): Data<&Arc<WorkerManagerContext>>,
    Json(input): Json<FetchCursorsStatesInput>,
) -> poem::Result<Json<FetchCursorsStatesResponse>> {
    let cursors = context.store.fetch_cursors_states(&input.cursors).await?;
    Ok(Json(FetchCursorsStatesResponse { cursors }))
}

#[handler]
async fn get_topics(
    Data(context): Data<&Arc<WorkerManagerContext>>,
) -> Json<ItemsResponse<ComponentDefinition>> {
    let definitions = context.static_definitions().await;
    Json(ItemsResponse {
        items: definitions.topics.values().cloned().collect(),
    })
}

#[handler]
async fn get_inventories(
    Data(context): Data<&Arc<WorkerManagerContext>>,
) -> Json<ItemsResponse<ComponentDefinition>> {
    let definitions = context.static_definitions().await;
    Json(ItemsResponse {
        items: definitions.inventories.values().cloned().collect(),
    })
}

#[handler]
async fn get_job_definitions(
    Data(context): Data<&Arc<WorkerManagerContext>>,
) -> Json<ItemsResponse<JobDefinitionItem>> {
    let definitions = context.static_definitions().await;
    Json(ItemsResponse {
        items: definitions.job_definitions.values().cloned().collect(),
    })
}

#[handler]
async fn put_topologies_patch(
    Data(context): Data<&Arc<WorkerManagerContext>>,
    Json(patch): Json<BaseObject>,
) -> poem::Result<Json<BaseObject>> {
    let existing = context
        .store
        .load_topology_patches()
        .await?
        .into_iter()
        .find(|object| object.kind == patch.kind && object.metadata.name == patch.metadata.name);
    let merged = match existing {
        Some(existing) => apply_patch(&existing, &patch)?,
        None => patch,
    };
    context.store.save_topology_patch(&merged).await?;
    context.load_static_definitions().await?;
    Ok(Json(merged))
}

pub fn make_api_route(context: Arc<WorkerManagerContext>) -> impl poem::Endpoint {
    Route::new()
        .at("/healthcheck", get(healthcheck))
        .at(
            "/metrics",
            poem::endpoint::PrometheusExporter::new(prometheus::default_registry().clone()),
        )
        .at("/api/lock", post(post_lock))
        .at("/api/jobs/sync", post(post_jobs_sync))
        .at("/api/jobs/states", put(put_jobs_states))
        .at(
            "/api/jobs/cursors/states/fetch",
            post(post_fetch_cursors_states),
        )
        .at("/api/topics", get(get_topics))
        .at("/api/inventories", get(get_inventories))
        .at("/api/job_definitions", get(get_job_definitions))
        .at("/api/topologies/patch", put(put_topologies_patch))
        .data(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerManagerConfig;
    use poem::test::TestClient;
    use test_r::test;

    async fn test_context() -> Arc<WorkerManagerContext> {
        let directory = tempfile::tempdir().unwrap();
        std::fs::write(
            directory.path().join("topology.yaml"),
            r#"
apiVersion: datalineup.khulnasoft.io/v1alpha1
kind: DatalineupInventory
metadata:
  name: source
spec:
  type: StaticInventory
  options:
    items: [{n: 1}, {n: 2}]
---
apiVersion: datalineup.khulnasoft.io/v1alpha1
kind: DatalineupJob
metadata:
  name: copy-job
spec:
  input:
    inventory: source
  pipeline:
    name: example.copy
"#,
        )
        .unwrap();

        let config = WorkerManagerConfig {
            database_url: "sqlite::memory:".to_string(),
            static_definitions_dirs: vec![directory.keep()],
            ..WorkerManagerConfig::default()
        };
        WorkerManagerContext::connect(config).await.unwrap()
    }

    #[test]
    async fn lock_assigns_declared_jobs() {
        let context = test_context().await;
        let client = TestClient::new(make_api_route(context));

        let response = client.post("/api/jobs/sync").send().await;
        response.assert_status_is_ok();

        let response = client
            .post("/api/lock")
            .body_json(&LockInput {
                worker_id: "worker-1".to_string(),
                selector: None,
                executors: None,
            })
            .send()
            .await;
        response.assert_status_is_ok();
        let lock: LockResponse = response.json().await.value().deserialize();
        assert_eq!(lock.items.len(), 1);
        assert_eq!(lock.items[0].item.name.as_str(), "copy-job");

        // A second worker locking gets nothing: the queue is taken.
        let response = client
            .post("/api/lock")
            .body_json(&LockInput {
                worker_id: "worker-2".to_string(),
                selector: None,
                executors: None,
            })
            .send()
            .await;
        response.assert_status_is_ok();
        let lock: LockResponse = response.json().await.value().deserialize();
        assert!(lock.items.is_empty());
    }

    #[test]
    async fn inventories_endpoint_lists_declared_components() {
        let context = test_context().await;
        let client = TestClient::new(make_api_route(context));

        let response = client.get("/api/inventories").send().await;
        response.assert_status_is_ok();
        let items: ItemsResponse<ComponentDefinition> =
            response.json().await.value().deserialize();
        assert_eq!(items.items.len(), 1);
        assert_eq!(items.items[0].type_name, "StaticInventory");
    }
}
