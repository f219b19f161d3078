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

use crate::error::ManagerError;
use crate::static_definitions::StaticDefinitions;
use crate::store::Store;
use chrono::Utc;
use tracing::{error, info};

/// Materializes declared jobs into queues: plain jobs get one queue for
/// life, interval job definitions get a fresh timestamped job once the
/// previous run completed and the interval elapsed. A failed run resumes
/// from its last cursor.
pub async fn sync_jobs(
    definitions: &StaticDefinitions,
    store: &Store,
) -> Result<(), ManagerError> {
    for job in definitions.jobs.values() {
        let name = job.name.as_str();
        match store.get_job(name).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(job = name, "creating job");
                store.create_queue(name).await?;
                store.create_job(name, name, None, None).await?;
            }
            Err(err) => error!(job = name, error = %err, "failed to sync job"),
        }
    }

    for definition in definitions.job_definitions.values() {
        if let Err(err) = sync_job_definition(definition, store).await {
            error!(job_definition = definition.name, error = %err, "failed to sync job definition");
        }
    }

    Ok(())
}

async fn sync_job_definition(
    definition: &datalineup_common::model::JobDefinitionItem,
    store: &Store,
) -> Result<(), ManagerError> {
    let last_job = store.get_last_job(&definition.name).await?;

    let mut resume_cursor = None;
    if let Some(last_job) = &last_job {
        let Some(_completed_at) = last_job.completed_at else {
            return Ok(());
        };
        match &last_job.error {
            None => {
                let next_start = last_job.started_at
                    + chrono::Duration::from_std(definition.minimal_interval)
                        .unwrap_or_default();
                if next_start > Utc::now() {
                    return Ok(());
                }
            }
            Some(_) => {
                // A failed run resumes where it stopped.
                resume_cursor = last_job.cursor.clone();
            }
        }
    }

    let job_name = format!("{}-{}", definition.name, Utc::now().timestamp());
    info!(job = job_name, "creating job from definition");
    store.create_queue(&job_name).await?;
    store
        .create_job(
            &job_name,
            &job_name,
            Some(&definition.name),
            resume_cursor.as_deref(),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declarative::load_objects_from_str;
    use datalineup_common::model::JobsStates;
    use test_r::test;

    const TOPOLOGY: &str = r#"
apiVersion: datalineup.khulnasoft.io/v1alpha1
kind: DatalineupInventory
metadata:
  name: source
spec:
  type: StaticInventory
  options:
    items: [{n: 1}]
---
apiVersion: datalineup.khulnasoft.io/v1alpha1
kind: DatalineupJob
metadata:
  name: always-on
spec:
  input:
    inventory: source
  pipeline:
    name: example.copy
---
apiVersion: datalineup.khulnasoft.io/v1alpha1
kind: DatalineupJobDefinition
metadata:
  name: nightly
spec:
  minimalInterval: 1h
  template:
    input:
      inventory: source
    pipeline:
      name: example.copy
"#;

    async fn setup() -> (StaticDefinitions, Store) {
        let objects = load_objects_from_str(TOPOLOGY).unwrap();
        let definitions = StaticDefinitions::compile(&objects).unwrap();
        let store = Store::connect("sqlite::memory:").await.unwrap();
        (definitions, store)
    }

    #[test]
    async fn creates_jobs_once_and_definitions_on_interval() {
        let (definitions, store) = setup().await;

        sync_jobs(&definitions, &store).await.unwrap();
        assert!(store.get_job("always-on").await.unwrap().is_some());
        let first = store.get_last_job("nightly").await.unwrap().unwrap();

        // A second sync is a no-op while the interval job is running.
        sync_jobs(&definitions, &store).await.unwrap();
        let last = store.get_last_job("nightly").await.unwrap().unwrap();
        assert_eq!(first.name, last.name);
    }

    #[test]
    async fn failed_interval_job_resumes_from_cursor() {
        let (definitions, store) = setup().await;
        sync_jobs(&definitions, &store).await.unwrap();
        let first = store.get_last_job("nightly").await.unwrap().unwrap();

        let mut states = JobsStates::default();
        states.jobs.insert(
            first.name.clone().into(),
            datalineup_common::model::JobState {
                cursor: Some(r#"{"v":1,"a":"7"}"#.into()),
                completion: Some(datalineup_common::model::JobCompletion {
                    completed_at: Utc::now(),
                    error: Some("boom".to_string()),
                }),
                cursors_states: Default::default(),
            },
        );
        store.sync_jobs_states(&states).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        sync_jobs(&definitions, &store).await.unwrap();
        let retry = store.get_last_job("nightly").await.unwrap().unwrap();
        assert_ne!(retry.name, first.name);
        assert_eq!(retry.cursor.as_deref(), Some(r#"{"v":1,"a":"7"}"#));
    }
}
