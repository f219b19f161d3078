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
use crate::error::ManagerError;
use crate::static_definitions::StaticDefinitions;
use crate::store::{QueueRow, Store};
use chrono::Utc;
use datalineup_common::model::{
    Cursor, LockInput, LockResponse, QueueItemState, QueueItemWithState,
};
use regex::Regex;
use tracing::warn;

fn selector(input: &LockInput) -> Result<Option<Regex>, ManagerError> {
    input
        .selector
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|error| ManagerError::configuration(format!("invalid selector: {error}")))
}

fn matches(selector: &Option<Regex>, name: &str) -> bool {
    selector.as_ref().map_or(true, |regex| regex.is_match(name))
}

async fn queue_item_for(
    queue: &QueueRow,
    definitions: &StaticDefinitions,
    store: &Store,
) -> Result<Option<QueueItemWithState>, ManagerError> {
    let Some(job) = store.get_job(&queue.name).await? else {
        warn!(queue = queue.name, "queue without a job, disabling");
        store.disable_queue(&queue.name).await?;
        return Ok(None);
    };
    if job.completed_at.is_some() {
        store.disable_queue(&queue.name).await?;
        return Ok(None);
    }

    let template = match &job.job_definition_name {
        Some(definition_name) => definitions
            .job_definitions
            .get(definition_name)
            .map(|definition| {
                let mut item = definition.template.clone();
                item.name = datalineup_common::model::JobId::from(job.name.clone());
                item
            }),
        None => definitions.jobs.get(&job.name.clone().into()).cloned(),
    };
    let Some(template) = template else {
        warn!(queue = queue.name, "queue without a declared job, disabling");
        store.disable_queue(&queue.name).await?;
        return Ok(None);
    };

    Ok(Some(template.with_state(QueueItemState {
        cursor: job.cursor.map(Cursor::from),
        started_at: Some(job.started_at),
    })))
}

/// Computes one worker's assignment: its still-valid queues, topped up from
/// the unassigned pool, plus every declared resource, provider and
/// executor.
pub async fn lock_jobs(
    input: &LockInput,
    config: &WorkerManagerConfig,
    definitions: &StaticDefinitions,
    store: &Store,
) -> Result<LockResponse, ManagerError> {
    let selector = selector(input)?;
    let cutoff = Utc::now()
        - chrono::Duration::from_std(config.assignment_expiration).unwrap_or_default();

    let mut queues: Vec<QueueRow> = store
        .get_assigned_queues(&input.worker_id, cutoff)
        .await?
        .into_iter()
        .filter(|queue| matches(&selector, &queue.name))
        .collect();

    let missing = config.work_items_per_worker.saturating_sub(queues.len());
    if missing > 0 {
        let now = Utc::now();
        let unassigned = store.get_unassigned_queues(cutoff, missing * 2).await?;
        for queue in unassigned
            .into_iter()
            .filter(|queue| matches(&selector, &queue.name))
            .take(missing)
        {
            store.assign_queue(&queue.name, &input.worker_id, now).await?;
            queues.push(queue);
        }
    }

    let mut items = Vec::with_capacity(queues.len());
    for queue in &queues {
        if let Some(item) = queue_item_for(queue, definitions, store).await? {
            // Workers only running specific executors must not receive
            // other executors' queues.
            let accepted = input
                .executors
                .as_ref()
                .map_or(true, |executors| executors.contains(&item.item.executor));
            if accepted {
                items.push(item);
            }
        }
    }

    Ok(LockResponse {
        items,
        resources: definitions.resources.values().cloned().collect(),
        resources_providers: definitions.resources_providers.values().cloned().collect(),
        executors: definitions.executors.values().cloned().collect(),
    })
}
