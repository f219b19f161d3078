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

use crate::common::{queue_item, services, static_inventory_input};
use async_trait::async_trait;
use datalineup_common::model::{Cursor, JobId};
use datalineup_worker::error::WorkerError;
use datalineup_worker::inventory::{CursorTracker, Inventory, Item};
use datalineup_worker::job::Job;
use datalineup_worker::topics::Topic;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use test_r::test;

/// An inventory with explicit per-item cursors, including items that make
/// no checkpoint contribution.
struct ScriptedInventory {
    cursors: Vec<Option<&'static str>>,
    tracker: CursorTracker,
}

impl ScriptedInventory {
    fn new(cursors: Vec<Option<&'static str>>) -> Self {
        Self {
            cursors,
            tracker: CursorTracker::new(),
        }
    }
}

#[async_trait]
impl Inventory for ScriptedInventory {
    fn name(&self) -> &str {
        "scripted"
    }

    fn tracker(&self) -> &CursorTracker {
        &self.tracker
    }

    async fn iterate(
        &self,
        after: Option<Cursor>,
    ) -> Result<BoxStream<'static, Result<Item, WorkerError>>, WorkerError> {
        let start = match after {
            None => 0,
            Some(cursor) => cursor.as_str().parse::<usize>().unwrap() + 1,
        };
        let items: Vec<_> = self
            .cursors
            .iter()
            .enumerate()
            .skip(start)
            .map(|(index, cursor)| {
                Ok(Item::new(
                    index.to_string(),
                    cursor.map(Cursor::from),
                    HashMap::from([("x".to_string(), json!(1))]),
                ))
            })
            .collect();
        Ok(futures::stream::iter(items).boxed())
    }
}

fn scripted_queue_item(name: &str, cursor: Option<Cursor>) -> datalineup_common::model::QueueItemWithState {
    queue_item(
        name,
        static_inventory_input(vec![]),
        HashMap::new(),
        "unused",
        BTreeMap::new(),
        cursor,
    )
}

#[test]
async fn out_of_order_completion_compacts_pending_cursors() {
    let services = services();
    let job_id = JobId::from("compact");
    let inventory = Arc::new(ScriptedInventory::new(vec![
        Some("0"),
        None,
        Some("2"),
        None,
        Some("4"),
        Some("5"),
        Some("6"),
    ]));
    let job = Job::new(
        inventory,
        scripted_queue_item("compact", None),
        services.job_state.clone(),
    );

    let mut stream = job.run().await.unwrap();
    let mut outputs = Vec::new();
    for _ in 0..7 {
        outputs.push(stream.next().await.unwrap().unwrap());
    }

    let state_cursor = |job: &JobId| -> Option<serde_json::Value> {
        services
            .job_state
            .job_state(job)
            .cursor
            .map(|cursor| serde_json::from_str(cursor.as_str()).unwrap())
    };

    // Completing 2 and 5 leaves them pending: nothing is prefix-complete.
    std::mem::take(&mut outputs[2].context).close().await;
    std::mem::take(&mut outputs[5].context).close().await;
    assert_eq!(state_cursor(&job_id).unwrap(), json!({"v": 1, "p": ["2", "5"]}));

    // Completing 0 commits the prefix.
    std::mem::take(&mut outputs[0].context).close().await;
    assert_eq!(
        state_cursor(&job_id).unwrap(),
        json!({"v": 1, "a": "0", "p": ["2", "5"]})
    );

    // 1 and 3 carry no cursor; completing them only matters for ordering.
    std::mem::take(&mut outputs[1].context).close().await;
    std::mem::take(&mut outputs[3].context).close().await;
    assert_eq!(
        state_cursor(&job_id).unwrap(),
        json!({"v": 1, "a": "2", "p": ["5"]})
    );

    // Completing 6 and 4 drains the pending set entirely.
    std::mem::take(&mut outputs[6].context).close().await;
    std::mem::take(&mut outputs[4].context).close().await;
    assert_eq!(state_cursor(&job_id).unwrap(), json!({"v": 1, "a": "6"}));
}

#[test]
async fn crashed_worker_resumes_without_duplicates_or_loss() {
    // First run: items "0" and "1" commit, "2" stays in flight when the
    // worker dies.
    let flushed_cursor;
    {
        let services = services();
        let inventory = Arc::new(ScriptedInventory::new(vec![
            Some("0"),
            Some("1"),
            Some("2"),
        ]));
        let job = Job::new(
            inventory,
            scripted_queue_item("resume", None),
            services.job_state.clone(),
        );

        let mut stream = job.run().await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        let _in_flight = stream.next().await.unwrap().unwrap();

        first.context.close().await;
        second.context.close().await;

        flushed_cursor = services.job_state.job_state(&JobId::from("resume")).cursor;
        let frame: serde_json::Value =
            serde_json::from_str(flushed_cursor.as_ref().unwrap().as_str()).unwrap();
        assert_eq!(frame, json!({"v": 1, "a": "1"}));
        // The worker crashes here: `_in_flight` is dropped without closing.
    }

    // Restarted worker: only the in-flight item comes back.
    let services = services();
    let inventory = Arc::new(ScriptedInventory::new(vec![
        Some("0"),
        Some("1"),
        Some("2"),
    ]));
    let job = Job::new(
        inventory,
        scripted_queue_item("resume", flushed_cursor),
        services.job_state.clone(),
    );

    let mut stream = job.run().await.unwrap();
    let mut replayed = Vec::new();
    while let Some(output) = stream.next().await {
        let output = output.unwrap();
        replayed.push(output.cursor.clone().unwrap());
        output.context.close().await;
    }

    assert_eq!(replayed, vec![Cursor::from("2")]);
}
