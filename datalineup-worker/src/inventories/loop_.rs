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

use crate::error::WorkerError;
use crate::inventory::{CursorTracker, Inventory, Item};
use async_trait::async_trait;
use datalineup_common::model::{Cursor, PipelineEvent};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

fn default_max_iterations() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopInventoryOptions {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

/// Re-emits an incrementing `iteration` item, one at a time: the next
/// iteration starts only once the previous item completed. Stops on a
/// `StopLoop` pipeline event or after `max_iterations`.
pub struct LoopInventory {
    name: String,
    options: LoopInventoryOptions,
    tracker: CursorTracker,
    stopped: Arc<AtomicBool>,
}

impl LoopInventory {
    pub fn new(name: impl Into<String>, options: LoopInventoryOptions) -> Self {
        Self {
            name: name.into(),
            options,
            tracker: CursorTracker::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Inventory for LoopInventory {
    fn name(&self) -> &str {
        &self.name
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
            Some(cursor) => cursor
                .as_str()
                .parse::<u64>()
                .map_err(|_| {
                    WorkerError::configuration(format!("invalid loop inventory cursor: {cursor}"))
                })?
                .saturating_add(1),
        };
        let max_iterations = self.options.max_iterations;
        let stopped = self.stopped.clone();

        struct LoopState {
            iteration: u64,
            previous_done: Option<Arc<Notify>>,
        }

        Ok(futures::stream::unfold(
            LoopState {
                iteration: start,
                previous_done: None,
            },
            move |mut state| {
                let stopped = stopped.clone();
                async move {
                    if let Some(previous) = state.previous_done.take() {
                        previous.notified().await;
                    }
                    if state.iteration >= max_iterations || stopped.load(Ordering::SeqCst) {
                        return None;
                    }

                    let iteration = state.iteration;
                    let done = Arc::new(Notify::new());
                    let mut item = Item::new(
                        iteration.to_string(),
                        Some(Cursor::from(iteration.to_string())),
                        HashMap::from([("iteration".to_string(), json!(iteration))]),
                    );
                    {
                        let done = done.clone();
                        item.context.on_close(move || done.notify_one());
                    }
                    {
                        let stopped = stopped.clone();
                        item.on_event = Some(Arc::new(move |event: &PipelineEvent| {
                            if matches!(event, PipelineEvent::StopLoop) {
                                stopped.store(true, Ordering::SeqCst);
                            }
                        }));
                    }

                    state.iteration += 1;
                    state.previous_done = Some(done);
                    Some((Ok(item), state))
                }
            },
        )
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    async fn stops_on_stop_loop_event() {
        let inventory = LoopInventory::new(
            "loop",
            LoopInventoryOptions { max_iterations: 20 },
        );

        let mut stream = inventory.run(None).await.unwrap();
        while let Some(item) = stream.next().await {
            let item = item.unwrap();
            let iteration = item.args["iteration"].as_u64().unwrap();
            if iteration == 10 {
                (item.on_event.as_ref().unwrap())(&PipelineEvent::StopLoop);
            }
            item.context.close().await;
        }

        assert_eq!(
            inventory.cursor().unwrap().as_str(),
            r#"{"v":1,"a":"10"}"#
        );
    }

    #[test]
    async fn stops_at_max_iterations() {
        let inventory = LoopInventory::new(
            "loop",
            LoopInventoryOptions { max_iterations: 20 },
        );

        let mut stream = inventory.run(None).await.unwrap();
        let mut count = 0;
        while let Some(item) = stream.next().await {
            item.unwrap().context.close().await;
            count += 1;
        }

        assert_eq!(count, 20);
        assert_eq!(
            inventory.cursor().unwrap().as_str(),
            r#"{"v":1,"a":"19"}"#
        );
    }
}
