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
use datalineup_common::model::Cursor;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct PeriodicInventoryOptions {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default)]
    pub args: HashMap<String, Value>,
    /// Stop after this many emissions; `None` runs forever.
    #[serde(default)]
    pub count: Option<u64>,
}

/// Emits a copy of `args` on a fixed interval, with a monotonically
/// increasing counter as cursor.
pub struct PeriodicInventory {
    name: String,
    options: PeriodicInventoryOptions,
    tracker: CursorTracker,
}

impl PeriodicInventory {
    pub fn new(name: impl Into<String>, options: PeriodicInventoryOptions) -> Self {
        Self {
            name: name.into(),
            options,
            tracker: CursorTracker::new(),
        }
    }
}

#[async_trait]
impl Inventory for PeriodicInventory {
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
                    WorkerError::configuration(format!(
                        "invalid periodic inventory cursor: {cursor}"
                    ))
                })?
                .saturating_add(1),
        };
        let interval = self.options.interval;
        let args = self.options.args.clone();
        let end = self.options.count;

        Ok(futures::stream::unfold(start, move |counter| {
            let args = args.clone();
            async move {
                if let Some(end) = end {
                    if counter >= end {
                        return None;
                    }
                }
                tokio::time::sleep(interval).await;
                let item = Item::new(
                    counter.to_string(),
                    Some(Cursor::from(counter.to_string())),
                    args,
                );
                Some((Ok(item), counter + 1))
            }
        })
        .boxed())
    }
}
