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
use crate::inventories::fanin::{child_cursors, project_cursor};
use crate::inventory::{CursorTracker, Inventory, Item};
use async_trait::async_trait;
use datalineup_common::model::Cursor;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

/// Concatenates child inventories: the next child starts once the previous
/// one is exhausted. The aggregate cursor maps child names to their own
/// cursors, so resuming re-enters the chain where each child left off.
pub struct ChainedInventory {
    name: String,
    children: Vec<(String, Arc<dyn Inventory>)>,
    tracker: CursorTracker,
}

impl ChainedInventory {
    pub fn new(name: impl Into<String>, children: Vec<(String, Arc<dyn Inventory>)>) -> Self {
        Self {
            name: name.into(),
            children,
            tracker: CursorTracker::new(),
        }
    }
}

#[async_trait]
impl Inventory for ChainedInventory {
    fn name(&self) -> &str {
        &self.name
    }

    fn tracker(&self) -> &CursorTracker {
        &self.tracker
    }

    async fn open(&self) -> Result<(), WorkerError> {
        for (_, child) in &self.children {
            child.open().await?;
        }
        Ok(())
    }

    fn cursor(&self) -> Option<Cursor> {
        project_cursor(&self.children)
    }

    async fn iterate(
        &self,
        after: Option<Cursor>,
    ) -> Result<BoxStream<'static, Result<Item, WorkerError>>, WorkerError> {
        let cursors = child_cursors(after)?;

        let mut streams = Vec::with_capacity(self.children.len());
        for (child_name, child) in &self.children {
            let child_after = cursors.get(child_name).cloned();
            let tag = child_name.clone();
            let stream = child.run(child_after).await?.map(move |result| {
                result.map(|mut item| {
                    item.tags
                        .entry("inventory.name".to_string())
                        .or_insert_with(|| tag.clone());
                    item
                })
            });
            streams.push(stream);
        }

        Ok(futures::stream::iter(streams).flatten().boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventories::static_::{StaticInventory, StaticInventoryOptions};
    use serde_json::json;
    use std::collections::HashMap;
    use test_r::test;

    fn static_child(name: &str, count: usize) -> (String, Arc<dyn Inventory>) {
        let items = (0..count)
            .map(|n| HashMap::from([("n".to_string(), json!(n))]))
            .collect();
        (
            name.to_string(),
            Arc::new(StaticInventory::new(name, StaticInventoryOptions { items })),
        )
    }

    #[test]
    async fn chains_children_in_order() {
        let inventory = ChainedInventory::new(
            "chain",
            vec![static_child("a", 2), static_child("b", 1)],
        );

        let mut names = Vec::new();
        let mut stream = inventory.run(None).await.unwrap();
        while let Some(item) = stream.next().await {
            let item = item.unwrap();
            names.push(item.tags["inventory.name"].clone());
            item.context.close().await;
        }
        assert_eq!(names, vec!["a", "a", "b"]);

        let cursor = inventory.cursor().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(cursor.as_str()).unwrap();
        assert_eq!(
            parsed,
            json!({"a": "{\"v\":1,\"a\":\"1\"}", "b": "{\"v\":1,\"a\":\"0\"}"})
        );
    }
}
