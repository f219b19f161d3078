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
use crate::streams::{RoundRobinFanIn, WeightedFanIn};
use async_trait::async_trait;
use datalineup_common::model::Cursor;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;

/// Splits an aggregate `{child: cursor}` cursor back into per-child parts.
pub(crate) fn child_cursors(
    after: Option<Cursor>,
) -> Result<HashMap<String, Cursor>, WorkerError> {
    match after {
        None => Ok(HashMap::new()),
        Some(cursor) => serde_json::from_str(cursor.as_str())
            .map_err(|_| WorkerError::configuration(format!("invalid fan-in cursor: {cursor}"))),
    }
}

/// Projects child cursors into one aggregate JSON object, omitting children
/// without a checkpoint. Cursors are never compared across children.
pub(crate) fn project_cursor(children: &[(String, Arc<dyn Inventory>)]) -> Option<Cursor> {
    let cursors: HashMap<&str, String> = children
        .iter()
        .filter_map(|(name, child)| {
            child
                .cursor()
                .map(|cursor| (name.as_str(), cursor.0))
        })
        .collect();
    Some(Cursor::new(
        serde_json::to_string(&cursors).expect("cursor map serializes"),
    ))
}

async fn child_streams(
    children: &[(String, Arc<dyn Inventory>)],
    after: Option<Cursor>,
) -> Result<Vec<BoxStream<'static, Result<Item, WorkerError>>>, WorkerError> {
    let cursors = child_cursors(after)?;
    let mut streams = Vec::with_capacity(children.len());
    for (child_name, child) in children {
        let child_after = cursors.get(child_name).cloned();
        let tag = child_name.clone();
        let stream = child
            .run(child_after)
            .await?
            .map(move |result| {
                result.map(|mut item| {
                    item.tags
                        .entry("inventory.name".to_string())
                        .or_insert_with(|| tag.clone());
                    item
                })
            })
            .boxed();
        streams.push(stream);
    }
    Ok(streams)
}

/// Round-robin multiplexing over child inventories, each keeping its own
/// cursor.
pub struct FanIn {
    name: String,
    children: Vec<(String, Arc<dyn Inventory>)>,
    tracker: CursorTracker,
}

impl FanIn {
    pub fn new(name: impl Into<String>, children: Vec<(String, Arc<dyn Inventory>)>) -> Self {
        Self {
            name: name.into(),
            children,
            tracker: CursorTracker::new(),
        }
    }
}

#[async_trait]
impl Inventory for FanIn {
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
        let streams = child_streams(&self.children, after).await?;
        Ok(RoundRobinFanIn::new(streams).boxed())
    }
}

/// Credit-weighted multiplexing: a child declared with priority p receives a
/// share proportional to 1/p of the emitted items.
pub struct PriorityFanIn {
    name: String,
    children: Vec<(String, Arc<dyn Inventory>)>,
    priorities: Vec<u64>,
    tracker: CursorTracker,
}

impl PriorityFanIn {
    pub fn new(
        name: impl Into<String>,
        children: Vec<(String, u64, Arc<dyn Inventory>)>,
    ) -> Self {
        let mut priorities = Vec::with_capacity(children.len());
        let children = children
            .into_iter()
            .map(|(child_name, priority, child)| {
                priorities.push(priority);
                (child_name, child)
            })
            .collect();
        Self {
            name: name.into(),
            children,
            priorities,
            tracker: CursorTracker::new(),
        }
    }
}

#[async_trait]
impl Inventory for PriorityFanIn {
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
        let streams = child_streams(&self.children, after).await?;
        let weighted = self
            .priorities
            .iter()
            .copied()
            .zip(streams)
            .collect::<Vec<_>>();
        Ok(WeightedFanIn::new(weighted).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventories::static_::{StaticInventory, StaticInventoryOptions};
    use serde_json::json;
    use test_r::test;

    fn static_child(name: &str, args: Vec<serde_json::Value>) -> Arc<dyn Inventory> {
        let items = args
            .into_iter()
            .map(|value| HashMap::from([("n".to_string(), value)]))
            .collect();
        Arc::new(StaticInventory::new(name, StaticInventoryOptions { items }))
    }

    fn number_items(count: usize, value: &str) -> Vec<serde_json::Value> {
        (0..count).map(|_| json!(value)).collect()
    }

    #[test]
    async fn fanin_yields_all_children_and_projects_cursor() {
        let inventory = FanIn::new(
            "fanin",
            vec![
                (
                    "a".to_string(),
                    static_child("a", vec![json!(0), json!(1), json!(2), json!(3)]),
                ),
                ("b".to_string(), static_child("b", vec![json!(4), json!(5)])),
            ],
        );

        let mut stream = inventory.run(None).await.unwrap();
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item.unwrap());
        }

        let numbers: std::collections::HashSet<i64> = items
            .iter()
            .map(|item| item.args["n"].as_i64().unwrap())
            .collect();
        assert_eq!(numbers, (0..6).collect());
        assert_eq!(items.last().unwrap().cursor, Some(Cursor::from("3")));

        // No item committed yet: no child contributes a cursor.
        let empty: serde_json::Value =
            serde_json::from_str(inventory.cursor().unwrap().as_str()).unwrap();
        assert_eq!(empty, json!({}));

        for item in items {
            item.context.close().await;
        }
        let cursor: serde_json::Value =
            serde_json::from_str(inventory.cursor().unwrap().as_str()).unwrap();
        assert_eq!(
            cursor,
            json!({
                "a": "{\"v\":1,\"a\":\"3\"}",
                "b": "{\"v\":1,\"a\":\"1\"}",
            })
        );
    }

    #[test]
    async fn fanin_resumes_from_aggregate_cursor() {
        let inventory = FanIn::new(
            "fanin",
            vec![
                (
                    "a".to_string(),
                    static_child("a", vec![json!(0), json!(1), json!(2), json!(3)]),
                ),
                ("b".to_string(), static_child("b", vec![json!(4), json!(5)])),
            ],
        );

        let mut stream = inventory
            .run(Some(Cursor::from(r#"{"a": "3", "b": "0"}"#)))
            .await
            .unwrap();
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item.unwrap());
        }

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].args["n"], json!(5));
        assert_eq!(items[0].cursor, Some(Cursor::from("1")));
        assert_eq!(items[0].tags["inventory.name"], "b");
    }

    #[test]
    async fn priority_fanin_respects_weights() {
        let inventory = PriorityFanIn::new(
            "priority",
            vec![
                (
                    "a".to_string(),
                    1,
                    static_child("a", number_items(100, "a")),
                ),
                (
                    "b".to_string(),
                    2,
                    static_child("b", number_items(100, "b")),
                ),
            ],
        );

        let items: Vec<_> = inventory
            .run(None)
            .await
            .unwrap()
            .take(75)
            .map(|item| item.unwrap().args["n"].as_str().unwrap().to_string())
            .collect()
            .await;

        let a = items.iter().filter(|n| n.as_str() == "a").count();
        let b = items.iter().filter(|n| n.as_str() == "b").count();
        assert!((49..=51).contains(&a), "a share was {a}");
        assert!((24..=26).contains(&b), "b share was {b}");
    }

    #[test]
    async fn priority_fanin_resumes_mid_stream() {
        let inventory = PriorityFanIn::new(
            "priority",
            vec![
                (
                    "a".to_string(),
                    1,
                    static_child("a", number_items(100, "a")),
                ),
                (
                    "b".to_string(),
                    2,
                    static_child("b", number_items(100, "b")),
                ),
            ],
        );

        let items: Vec<_> = inventory
            .run(Some(Cursor::from(r#"{"a": "70", "b": "30"}"#)))
            .await
            .unwrap()
            .take(50)
            .map(|item| item.unwrap().args["n"].as_str().unwrap().to_string())
            .collect()
            .await;

        let a = items.iter().filter(|n| n.as_str() == "a").count();
        let b = items.iter().filter(|n| n.as_str() == "b").count();
        assert_eq!(a, 29);
        assert_eq!(b, 21);
    }
}
