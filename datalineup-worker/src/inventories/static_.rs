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

#[derive(Debug, Clone, Deserialize)]
pub struct StaticInventoryOptions {
    pub items: Vec<HashMap<String, Value>>,
}

/// A fixed list of items with their index as cursor.
pub struct StaticInventory {
    name: String,
    options: StaticInventoryOptions,
    tracker: CursorTracker,
}

impl StaticInventory {
    pub fn new(name: impl Into<String>, options: StaticInventoryOptions) -> Self {
        Self {
            name: name.into(),
            options,
            tracker: CursorTracker::new(),
        }
    }
}

#[async_trait]
impl Inventory for StaticInventory {
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
                .parse::<usize>()
                .map_err(|_| {
                    WorkerError::configuration(format!(
                        "invalid static inventory cursor: {cursor}"
                    ))
                })?
                .saturating_add(1),
        };

        let items: Vec<(usize, HashMap<String, Value>)> = self
            .options
            .items
            .iter()
            .enumerate()
            .skip(start)
            .map(|(index, args)| (index, args.clone()))
            .collect();

        Ok(futures::stream::iter(items.into_iter().map(|(index, args)| {
            Ok(Item::new(
                index.to_string(),
                Some(Cursor::from(index.to_string())),
                args,
            ))
        }))
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_r::test;

    fn items(count: usize) -> Vec<HashMap<String, Value>> {
        (0..count)
            .map(|n| HashMap::from([("n".to_string(), json!(n))]))
            .collect()
    }

    #[test]
    async fn iterates_from_after_cursor() {
        let inventory = StaticInventory::new("s", StaticInventoryOptions { items: items(9) });

        let all: Vec<_> = inventory.iterate(None).await.unwrap().collect().await;
        assert_eq!(all.len(), 9);

        let rest: Vec<_> = inventory
            .iterate(Some(Cursor::from("4")))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(rest.len(), 4);

        let none: Vec<_> = inventory
            .iterate(Some(Cursor::from("8")))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(none.is_empty());
    }

    #[test]
    async fn completion_drives_the_cursor() {
        let inventory = StaticInventory::new("s", StaticInventoryOptions { items: items(2) });
        let mut stream = inventory.run(None).await.unwrap();

        assert_eq!(inventory.cursor(), None);
        while let Some(item) = stream.next().await {
            item.unwrap().context.close().await;
        }

        assert_eq!(
            inventory.cursor().unwrap().as_str(),
            r#"{"v":1,"a":"1"}"#
        );
    }
}
