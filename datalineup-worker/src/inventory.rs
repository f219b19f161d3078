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
use async_trait::async_trait;
use datalineup_common::cursor::CursorFrame;
use datalineup_common::model::{Cursor, MessageId, PipelineEvent, TopicMessage};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// An acquisition scoped to an item's lifetime, released exactly once when
/// the owning context closes.
#[async_trait]
pub trait ScopedAcquisition: Send {
    async fn release(self: Box<Self>);
}

struct ReleaseFn<F: FnOnce() + Send>(F);

#[async_trait]
impl<F: FnOnce() + Send> ScopedAcquisition for ReleaseFn<F> {
    async fn release(self: Box<Self>) {
        (self.0)();
    }
}

/// Deferred releases with close-on-all-paths semantics. Observers fire
/// before guards; both unwind in reverse registration order. Dropping an
/// unclosed context is a bug for guards (they leak) but deliberate for
/// observers: an item dropped mid-flight must not commit its cursor.
#[derive(Default)]
pub struct ScopedContext {
    observers: Vec<Box<dyn FnOnce() + Send>>,
    guards: Vec<Box<dyn ScopedAcquisition>>,
}

impl ScopedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_close(&mut self, observer: impl FnOnce() + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn push(&mut self, guard: impl ScopedAcquisition + 'static) {
        self.guards.push(Box::new(guard));
    }

    pub fn push_release(&mut self, release: impl FnOnce() + Send + 'static) {
        self.guards.push(Box::new(ReleaseFn(release)));
    }

    pub fn merge(&mut self, mut other: ScopedContext) {
        self.observers.append(&mut other.observers);
        self.guards.append(&mut other.guards);
    }

    pub async fn close(mut self) {
        for observer in self.observers.drain(..).rev() {
            observer();
        }
        for guard in self.guards.drain(..).rev() {
            guard.release().await;
        }
    }
}

impl Drop for ScopedContext {
    fn drop(&mut self) {
        if !self.guards.is_empty() {
            warn!(
                guards = self.guards.len(),
                "scoped context dropped without close, leaking acquisitions"
            );
        }
    }
}

pub type EventObserver = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// A record yielded by an inventory.
pub struct Item {
    pub id: MessageId,
    pub cursor: Option<Cursor>,
    pub args: HashMap<String, Value>,
    pub tags: HashMap<String, String>,
    pub metadata: HashMap<String, Value>,
    pub context: ScopedContext,
    /// Receives the pipeline events emitted while processing this item.
    pub on_event: Option<EventObserver>,
}

impl Item {
    pub fn new(id: impl Into<MessageId>, cursor: Option<Cursor>, args: HashMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            cursor,
            args,
            tags: HashMap::new(),
            metadata: HashMap::new(),
            context: ScopedContext::new(),
            on_event: None,
        }
    }

    pub fn to_message(&self) -> TopicMessage {
        TopicMessage {
            id: self.id.clone(),
            args: self.args.clone(),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
            config: HashMap::new(),
        }
    }
}

/// Identifies one produced item inside its tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemSlot(u64);

struct Slot {
    id: u64,
    cursor: Option<Cursor>,
    completed: bool,
}

#[derive(Default)]
struct TrackerState {
    after: Option<Cursor>,
    slots: VecDeque<Slot>,
    next_id: u64,
}

impl TrackerState {
    fn compact(&mut self) {
        while let Some(front) = self.slots.front() {
            if !front.completed {
                break;
            }
            let slot = self.slots.pop_front().expect("front slot exists");
            if let Some(cursor) = slot.cursor {
                self.after = Some(cursor);
            }
        }
    }
}

/// Tracks the production order and completion of items for one source and
/// compacts them into a resumable `{v:1,a,p}` frame. Every produced item is
/// an ordered slot, including items without a cursor: they contribute no
/// checkpoint but block `a` from migrating past them until they complete.
/// `a` only ever moves forward along the produced order.
#[derive(Clone, Default)]
pub struct CursorTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(&self, after: Option<Cursor>) {
        let mut state = self.state.lock().unwrap();
        if state.after.is_none() && state.slots.is_empty() {
            state.after = after;
        }
    }

    pub fn produce(&self, cursor: Option<Cursor>) -> ItemSlot {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.slots.push_back(Slot {
            id,
            cursor,
            completed: false,
        });
        ItemSlot(id)
    }

    pub fn complete(&self, slot: ItemSlot) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.slots.iter_mut().find(|entry| entry.id == slot.0) {
            entry.completed = true;
        }
        state.compact();
    }

    pub fn frame(&self) -> CursorFrame {
        let state = self.state.lock().unwrap();
        let pending = state
            .slots
            .iter()
            .filter(|slot| slot.completed)
            .filter_map(|slot| slot.cursor.clone())
            .collect();
        CursorFrame::new(state.after.clone(), pending)
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.frame().to_cursor()
    }
}

/// Splits a stored resumable cursor into the prefix cursor handed to the
/// source and the set of out-of-order cursors to skip. A value that is not
/// a versioned frame is passed through as a plain prefix cursor.
pub fn split_resume_state(after: Option<Cursor>) -> (Option<Cursor>, HashSet<Cursor>) {
    match after {
        None => (None, HashSet::new()),
        Some(raw) => match CursorFrame::parse(raw.as_str()) {
            Ok(frame) => (frame.a, frame.p.into_iter().collect()),
            Err(_) => (Some(raw), HashSet::new()),
        },
    }
}

/// A restartable, possibly infinite, ordered source of items.
#[async_trait]
pub trait Inventory: Send + Sync {
    fn name(&self) -> &str;

    fn tracker(&self) -> &CursorTracker;

    async fn open(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn iterate(
        &self,
        after: Option<Cursor>,
    ) -> Result<BoxStream<'static, Result<Item, WorkerError>>, WorkerError>;

    /// The current resumable cursor of this source.
    fn cursor(&self) -> Option<Cursor> {
        self.tracker().cursor()
    }

    /// `iterate` with cursor tracking: every yielded item is registered with
    /// the tracker (cursorless items become ordering barriers) and completes
    /// on context close; items recorded as already committed in `after` are
    /// drained without being yielded.
    async fn run(
        &self,
        after: Option<Cursor>,
    ) -> Result<BoxStream<'static, Result<Item, WorkerError>>, WorkerError> {
        let (resume_after, skip) = split_resume_state(after);
        self.tracker().resume(resume_after.clone());
        let tracker = self.tracker().clone();
        let stream = self.iterate(resume_after).await?;

        Ok(stream
            .filter_map(move |result| {
                let tracker = tracker.clone();
                let skip = skip.clone();
                async move {
                    match result {
                        Err(error) => Some(Err(error)),
                        Ok(mut item) => {
                            let slot = tracker.produce(item.cursor.clone());
                            let already_committed = item
                                .cursor
                                .as_ref()
                                .is_some_and(|cursor| skip.contains(cursor));
                            if already_committed {
                                tracker.complete(slot);
                                item.context.close().await;
                                None
                            } else {
                                item.context.on_close(move || tracker.complete(slot));
                                Some(Ok(item))
                            }
                        }
                    }
                }
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn tracker_compacts_in_production_order() {
        let tracker = CursorTracker::new();
        let slots: Vec<ItemSlot> = [
            Some("0"),
            None,
            Some("2"),
            None,
            Some("4"),
            Some("5"),
            Some("6"),
        ]
        .into_iter()
        .map(|cursor| tracker.produce(cursor.map(Cursor::from)))
        .collect();

        tracker.complete(slots[2]);
        tracker.complete(slots[5]);
        assert_eq!(
            tracker.frame(),
            CursorFrame::new(None, vec![Cursor::from("2"), Cursor::from("5")])
        );

        tracker.complete(slots[0]);
        assert_eq!(
            tracker.frame(),
            CursorFrame::new(
                Some(Cursor::from("0")),
                vec![Cursor::from("2"), Cursor::from("5")]
            )
        );

        // The cursorless barriers complete: "2" migrates into the prefix.
        tracker.complete(slots[1]);
        tracker.complete(slots[3]);
        assert_eq!(
            tracker.frame(),
            CursorFrame::new(Some(Cursor::from("2")), vec![Cursor::from("5")])
        );

        tracker.complete(slots[6]);
        tracker.complete(slots[4]);
        assert_eq!(tracker.frame(), CursorFrame::new(Some(Cursor::from("6")), vec![]));
    }

    #[test]
    fn pending_barrier_blocks_compaction() {
        let tracker = CursorTracker::new();
        let first = tracker.produce(Some(Cursor::from("0")));
        let barrier = tracker.produce(None);
        let third = tracker.produce(Some(Cursor::from("2")));

        tracker.complete(first);
        tracker.complete(third);
        assert_eq!(
            tracker.frame(),
            CursorFrame::new(Some(Cursor::from("0")), vec![Cursor::from("2")])
        );

        tracker.complete(barrier);
        assert_eq!(tracker.frame(), CursorFrame::new(Some(Cursor::from("2")), vec![]));
    }

    #[test]
    fn tracker_resume_seeds_after() {
        let tracker = CursorTracker::new();
        tracker.resume(Some(Cursor::from("3")));
        assert_eq!(tracker.cursor().unwrap().as_str(), r#"{"v":1,"a":"3"}"#);

        let slot = tracker.produce(Some(Cursor::from("4")));
        tracker.complete(slot);
        assert_eq!(tracker.cursor().unwrap().as_str(), r#"{"v":1,"a":"4"}"#);
    }

    #[test]
    fn split_resume_state_handles_frames_and_plain_cursors() {
        let (after, skip) =
            split_resume_state(Some(Cursor::from(r#"{"v":1,"a":"2","p":["5"]}"#)));
        assert_eq!(after, Some(Cursor::from("2")));
        assert!(skip.contains(&Cursor::from("5")));

        let (after, skip) = split_resume_state(Some(Cursor::from("7")));
        assert_eq!(after, Some(Cursor::from("7")));
        assert!(skip.is_empty());
    }

    #[test]
    async fn scoped_context_runs_observers_then_guards_in_reverse() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut context = ScopedContext::new();

        for id in ["g1", "g2"] {
            let order = order.clone();
            context.push_release(move || order.lock().unwrap().push(id));
        }
        for id in ["o1", "o2"] {
            let order = order.clone();
            context.on_close(move || order.lock().unwrap().push(id));
        }

        context.close().await;
        assert_eq!(*order.lock().unwrap(), vec!["o2", "o1", "g2", "g1"]);
    }
}
