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

use chrono::Utc;
use datalineup_common::model::{
    Cursor, JobCompletion, JobId, JobState, JobsStates, JobsStatesSyncInput,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default, Clone)]
struct JobRecord {
    state: JobState,
    dirty: bool,
}

#[derive(Default)]
struct StoreState {
    jobs: HashMap<JobId, JobRecord>,
}

/// The worker-side store of per-job resumable state. Updates are cheap and
/// local; a flush loop periodically pushes the dirty set to the manager.
#[derive(Default)]
pub struct JobStateStore {
    state: Mutex<StoreState>,
}

impl JobStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_state(&self, job: &JobId) -> JobState {
        self.state
            .lock()
            .unwrap()
            .jobs
            .get(job)
            .map(|record| record.state.clone())
            .unwrap_or_default()
    }

    pub fn set_job_cursor(&self, job: &JobId, cursor: Option<Cursor>) {
        let mut state = self.state.lock().unwrap();
        let record = state.jobs.entry(job.clone()).or_default();
        if record.state.cursor != cursor {
            record.state.cursor = cursor;
            record.dirty = true;
        }
    }

    pub fn set_job_completed(&self, job: &JobId) {
        let mut state = self.state.lock().unwrap();
        let record = state.jobs.entry(job.clone()).or_default();
        record.state.completion = Some(JobCompletion {
            completed_at: Utc::now(),
            error: None,
        });
        record.dirty = true;
    }

    pub fn set_job_failed(&self, job: &JobId, error: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        let record = state.jobs.entry(job.clone()).or_default();
        record.state.completion = Some(JobCompletion {
            completed_at: Utc::now(),
            error: Some(error.into()),
        });
        record.dirty = true;
    }

    /// Records the user state attached to a cursor by a
    /// `CursorStateUpdated` pipeline event.
    pub fn set_cursor_state(&self, job: &JobId, cursor: Cursor, value: Value) {
        let mut state = self.state.lock().unwrap();
        let record = state.jobs.entry(job.clone()).or_default();
        record.state.cursors_states.insert(cursor, value);
        record.dirty = true;
    }

    pub fn cursor_state(&self, job: &JobId, cursor: &Cursor) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .get(job)
            .and_then(|record| record.state.cursors_states.get(cursor).cloned())
    }

    /// The dirty set as one sync payload, or `None` when nothing changed.
    /// Call `mark_flushed` once the manager acknowledged it.
    pub fn flush(&self) -> Option<JobsStatesSyncInput> {
        let state = self.state.lock().unwrap();
        let jobs: HashMap<JobId, JobState> = state
            .jobs
            .iter()
            .filter(|(_, record)| record.dirty)
            .map(|(job, record)| (job.clone(), record.state.clone()))
            .collect();
        if jobs.is_empty() {
            None
        } else {
            Some(JobsStatesSyncInput {
                state: JobsStates { jobs },
            })
        }
    }

    pub fn mark_flushed(&self, flushed: &JobsStatesSyncInput) {
        let flushed: HashSet<&JobId> = flushed.state.jobs.keys().collect();
        let mut state = self.state.lock().unwrap();
        for (job, record) in state.jobs.iter_mut() {
            if flushed.contains(job) {
                record.dirty = false;
            }
        }
    }
}
