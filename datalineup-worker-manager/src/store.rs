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

use crate::declarative::BaseObject;
use crate::error::ManagerError;
use chrono::{DateTime, Utc};
use datalineup_common::model::{Cursor, JobId, JobsStates};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS queues (
        name TEXT PRIMARY KEY,
        enabled INTEGER NOT NULL DEFAULT 1,
        assigned_to TEXT,
        assigned_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS jobs (
        name TEXT PRIMARY KEY,
        queue_name TEXT NOT NULL REFERENCES queues(name),
        job_definition_name TEXT,
        cursor TEXT,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        error TEXT
    )",
    "CREATE TABLE IF NOT EXISTS job_cursor_states (
        job_name TEXT NOT NULL,
        cursor TEXT NOT NULL,
        state TEXT NOT NULL,
        PRIMARY KEY (job_name, cursor)
    )",
    "CREATE TABLE IF NOT EXISTS topology_patches (
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (kind, name)
    )",
];

#[derive(Debug, Clone)]
pub struct JobRow {
    pub name: String,
    pub queue_name: String,
    pub job_definition_name: Option<String>,
    pub cursor: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueueRow {
    pub name: String,
    pub enabled: bool,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
}

fn job_row(row: &sqlx::sqlite::SqliteRow) -> JobRow {
    JobRow {
        name: row.get("name"),
        queue_name: row.get("queue_name"),
        job_definition_name: row.get("job_definition_name"),
        cursor: row.get("cursor"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error: row.get("error"),
    }
}

fn queue_row(row: &sqlx::sqlite::SqliteRow) -> QueueRow {
    QueueRow {
        name: row.get("name"),
        enabled: row.get("enabled"),
        assigned_to: row.get("assigned_to"),
        assigned_at: row.get("assigned_at"),
    }
}

/// The manager's relational store: queue assignment, job lifecycle, cursor
/// states and topology patches.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, ManagerError> {
        // A single connection: sqlite serializes writers anyway, and the
        // in-memory database used in standalone tests is per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub async fn create_queue(&self, name: &str) -> Result<(), ManagerError> {
        sqlx::query("INSERT OR IGNORE INTO queues (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_job(
        &self,
        name: &str,
        queue_name: &str,
        job_definition_name: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<(), ManagerError> {
        sqlx::query(
            "INSERT INTO jobs (name, queue_name, job_definition_name, cursor, started_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(queue_name)
        .bind(job_definition_name)
        .bind(cursor)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, name: &str) -> Result<Option<JobRow>, ManagerError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(job_row))
    }

    pub async fn get_last_job(
        &self,
        job_definition_name: &str,
    ) -> Result<Option<JobRow>, ManagerError> {
        let row = sqlx::query(
            "SELECT * FROM jobs WHERE job_definition_name = ?
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(job_definition_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(job_row))
    }

    pub async fn get_assigned_queues(
        &self,
        worker_id: &str,
        assigned_after: DateTime<Utc>,
    ) -> Result<Vec<QueueRow>, ManagerError> {
        let rows = sqlx::query(
            "SELECT * FROM queues
             WHERE enabled = 1 AND assigned_to = ? AND assigned_at >= ?
             ORDER BY name",
        )
        .bind(worker_id)
        .bind(assigned_after)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(queue_row).collect())
    }

    pub async fn get_unassigned_queues(
        &self,
        assigned_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueRow>, ManagerError> {
        let rows = sqlx::query(
            "SELECT * FROM queues
             WHERE enabled = 1 AND (assigned_at IS NULL OR assigned_at < ?)
             ORDER BY name LIMIT ?",
        )
        .bind(assigned_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(queue_row).collect())
    }

    pub async fn assign_queue(
        &self,
        name: &str,
        worker_id: &str,
        assigned_at: DateTime<Utc>,
    ) -> Result<(), ManagerError> {
        sqlx::query("UPDATE queues SET assigned_to = ?, assigned_at = ? WHERE name = ?")
            .bind(worker_id)
            .bind(assigned_at)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn disable_queue(&self, name: &str) -> Result<(), ManagerError> {
        sqlx::query("UPDATE queues SET enabled = 0 WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Applies a worker's flushed job states: cursors, terminal completion
    /// and per-cursor user states.
    pub async fn sync_jobs_states(&self, states: &JobsStates) -> Result<(), ManagerError> {
        for (job, state) in &states.jobs {
            if state.cursor.is_some() {
                sqlx::query("UPDATE jobs SET cursor = ? WHERE name = ?")
                    .bind(state.cursor.as_ref().map(|cursor| cursor.as_str()))
                    .bind(job.as_str())
                    .execute(&self.pool)
                    .await?;
            }
            if let Some(completion) = &state.completion {
                sqlx::query("UPDATE jobs SET completed_at = ?, error = ? WHERE name = ?")
                    .bind(completion.completed_at)
                    .bind(completion.error.as_deref())
                    .bind(job.as_str())
                    .execute(&self.pool)
                    .await?;
            }
            for (cursor, value) in &state.cursors_states {
                sqlx::query(
                    "INSERT INTO job_cursor_states (job_name, cursor, state)
                     VALUES (?, ?, ?)
                     ON CONFLICT (job_name, cursor) DO UPDATE SET state = excluded.state",
                )
                .bind(job.as_str())
                .bind(cursor.as_str())
                .bind(serde_json::to_string(value)?)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn fetch_cursors_states(
        &self,
        cursors: &HashMap<JobId, Vec<Cursor>>,
    ) -> Result<HashMap<JobId, HashMap<Cursor, Option<Value>>>, ManagerError> {
        let mut result = HashMap::new();
        for (job, job_cursors) in cursors {
            let mut states = HashMap::new();
            for cursor in job_cursors {
                let row = sqlx::query(
                    "SELECT state FROM job_cursor_states WHERE job_name = ? AND cursor = ?",
                )
                .bind(job.as_str())
                .bind(cursor.as_str())
                .fetch_optional(&self.pool)
                .await?;
                let state = match row {
                    Some(row) => Some(serde_json::from_str(row.get::<String, _>("state").as_str())?),
                    None => None,
                };
                states.insert(cursor.clone(), state);
            }
            result.insert(job.clone(), states);
        }
        Ok(result)
    }

    pub async fn save_topology_patch(&self, patch: &BaseObject) -> Result<(), ManagerError> {
        sqlx::query(
            "INSERT INTO topology_patches (kind, name, data)
             VALUES (?, ?, ?)
             ON CONFLICT (kind, name) DO UPDATE SET data = excluded.data",
        )
        .bind(&patch.kind)
        .bind(&patch.metadata.name)
        .bind(serde_json::to_string(patch)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_topology_patches(&self) -> Result<Vec<BaseObject>, ManagerError> {
        let rows = sqlx::query("SELECT data FROM topology_patches ORDER BY kind, name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                serde_json::from_str(row.get::<String, _>("data").as_str())
                    .map_err(ManagerError::from)
            })
            .collect()
    }
}
