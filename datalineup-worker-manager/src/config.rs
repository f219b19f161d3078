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

use datalineup_common::config::ConfigLoader;
use datalineup_common::tracing::TracingConfig;
use datalineup_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerManagerConfig {
    pub tracing: TracingConfig,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub static_definitions_dirs: Vec<PathBuf>,
    /// Regex restricting which declared jobs are compiled at all.
    pub static_definitions_jobs_selector: Option<String>,
    pub work_items_per_worker: usize,
    /// Assignments older than this are considered abandoned and handed to
    /// the next locking worker.
    #[serde(with = "humantime_serde")]
    pub assignment_expiration: Duration,
    /// How often the embedded sync re-creates interval jobs.
    #[serde(with = "humantime_serde")]
    pub jobs_sync_period: Duration,
}

impl Default for WorkerManagerConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("datalineup-worker-manager"),
            host: "127.0.0.1".to_string(),
            port: 5000,
            database_url: "sqlite://datalineup.db?mode=rwc".to_string(),
            static_definitions_dirs: vec![PathBuf::from(".")],
            static_definitions_jobs_selector: None,
            work_items_per_worker: 10,
            assignment_expiration: Duration::from_secs(120),
            jobs_sync_period: Duration::from_secs(60),
        }
    }
}

impl SafeDisplay for WorkerManagerConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "host: {}", self.host);
        let _ = writeln!(&mut result, "port: {}", self.port);
        let _ = writeln!(&mut result, "database url: ****");
        let _ = writeln!(
            &mut result,
            "static definitions dirs: {:?}",
            self.static_definitions_dirs
        );
        let _ = writeln!(
            &mut result,
            "work items per worker: {}",
            self.work_items_per_worker
        );
        result
    }
}

pub fn make_config_loader() -> ConfigLoader<WorkerManagerConfig> {
    ConfigLoader::new(&PathBuf::from("config/worker-manager.toml"))
}
