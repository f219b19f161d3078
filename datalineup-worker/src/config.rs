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

use datalineup_common::config::{ConfigLoader, RetryConfig};
use datalineup_common::tracing::TracingConfig;
use datalineup_common::SafeDisplay;
use datalineup_worker_manager::config::WorkerManagerConfig;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub tracing: TracingConfig,
    pub env: String,
    pub worker_id: String,
    /// Regex over queue names; only matching queues are requested.
    pub selector: Option<String>,
    /// Executor names this worker accepts work for; empty means all.
    pub executors: Vec<String>,
    pub worker_manager_url: String,
    /// Run with an embedded manager instead of a remote one.
    pub standalone: bool,
    #[serde(with = "humantime_serde")]
    pub sync_period: Duration,
    #[serde(with = "humantime_serde")]
    pub job_state_flush_interval: Duration,
    /// How long dropped queues may drain before their pipelines are
    /// cancelled.
    #[serde(with = "humantime_serde")]
    pub drain_grace: Duration,
    pub retries: RetryConfig,
    pub worker_manager: WorkerManagerConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("datalineup-worker"),
            env: "development".to_string(),
            worker_id: gethostname::gethostname().to_string_lossy().to_string(),
            selector: None,
            executors: Vec::new(),
            worker_manager_url: "http://127.0.0.1:5000".to_string(),
            standalone: false,
            sync_period: Duration::from_secs(60),
            job_state_flush_interval: Duration::from_secs(1),
            drain_grace: Duration::from_secs(30),
            retries: RetryConfig::default(),
            worker_manager: WorkerManagerConfig::default(),
        }
    }
}

impl SafeDisplay for WorkerConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "env: {}", self.env);
        let _ = writeln!(&mut result, "worker id: {}", self.worker_id);
        let _ = writeln!(&mut result, "selector: {:?}", self.selector);
        let _ = writeln!(&mut result, "executors: {:?}", self.executors);
        let _ = writeln!(&mut result, "worker manager url: {}", self.worker_manager_url);
        let _ = writeln!(&mut result, "standalone: {}", self.standalone);
        let _ = writeln!(&mut result, "sync period: {:?}", self.sync_period);
        let _ = writeln!(
            &mut result,
            "job state flush interval: {:?}",
            self.job_state_flush_interval
        );
        let _ = writeln!(&mut result, "drain grace: {:?}", self.drain_grace);
        result
    }
}

pub fn make_config_loader() -> ConfigLoader<WorkerConfig> {
    ConfigLoader::new(&PathBuf::from("config/worker.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn default_config_loads() {
        let config = WorkerConfig::default();
        assert!(!config.standalone);
        assert_eq!(config.sync_period, Duration::from_secs(60));

        let toml = toml::to_string_pretty(&config).unwrap();
        let back: WorkerConfig = toml::from_str(&toml).unwrap();
        assert_eq!(back.sync_period, config.sync_period);
    }
}
