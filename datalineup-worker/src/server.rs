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

use datalineup_client::{HttpWorkerManagerClient, WorkerManagerClient};
use datalineup_common::model::LockInput;
use datalineup_common::tracing::init_tracing_with_default_env_filter;
use datalineup_worker::config::{make_config_loader, WorkerConfig};
use datalineup_worker::metrics::register_metrics_hooks;
use datalineup_worker::services::WorkerServices;
use datalineup_worker::worker::Worker;
use datalineup_worker_manager::standalone::StandaloneWorkerManagerClient;
use std::sync::Arc;
use tracing::{error, info};

fn main() -> Result<(), std::io::Error> {
    if let Some(config) = make_config_loader().load_or_dump_config() {
        init_tracing_with_default_env_filter(&config.tracing);
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(async_main(config))
    } else {
        Ok(())
    }
}

fn lock_input(config: &WorkerConfig) -> LockInput {
    LockInput {
        worker_id: config.worker_id.clone(),
        selector: config.selector.clone(),
        executors: if config.executors.is_empty() {
            None
        } else {
            Some(config.executors.clone())
        },
    }
}

async fn async_main(config: WorkerConfig) -> Result<(), std::io::Error> {
    let client: Arc<dyn WorkerManagerClient> = if config.standalone {
        info!("starting in standalone mode");
        Arc::new(
            StandaloneWorkerManagerClient::connect(&config.worker_manager, lock_input(&config))
                .await
                .map_err(|e| {
                    error!("standalone manager bootstrap failed: {e}");
                    std::io::Error::other(e.to_string())
                })?,
        )
    } else {
        Arc::new(
            HttpWorkerManagerClient::new(
                &config.worker_manager_url,
                lock_input(&config),
                config.retries.clone(),
            )
            .map_err(|e| {
                error!("worker manager client setup failed: {e}");
                std::io::Error::other(e.to_string())
            })?,
        )
    };

    let services = WorkerServices::new(config, client);
    register_metrics_hooks(&services.hooks);

    let cancellation = services.cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            cancellation.cancel();
        }
    });

    let mut worker = Worker::new(services);
    worker.run().await.map_err(|e| {
        error!("worker failed: {e}");
        std::io::Error::other(e.to_string())
    })
}
