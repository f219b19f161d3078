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

use datalineup_common::tracing::init_tracing_with_default_env_filter;
use datalineup_worker_manager::api::make_api_route;
use datalineup_worker_manager::config::{make_config_loader, WorkerManagerConfig};
use datalineup_worker_manager::context::WorkerManagerContext;
use datalineup_worker_manager::services::sync;
use poem::listener::TcpListener;
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

async fn async_main(config: WorkerManagerConfig) -> Result<(), std::io::Error> {
    let address = format!("{}:{}", config.host, config.port);
    info!("starting worker manager on {address}");

    let context = WorkerManagerContext::connect(config).await.map_err(|e| {
        error!("worker manager bootstrap failed: {e}");
        std::io::Error::other(e.to_string())
    })?;

    let definitions = context.static_definitions().await;
    sync::sync_jobs(&definitions, &context.store)
        .await
        .map_err(|e| {
            error!("initial jobs sync failed: {e}");
            std::io::Error::other(e.to_string())
        })?;

    let app = make_api_route(context);

    poem::Server::new(TcpListener::bind(address))
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
            },
            None,
        )
        .await
}
