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

use crate::common::{
    inline_executor_queue, memory_output, output_map, queue_item, services,
    spawn_poller, static_inventory_input, wait_until,
};
use datalineup_common::model::{JobId, PipelineOutput, PipelineResults, TopicMessage};
use datalineup_worker::error::PipelineError;
use datalineup_worker::resources::ResourceData;
use datalineup_worker::topics::memory::{drop_queue, get_queue};
use datalineup_worker::work_factory;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use test_r::test;

fn copy_output(message: &TopicMessage) -> PipelineResults {
    PipelineResults {
        outputs: vec![PipelineOutput {
            channel: "default".to_string(),
            message: TopicMessage::new(message.args.clone()),
        }],
        ..PipelineResults::default()
    }
}

#[test]
async fn pipeline_processes_inventory_end_to_end() {
    drop_queue("e2e-out");
    let services = services();
    services
        .pipelines
        .register_fn("test.copy", |call| async move { Ok(copy_output(&call.message)) });

    let items = (0..5).map(|n| json!({"n": n})).collect();
    let queue = Arc::new(
        work_factory::build(
            queue_item(
                "e2e",
                static_inventory_input(items),
                output_map(vec![memory_output("default", "e2e-out", 10)]),
                "test.copy",
                BTreeMap::new(),
                None,
            ),
            &services,
        )
        .unwrap(),
    );

    let executor_queue = inline_executor_queue(&services, 2);
    let token = services.cancellation.child_token();
    let poller = spawn_poller(queue, executor_queue, token.clone());

    let out = get_queue("e2e-out", 10);
    wait_until("all outputs published", || out.len() == 5).await;

    let job = JobId::from("e2e");
    wait_until("job completes", || {
        services.job_state.job_state(&job).completion.is_some()
    })
    .await;

    let state = services.job_state.job_state(&job);
    let cursor: serde_json::Value = serde_json::from_str(state.cursor.unwrap().as_str()).unwrap();
    assert_eq!(cursor, json!({"v": 1, "a": "4"}));
    assert!(state.completion.unwrap().error.is_none());

    let mut numbers = std::collections::HashSet::new();
    while let Some(message) = out.try_get() {
        numbers.insert(message.args["n"].as_i64().unwrap());
    }
    assert_eq!(numbers, (0..5).collect());

    token.cancel();
    let _ = poller.await;
}

#[test]
async fn backpressure_parks_the_pipeline() {
    drop_queue("bp-out");
    let services = services();
    services
        .pipelines
        .register_fn("test.emit", |call| async move { Ok(copy_output(&call.message)) });

    for name in ["r1", "r2"] {
        services
            .resources
            .add(ResourceData {
                name: name.to_string(),
                type_name: "TestApiKey".to_string(),
                data: HashMap::new(),
                default_delay: Duration::ZERO,
                rate_limit: None,
            })
            .unwrap();
    }

    let items = (0..3).map(|n| json!({"n": n})).collect();
    let queue = Arc::new(
        work_factory::build(
            queue_item(
                "bp",
                static_inventory_input(items),
                output_map(vec![memory_output("default", "bp-out", 1)]),
                "test.emit",
                BTreeMap::from([("key".to_string(), "TestApiKey".to_string())]),
                None,
            ),
            &services,
        )
        .unwrap(),
    );

    let executor_queue = inline_executor_queue(&services, 1);
    let token = services.cancellation.child_token();
    let parkers = queue.parkers.clone();
    let poller = spawn_poller(queue, executor_queue, token.clone());

    // The first message publishes, the second blocks on the full topic and
    // parks; the poller must not pull the third.
    let out = get_queue("bp-out", 1);
    wait_until("pipeline parks on full output", || {
        out.len() == 1 && parkers.locked()
    })
    .await;

    // Popping one output unparks and lets the pipeline make progress.
    out.try_get().unwrap();
    wait_until("third message flows after unpark", || out.len() == 1).await;

    out.try_get().unwrap();
    wait_until("last message flows", || out.len() == 1).await;
    out.try_get().unwrap();

    let job = JobId::from("bp");
    wait_until("job completes", || {
        services.job_state.job_state(&job).completion.is_some()
    })
    .await;
    assert!(!parkers.locked());

    token.cancel();
    let _ = poller.await;
}

#[test]
async fn executor_concurrency_is_bounded() {
    let services = services();
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(tokio::sync::Semaphore::new(0));

    {
        let active = active.clone();
        let max_active = max_active.clone();
        let gate = gate.clone();
        services.pipelines.register_fn("test.gate", move |_call| {
            let active = active.clone();
            let max_active = max_active.clone();
            let gate = gate.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                let _permit = gate.acquire().await.unwrap();
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(PipelineResults::default())
            }
        });
    }

    let items = (0..5).map(|n| json!({"n": n})).collect();
    let queue = Arc::new(
        work_factory::build(
            queue_item(
                "conc",
                static_inventory_input(items),
                output_map(vec![]),
                "test.gate",
                BTreeMap::new(),
                None,
            ),
            &services,
        )
        .unwrap(),
    );

    let executor_queue = inline_executor_queue(&services, 2);
    let token = services.cancellation.child_token();
    let poller = spawn_poller(queue, executor_queue, token.clone());

    wait_until("two pipelines in flight", || {
        active.load(Ordering::SeqCst) == 2
    })
    .await;
    // Give the pipeline a chance to overshoot before releasing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(active.load(Ordering::SeqCst), 2);

    gate.add_permits(5);
    let job = JobId::from("conc");
    wait_until("job completes", || {
        services.job_state.job_state(&job).completion.is_some()
    })
    .await;
    assert_eq!(max_active.load(Ordering::SeqCst), 2);

    token.cancel();
    let _ = poller.await;
}

#[test]
async fn error_handler_republishes_with_cap() {
    drop_queue("err-out");
    drop_queue("err-retry");
    let services = services();
    services.pipelines.register_fn("test.fail", |_call| async {
        Err::<PipelineResults, _>(PipelineError::new("Exception", "BOOM"))
    });

    let output = output_map(vec![
        (
            "error:BOOM:Exception".to_string(),
            json!([
                {"name": "err-out", "type": "MemoryTopic", "options": {"maxsize": 10}},
                {"republish": {"channel": "retry", "max_retry": 1}}
            ]),
        ),
        memory_output("retry", "err-retry", 10),
    ]);

    let items = vec![json!({"payload": "x"})];
    let queue = Arc::new(
        work_factory::build(
            queue_item(
                "errjob",
                static_inventory_input(items),
                output.clone(),
                "test.fail",
                BTreeMap::new(),
                None,
            ),
            &services,
        )
        .unwrap(),
    );

    let executor_queue = inline_executor_queue(&services, 1);
    let token = services.cancellation.child_token();
    let poller = spawn_poller(queue, executor_queue.clone(), token.clone());

    let error_queue = get_queue("err-out", 10);
    let retry_queue = get_queue("err-retry", 10);

    // First failure: error message published and the original republished.
    wait_until("error and retry published", || {
        error_queue.len() == 1 && retry_queue.len() == 1
    })
    .await;

    let error_message = error_queue.try_get().unwrap();
    assert_eq!(error_message.args["error"]["type"], json!("Exception"));
    assert_eq!(error_message.args["error"]["message"], json!("BOOM"));
    assert_eq!(
        error_message.args["cause"]["args"]["payload"],
        json!("x")
    );

    let retry_message = retry_queue.try_get().unwrap();
    assert_eq!(retry_message.args["payload"], json!("x"));
    assert_eq!(retry_message.metadata["retries"], json!(1));
    token.cancel();
    let _ = poller.await;

    // Second failure on the retried copy: the cap is reached, so only the
    // error message is published and the failure surfaces.
    let retry_topic = get_queue("err-retry", 10);
    retry_topic.try_put(retry_message);
    let retry_input = datalineup_common::model::ComponentDefinition::new(
        "retry-in",
        "TopicAdapter",
    )
    .with_options(HashMap::from([(
        "topic".to_string(),
        json!({"name": "err-retry", "type": "MemoryTopic", "options": {"maxsize": 10}}),
    )]));

    let retry_queue_item = queue_item(
        "errjob-retry",
        retry_input,
        output,
        "test.fail",
        BTreeMap::new(),
        None,
    );
    let queue = Arc::new(work_factory::build(retry_queue_item, &services).unwrap());
    let token = services.cancellation.child_token();
    let poller = spawn_poller(queue, executor_queue, token.clone());

    wait_until("second error published", || error_queue.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(get_queue("err-retry", 10).is_empty());

    token.cancel();
    let _ = poller.await;
}
