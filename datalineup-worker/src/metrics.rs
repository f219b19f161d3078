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

use crate::hooks::{Hooks, MessageContext, ScopedCompletion};
use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, HistogramVec,
    IntCounterVec,
};
use std::sync::Arc;
use std::time::Instant;

lazy_static! {
    static ref PIPELINE_MESSAGE_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "datalineup_pipeline_message_total",
            "Messages observed at each pipeline stage"
        ),
        &["job", "executor", "pipeline", "state"]
    )
    .unwrap();
    static ref PIPELINE_EXECUTE_SECONDS: HistogramVec = register_histogram_vec!(
        histogram_opts!(
            "datalineup_pipeline_execute_seconds",
            "Wall time of process_message calls"
        ),
        &["job", "executor", "pipeline"]
    )
    .unwrap();
    static ref PUBLISH_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "datalineup_publish_total",
            "Publish attempts per topic and outcome"
        ),
        &["topic", "channel", "state"]
    )
    .unwrap();
}

fn stage_counter(context: &MessageContext, state: &'static str) {
    PIPELINE_MESSAGE_TOTAL
        .with_label_values(&[
            context.job.as_str(),
            &context.executor,
            &context.pipeline,
            state,
        ])
        .inc();
}

/// Subscribes prometheus counters to every stage transition.
pub fn register_metrics_hooks(hooks: &Hooks) {
    for (hook, state) in [
        (&hooks.message_polled, "polled"),
        (&hooks.message_scheduled, "scheduled"),
        (&hooks.message_submitted, "submitted"),
    ] {
        hook.register(Arc::new(move |context: &MessageContext| {
            stage_counter(context, state);
            Box::pin(async { Ok(()) })
        }));
    }

    hooks.message_executed.register(Arc::new(|context| {
        let context = context.clone();
        stage_counter(&context, "executing");
        let started = Instant::now();
        Box::pin(async move {
            let completion: ScopedCompletion<datalineup_common::model::PipelineResults> =
                Box::new(move |result| {
                    PIPELINE_EXECUTE_SECONDS
                        .with_label_values(&[
                            context.job.as_str(),
                            &context.executor,
                            &context.pipeline,
                        ])
                        .observe(started.elapsed().as_secs_f64());
                    stage_counter(
                        &context,
                        if result.is_ok() { "success" } else { "failed" },
                    );
                    Box::pin(async {})
                });
            Ok(completion)
        })
    }));

    hooks.message_published.register(Arc::new(|context| {
        let topic = context.topic.clone();
        let channel = context.channel.clone();
        Box::pin(async move {
            let completion: ScopedCompletion<()> = Box::new(move |result| {
                PUBLISH_TOTAL
                    .with_label_values(&[
                        topic.as_str(),
                        channel.as_str(),
                        if result.is_ok() { "success" } else { "failed" },
                    ])
                    .inc();
                Box::pin(async {})
            });
            Ok(completion)
        })
    }));

    hooks.output_blocked.register(Arc::new(|context| {
        let topic = context.topic.clone();
        let channel = context.channel.clone();
        PUBLISH_TOTAL
            .with_label_values(&[&topic, &channel, "blocked"])
            .inc();
        Box::pin(async move {
            let completion: ScopedCompletion<()> = Box::new(|_| Box::pin(async {}));
            Ok(completion)
        })
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalineup_common::model::{JobId, MessageId};
    use std::collections::HashMap;
    use test_r::test;

    fn context() -> MessageContext {
        MessageContext {
            job: JobId::from("j1"),
            executor: "e1".to_string(),
            pipeline: "p".to_string(),
            labels: HashMap::new(),
            message_id: MessageId::from("m1"),
            tags: HashMap::new(),
        }
    }

    #[test]
    async fn stage_hooks_count_messages() {
        let hooks = Hooks::new();
        register_metrics_hooks(&hooks);

        let before = PIPELINE_MESSAGE_TOTAL
            .with_label_values(&["j1", "e1", "p", "polled"])
            .get();
        hooks.message_polled.emit(&context()).await;
        let after = PIPELINE_MESSAGE_TOTAL
            .with_label_values(&["j1", "e1", "p", "polled"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[test]
    async fn executed_hook_records_outcome() {
        let hooks = Hooks::new();
        register_metrics_hooks(&hooks);

        let before = PIPELINE_MESSAGE_TOTAL
            .with_label_values(&["j1", "e1", "p", "success"])
            .get();
        let guard = hooks.message_executed.open(&context()).await;
        guard
            .complete(Ok(&datalineup_common::model::PipelineResults::default()))
            .await;
        let after = PIPELINE_MESSAGE_TOTAL
            .with_label_values(&["j1", "e1", "p", "success"])
            .get();
        assert_eq!(after, before + 1);
    }
}
