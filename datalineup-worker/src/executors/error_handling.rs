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

use crate::error::PipelineError;
use crate::executors::executable::{ExecutableMessage, OutputChannel, OutputMap};
use datalineup_common::model::{PipelineOutput, PipelineResults, TopicMessage};
use serde_json::{json, Value};
use tracing::debug;

const RETRY_COUNT_KEY: &str = "retries";

/// How a routed pipeline failure resolves: either the error was absorbed by
/// a handler (the caller proceeds as on success, publishing `results`), or
/// it must still surface after the error outputs are published.
pub enum ErrorRouting {
    Handled(PipelineResults),
    Unhandled {
        results: PipelineResults,
        error: PipelineError,
    },
}

/// Channel keys tried for an error, most specific first, ending at the
/// `error:*` catch-all.
fn candidate_channels(error: &PipelineError) -> Vec<String> {
    vec![
        format!("error:{}:{}", error.message, error.type_name),
        format!("error:{}", error.type_name),
        format!("error:{}", error.message),
        "error:*".to_string(),
    ]
}

fn find_handler<'a>(
    output: &'a OutputMap,
    error: &PipelineError,
) -> Option<(String, &'a OutputChannel)> {
    candidate_channels(error)
        .into_iter()
        .find_map(|channel| output.get(&channel).map(|handler| (channel, handler)))
}

fn error_message(original: &TopicMessage, error: &PipelineError) -> TopicMessage {
    TopicMessage::new(
        [
            (
                "cause".to_string(),
                serde_json::to_value(original).unwrap_or(Value::Null),
            ),
            (
                "error".to_string(),
                serde_json::to_value(error.to_error_args()).unwrap_or(Value::Null),
            ),
        ]
        .into_iter()
        .collect(),
    )
}

fn retry_count(message: &TopicMessage) -> u64 {
    message
        .metadata
        .get(RETRY_COUNT_KEY)
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Routes a pipeline failure through the queue's error channels.
///
/// The first matching channel wins. Its topics receive an error message
/// `{cause, error}`; an attached republish policy re-emits the original
/// message with an incremented retry counter until `max_retry` is reached.
/// Without any matching channel the error stays unhandled and untouched.
pub fn route(xmsg: &ExecutableMessage, error: PipelineError) -> ErrorRouting {
    let Some((channel_key, channel)) = find_handler(&xmsg.output, &error) else {
        return ErrorRouting::Unhandled {
            results: PipelineResults::default(),
            error,
        };
    };
    debug!(
        job = %xmsg.job,
        channel = channel_key,
        error = %error,
        "routing pipeline failure"
    );

    let mut outputs = vec![PipelineOutput {
        channel: channel_key.clone(),
        message: error_message(&xmsg.message, &error),
    }];

    let policy = channel.handler.clone().unwrap_or_default();
    let mut republish_exhausted = false;
    if let Some(republish) = &policy.republish {
        let retries = retry_count(&xmsg.message);
        if retries < u64::from(republish.max_retry) {
            let mut retry_message = xmsg.message.clone();
            retry_message
                .metadata
                .insert(RETRY_COUNT_KEY.to_string(), json!(retries + 1));
            outputs.push(PipelineOutput {
                channel: republish.channel.clone(),
                message: retry_message,
            });
        } else {
            republish_exhausted = true;
        }
    }

    let results = PipelineResults {
        outputs,
        ..PipelineResults::default()
    };

    if policy.set_handled && !republish_exhausted {
        ErrorRouting::Handled(results)
    } else {
        ErrorRouting::Unhandled { results, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datalineup_common::model::ErrorHandler;
    use test_r::test;

    #[test]
    fn most_specific_channel_wins() {
        let mut output = OutputMap::new();
        output.insert("error:*".to_string(), OutputChannel::default());
        output.insert(
            "error:BOOM:Exception".to_string(),
            OutputChannel::default(),
        );
        output.insert("error:Exception".to_string(), OutputChannel::default());

        let error = PipelineError::new("Exception", "BOOM");
        let (channel, _) = find_handler(&output, &error).unwrap();
        assert_eq!(channel, "error:BOOM:Exception");

        let other = PipelineError::new("Exception", "OTHER");
        let (channel, _) = find_handler(&output, &other).unwrap();
        assert_eq!(channel, "error:Exception");

        let unrelated = PipelineError::new("Unrelated", "nope");
        let (channel, _) = find_handler(&output, &unrelated).unwrap();
        assert_eq!(channel, "error:*");
    }

    #[test]
    fn error_message_carries_cause_and_error() {
        let original = TopicMessage::default();
        let error = PipelineError::new("Exception", "BOOM");
        let message = error_message(&original, &error);

        assert_eq!(
            message.args["cause"],
            serde_json::to_value(&original).unwrap()
        );
        assert_eq!(message.args["error"]["type"], json!("Exception"));
        assert_eq!(message.args["error"]["message"], json!("BOOM"));
    }

    #[test]
    fn retry_counter_increments_in_metadata() {
        let mut message = TopicMessage::default();
        assert_eq!(retry_count(&message), 0);
        message.metadata.insert(RETRY_COUNT_KEY.to_string(), json!(1));
        assert_eq!(retry_count(&message), 1);
    }

    #[test]
    fn unhandled_when_handler_opts_out() {
        let handler = ErrorHandler {
            set_handled: false,
            republish: None,
        };
        assert!(!handler.set_handled);
    }
}
