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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use uuid::Uuid;

macro_rules! newtype_string {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

newtype_string!(JobId);
newtype_string!(MessageId);
newtype_string!(Cursor);

impl MessageId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// An immutable message flowing through topics. The `id` is opaque but must
/// round-trip stably across publish/consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMessage {
    #[serde(default = "MessageId::random")]
    pub id: MessageId,
    #[serde(default)]
    pub args: HashMap<String, Value>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl TopicMessage {
    pub fn new(args: HashMap<String, Value>) -> Self {
        Self {
            id: MessageId::random(),
            args,
            tags: HashMap::new(),
            metadata: HashMap::new(),
            config: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl Default for TopicMessage {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

/// A factory recipe for a component (topic, inventory, executor, resources
/// provider), resolved against a registry of built-ins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

impl ComponentDefinition {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            options: HashMap::new(),
        }
    }

    pub fn with_options(mut self, options: HashMap<String, Value>) -> Self {
        self.options = options;
        self
    }
}

/// Identifies the user pipeline to run and the resource types each of its
/// arguments requires. Resolved against the worker's pipeline registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub name: String,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePipeline {
    pub info: PipelineInfo,
    #[serde(default)]
    pub args: HashMap<String, Value>,
}

fn default_set_handled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepublishOptions {
    pub channel: String,
    pub max_retry: u32,
}

/// Error routing policy attached to an `error:*` output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandler {
    #[serde(default = "default_set_handled")]
    pub set_handled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub republish: Option<RepublishOptions>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self {
            set_handled: true,
            republish: None,
        }
    }
}

/// An output channel maps to topics and, for error channels, at most one
/// handler policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputElement {
    Topic(ComponentDefinition),
    Handler(ErrorHandler),
}

pub type OutputMap = HashMap<String, Vec<OutputElement>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub name: JobId,
    pub input: ComponentDefinition,
    #[serde(default)]
    pub output: OutputMap,
    pub pipeline: QueuePipeline,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default = "QueueItem::default_executor")]
    pub executor: String,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl QueueItem {
    pub fn default_executor() -> String {
        "default".to_string()
    }

    pub fn with_state(self, state: QueueItemState) -> QueueItemWithState {
        QueueItemWithState { item: self, state }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueItemState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItemWithState {
    #[serde(flatten)]
    pub item: QueueItem,
    #[serde(default)]
    pub state: QueueItemState,
}

/// "<count>/<period>" entries, all of which must admit a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRateLimit {
    pub rate_limits: Vec<String>,
    #[serde(default)]
    pub strategy: RateLimitStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStrategy {
    #[default]
    Fixed,
    Moving,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceItem {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    /// Seconds a resource stays unavailable after each release.
    #[serde(default)]
    pub default_delay: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<ResourceRateLimit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcesProviderItem {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub resource_type: String,
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInput {
    pub worker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executors: Option<Vec<String>>,
}

/// Authoritative assignment from manager to worker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LockResponse {
    #[serde(default)]
    pub items: Vec<QueueItemWithState>,
    #[serde(default)]
    pub resources: Vec<ResourceItem>,
    #[serde(default)]
    pub resources_providers: Vec<ResourcesProviderItem>,
    #[serde(default)]
    pub executors: Vec<ComponentDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-job resumable state as persisted by the manager.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<JobCompletion>,
    /// User state attached to individual cursors by pipeline events.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cursors_states: HashMap<Cursor, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobsStates {
    #[serde(default)]
    pub jobs: HashMap<JobId, JobState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsStatesSyncInput {
    pub state: JobsStates,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobsStatesSyncResponse {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FetchCursorsStatesInput {
    #[serde(default)]
    pub cursors: HashMap<JobId, Vec<Cursor>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FetchCursorsStatesResponse {
    #[serde(default)]
    pub cursors: HashMap<JobId, HashMap<Cursor, Option<Value>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinitionItem {
    pub name: String,
    pub template: QueueItem,
    #[serde(with = "humantime_serde")]
    pub minimal_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// What a user pipeline hands back to the executor pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineResults {
    #[serde(default)]
    pub outputs: Vec<PipelineOutput>,
    #[serde(default)]
    pub resources: Vec<ResourceUsed>,
    #[serde(default)]
    pub events: Vec<PipelineEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub channel: String,
    pub message: TopicMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsed {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    CursorStateUpdated {
        state: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<Cursor>,
    },
    StopLoop,
}

/// Serialized error payload published on error channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessageArgs {
    #[serde(rename = "type")]
    pub type_name: String,
    pub module: String,
    pub message: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}
