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

use datalineup_client::ClientError;
use datalineup_common::model::ErrorMessageArgs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A user pipeline failure. Carries enough structure to be routed through
/// `error:<MESSAGE>:<TypeName>` output channels and serialized across a
/// remote executor boundary.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{type_name}: {message}")]
pub struct PipelineError {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub module: String,
    pub message: String,
    #[serde(default)]
    pub traceback: Vec<String>,
    /// Set when the error came back from a remote executor.
    #[serde(default)]
    pub remote: bool,
}

impl PipelineError {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            module: String::new(),
            message: message.into(),
            traceback: Vec::new(),
            remote: false,
        }
    }

    pub fn from_error(error: &(dyn std::error::Error)) -> Self {
        let mut traceback = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            traceback.push(cause.to_string());
            source = cause.source();
        }
        Self {
            type_name: "Error".to_string(),
            module: String::new(),
            message: error.to_string(),
            traceback,
            remote: false,
        }
    }

    pub fn to_error_args(&self) -> ErrorMessageArgs {
        ErrorMessageArgs {
            type_name: self.type_name.clone(),
            module: self.module.clone(),
            message: self.message.clone(),
            traceback: self.traceback.clone(),
        }
    }
}

/// Worker-side error taxonomy. Transient conditions are handled locally with
/// park-and-retry and never become a `WorkerError`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("worker manager call failed: {0}")]
    Client(#[from] ClientError),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid data: {0}")]
    InvalidData(#[from] serde_json::Error),

    #[error("topic failed: {0}")]
    Topic(String),

    #[error("internal invariant violation: {0}")]
    Fatal(String),
}

impl WorkerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
