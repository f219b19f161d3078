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

use poem::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("invalid declarative object: {0}")]
    InvalidObject(String),

    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl ManagerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(message.into())
    }

    pub fn invalid_object(message: impl Into<String>) -> Self {
        Self::InvalidObject(message.into())
    }
}

impl poem::error::ResponseError for ManagerError {
    fn status(&self) -> StatusCode {
        match self {
            ManagerError::ConfigurationInvalid(_)
            | ManagerError::InvalidObject(_)
            | ManagerError::Yaml(_)
            | ManagerError::Json(_) => StatusCode::BAD_REQUEST,
            ManagerError::Database(_) | ManagerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
