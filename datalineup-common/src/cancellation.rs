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

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio_util::sync::{CancellationToken as TokioToken, WaitForCancellationFuture};

/// A cancellation token that serializes as `{ "is_cancelled": bool }` so it
/// can cross process boundaries when work is handed to a remote executor.
/// Deserializing creates a fresh wake primitive carrying the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: TokioToken,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancelled()
    }

    pub fn child_token(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CancellationTokenState {
    is_cancelled: bool,
}

impl Serialize for CancellationToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CancellationTokenState {
            is_cancelled: self.is_cancelled(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CancellationToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = CancellationTokenState::deserialize(deserializer)?;
        let token = CancellationToken::new();
        if state.is_cancelled {
            token.cancel();
        }
        Ok(token)
    }
}
