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

use crate::model::Cursor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CURSOR_FRAME_VERSION: u32 = 1;

/// Versioned resumable state: `a` is the highest prefix-completed cursor and
/// `p` the cursors completed out of order, all in the source's own order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorFrame {
    pub v: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub p: Vec<Cursor>,
}

#[derive(Debug, Error)]
pub enum CursorFrameError {
    #[error("invalid cursor frame: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("unsupported cursor frame version {0}")]
    UnsupportedVersion(u32),
}

impl CursorFrame {
    pub fn new(after: Option<Cursor>, pending: Vec<Cursor>) -> Self {
        Self {
            v: CURSOR_FRAME_VERSION,
            a: after,
            p: pending,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CursorFrameError> {
        let frame: CursorFrame = serde_json::from_str(raw)?;
        if frame.v != CURSOR_FRAME_VERSION {
            return Err(CursorFrameError::UnsupportedVersion(frame.v));
        }
        Ok(frame)
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_none() && self.p.is_empty()
    }

    pub fn to_cursor(&self) -> Option<Cursor> {
        if self.is_empty() {
            None
        } else {
            Some(Cursor::new(
                serde_json::to_string(self).expect("cursor frame serializes"),
            ))
        }
    }

    /// True when the given cursor was already committed in this frame and the
    /// corresponding item must be skipped on resume.
    pub fn contains(&self, cursor: &Cursor) -> bool {
        self.p.contains(cursor)
    }
}

impl Default for CursorFrame {
    fn default() -> Self {
        Self::new(None, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn frame_round_trip() {
        let frame = CursorFrame::new(
            Some(Cursor::from("2")),
            vec![Cursor::from("5"), Cursor::from("7")],
        );
        let cursor = frame.to_cursor().unwrap();
        let back = CursorFrame::parse(cursor.as_str()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn empty_fields_are_omitted() {
        let frame = CursorFrame::new(Some(Cursor::from("3")), vec![]);
        let json: serde_json::Value =
            serde_json::from_str(frame.to_cursor().unwrap().as_str()).unwrap();
        assert_eq!(json, serde_json::json!({"v": 1, "a": "3"}));

        let frame = CursorFrame::new(None, vec![Cursor::from("2")]);
        let json: serde_json::Value =
            serde_json::from_str(frame.to_cursor().unwrap().as_str()).unwrap();
        assert_eq!(json, serde_json::json!({"v": 1, "p": ["2"]}));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let result = CursorFrame::parse(r#"{"v": 2, "a": "1"}"#);
        assert!(matches!(
            result,
            Err(CursorFrameError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn empty_frame_has_no_cursor() {
        assert_eq!(CursorFrame::default().to_cursor(), None);
    }
}
