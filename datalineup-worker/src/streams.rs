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

use futures::stream::BoxStream;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Multiplexes N streams by polling them in declaration order from a
/// rotating index, skipping exhausted ones. Starvation-free while all
/// sources are live.
pub struct RoundRobinFanIn<T> {
    sources: Vec<Option<BoxStream<'static, T>>>,
    next: usize,
}

impl<T> RoundRobinFanIn<T> {
    pub fn new(sources: Vec<BoxStream<'static, T>>) -> Self {
        Self {
            sources: sources.into_iter().map(Some).collect(),
            next: 0,
        }
    }
}

impl<T> Stream for RoundRobinFanIn<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        let len = this.sources.len();
        let mut live = false;

        for offset in 0..len {
            let index = (this.next + offset) % len;
            let Some(source) = this.sources[index].as_mut() else {
                continue;
            };
            match source.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    this.next = (index + 1) % len;
                    return Poll::Ready(Some(item));
                }
                Poll::Ready(None) => {
                    this.sources[index] = None;
                }
                Poll::Pending => {
                    live = true;
                }
            }
        }

        if live || this.sources.iter().any(Option::is_some) {
            Poll::Pending
        } else {
            Poll::Ready(None)
        }
    }
}

struct WeightedSource<T> {
    source: Option<BoxStream<'static, T>>,
    priority: u64,
    served: u64,
}

/// Credit-weighted multiplexing: serves the source minimizing
/// `served * priority` (ties by declaration order), so a source with
/// priority p receives a share proportional to 1/p. Sources that are not
/// ready are skipped rather than stalling the others.
pub struct WeightedFanIn<T> {
    sources: Vec<WeightedSource<T>>,
}

impl<T> WeightedFanIn<T> {
    pub fn new(sources: Vec<(u64, BoxStream<'static, T>)>) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|(priority, source)| WeightedSource {
                    source: Some(source),
                    priority: priority.max(1),
                    served: 0,
                })
                .collect(),
        }
    }
}

impl<T> Stream for WeightedFanIn<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();

        let mut candidates: Vec<usize> = (0..this.sources.len())
            .filter(|index| this.sources[*index].source.is_some())
            .collect();
        if candidates.is_empty() {
            return Poll::Ready(None);
        }
        candidates.sort_by_key(|index| {
            let entry = &this.sources[*index];
            (entry.served * entry.priority, *index)
        });

        let mut live = false;
        for index in candidates {
            let entry = &mut this.sources[index];
            let Some(source) = entry.source.as_mut() else {
                continue;
            };
            match source.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    entry.served += 1;
                    return Poll::Ready(Some(item));
                }
                Poll::Ready(None) => {
                    entry.source = None;
                }
                Poll::Pending => {
                    live = true;
                }
            }
        }

        if live || this.sources.iter().any(|entry| entry.source.is_some()) {
            Poll::Pending
        } else {
            Poll::Ready(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};
    use test_r::test;

    fn numbered(tag: &'static str, count: usize) -> BoxStream<'static, String> {
        stream::iter((0..count).map(move |n| format!("{tag}{n}"))).boxed()
    }

    #[test]
    async fn round_robin_alternates_and_drains() {
        let fanin = RoundRobinFanIn::new(vec![numbered("a", 4), numbered("b", 2)]);
        let items: Vec<String> = fanin.collect().await;
        assert_eq!(items, vec!["a0", "b0", "a1", "b1", "a2", "a3"]);
    }

    #[test]
    async fn weighted_shares_follow_inverse_priority() {
        let fanin = WeightedFanIn::new(vec![(1, numbered("a", 100)), (2, numbered("b", 100))]);
        let items: Vec<String> = fanin.take(75).collect().await;

        let a = items.iter().filter(|item| item.starts_with('a')).count();
        let b = items.iter().filter(|item| item.starts_with('b')).count();
        assert!((49..=51).contains(&a), "a share was {a}");
        assert!((24..=26).contains(&b), "b share was {b}");
    }

    #[test]
    async fn weighted_fanin_drains_exhausted_sources() {
        let fanin = WeightedFanIn::new(vec![(1, numbered("a", 29)), (2, numbered("b", 69))]);
        let items: Vec<String> = fanin.take(50).collect().await;

        let a = items.iter().filter(|item| item.starts_with('a')).count();
        let b = items.iter().filter(|item| item.starts_with('b')).count();
        assert_eq!(a, 29);
        assert_eq!(b, 21);
    }
}
