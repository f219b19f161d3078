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

use crate::error::WorkerError;
use datalineup_common::model::{RateLimitStrategy, ResourceRateLimit};
use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::time::Duration;

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    DefaultClock,
>;

/// One or more "<count>/<period>" limits, all of which must admit a request.
/// `fixed` admits the full count as a burst per period; `moving` smooths
/// admissions to one every period/count.
pub struct RateLimits {
    limiters: Vec<DirectLimiter>,
    clock: DefaultClock,
}

fn parse_entry(entry: &str) -> Result<(NonZeroU32, Duration), WorkerError> {
    let (count, period) = entry.split_once('/').ok_or_else(|| {
        WorkerError::configuration(format!("invalid rate limit entry: {entry}"))
    })?;
    let count: NonZeroU32 = count.trim().parse().map_err(|_| {
        WorkerError::configuration(format!("invalid rate limit count: {entry}"))
    })?;
    let period = humantime::parse_duration(period.trim()).map_err(|_| {
        WorkerError::configuration(format!("invalid rate limit period: {entry}"))
    })?;
    Ok((count, period))
}

impl RateLimits {
    pub fn parse(spec: &ResourceRateLimit) -> Result<Self, WorkerError> {
        let mut limiters = Vec::with_capacity(spec.rate_limits.len());
        for entry in &spec.rate_limits {
            let (count, period) = parse_entry(entry)?;
            let replenish = period / count.get();
            let quota = Quota::with_period(replenish.max(Duration::from_nanos(1)))
                .ok_or_else(|| {
                    WorkerError::configuration(format!("invalid rate limit period: {entry}"))
                })?
                .allow_burst(match spec.strategy {
                    RateLimitStrategy::Fixed => count,
                    RateLimitStrategy::Moving => nonzero!(1u32),
                });
            limiters.push(RateLimiter::direct(quota));
        }
        Ok(Self {
            limiters,
            clock: DefaultClock::default(),
        })
    }

    /// Admits when every window permits; on rejection returns how long to
    /// wait before the earliest possible retry.
    pub fn try_admit(&self) -> Result<(), Duration> {
        for limiter in &self.limiters {
            if let Err(not_until) = limiter.check() {
                return Err(not_until.wait_time_from(self.clock.now()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn limits(entries: &[&str], strategy: RateLimitStrategy) -> RateLimits {
        RateLimits::parse(&ResourceRateLimit {
            rate_limits: entries.iter().map(|entry| entry.to_string()).collect(),
            strategy,
        })
        .unwrap()
    }

    #[test]
    fn fixed_strategy_admits_full_burst() {
        let limits = limits(&["3/1h"], RateLimitStrategy::Fixed);
        assert!(limits.try_admit().is_ok());
        assert!(limits.try_admit().is_ok());
        assert!(limits.try_admit().is_ok());
        let wait = limits.try_admit().unwrap_err();
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn moving_strategy_smooths_admissions() {
        let limits = limits(&["2/1h"], RateLimitStrategy::Moving);
        assert!(limits.try_admit().is_ok());
        assert!(limits.try_admit().is_err());
    }

    #[test]
    fn entries_are_anded() {
        let limits = limits(&["100/1h", "1/1h"], RateLimitStrategy::Fixed);
        assert!(limits.try_admit().is_ok());
        assert!(limits.try_admit().is_err());
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let spec = ResourceRateLimit {
            rate_limits: vec!["nope".to_string()],
            strategy: RateLimitStrategy::Fixed,
        };
        assert!(RateLimits::parse(&spec).is_err());
    }
}
