// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::{Duration, SystemTime};

/// Milliseconds since the unix epoch, used for the cluster-time stamps on
/// dispatched operations. The invocation core only ever stamps and carries
/// these; it never does arithmetic on them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
pub struct MillisSinceEpoch(u64);

impl MillisSinceEpoch {
    pub const fn new(millis_since_epoch: u64) -> Self {
        MillisSinceEpoch(millis_since_epoch)
    }

    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system clock should not be before the unix epoch")
            .as_millis();
        MillisSinceEpoch(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

/// Remaining caller wait budget in milliseconds, saturating at "infinite".
///
/// The infinite budget is a sentinel that is never charged; a finite budget
/// saturates at zero instead of going negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeBudget(u64);

impl TimeBudget {
    pub const INFINITE: TimeBudget = TimeBudget(u64::MAX);
    pub const ZERO: TimeBudget = TimeBudget(0);

    pub const fn from_millis(millis: u64) -> Self {
        TimeBudget(millis)
    }

    /// Durations beyond the representable range are treated as infinite.
    pub fn from_duration(timeout: Duration) -> Self {
        TimeBudget(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    }

    pub const fn millis(self) -> u64 {
        self.0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == u64::MAX
    }

    pub const fn has_remaining(self) -> bool {
        self.0 > 0
    }

    /// Charges `elapsed` against the budget. An infinite budget is left
    /// unchanged; a finite one saturates at zero.
    pub fn decrement(&mut self, elapsed: Duration) {
        if self.is_infinite() {
            return;
        }
        let elapsed = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.0 = self.0.saturating_sub(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_the_epoch() {
        assert!(MillisSinceEpoch::now() > MillisSinceEpoch::new(0));
    }

    #[test]
    fn budget_decrement_saturates() {
        let mut budget = TimeBudget::from_millis(100);
        budget.decrement(Duration::from_millis(40));
        assert_eq!(budget.millis(), 60);
        budget.decrement(Duration::from_millis(1000));
        assert_eq!(budget, TimeBudget::ZERO);
        assert!(!budget.has_remaining());
    }

    #[test]
    fn infinite_budget_is_never_charged() {
        let mut budget = TimeBudget::INFINITE;
        budget.decrement(Duration::from_secs(u64::MAX / 1000));
        assert!(budget.is_infinite());
        assert!(budget.has_remaining());
    }

    #[test]
    fn oversized_durations_are_infinite() {
        assert!(TimeBudget::from_duration(Duration::MAX).is_infinite());
        assert_eq!(
            TimeBudget::from_duration(Duration::from_millis(250)).millis(),
            250
        );
    }
}
