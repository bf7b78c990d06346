// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

/// Identifies a logical shard of the grid's key space.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
    derive_more::Debug,
    derive_more::FromStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
#[debug("{}", _0)]
pub struct PartitionId(u32);

impl PartitionId {
    pub const MIN: Self = Self(u32::MIN);
    pub const MAX: Self = Self(u32::MAX);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

/// Replica rank within a partition. Rank 0 is the primary; higher ranks are
/// backups.
#[derive(
    Copy,
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
    derive_more::Debug,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
#[display("r{}", _0)]
#[debug("r{}", _0)]
pub struct ReplicaIndex(u8);

impl ReplicaIndex {
    pub const PRIMARY: Self = Self(0);

    pub const fn new(index: u8) -> Self {
        Self(index)
    }
}

/// Correlates a dispatched remote operation with its response. Allocated by
/// the call registry; process-unique for the registry's lifetime (wraparound
/// would take more than 10^19 allocations, far beyond any process lifetime).
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
    derive_more::Debug,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
#[serde(transparent)]
#[display("c{}", _0)]
#[debug("c{}", _0)]
pub struct CallId(u64);

impl CallId {
    /// Placeholder carried by operations that never went through the call
    /// registry (local dispatch, not-yet-registered headers).
    pub const UNSET: Self = Self(0);

    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }
}
