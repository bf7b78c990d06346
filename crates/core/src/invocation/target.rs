// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use gridstone_types::{MemberAddress, PartitionId, ReplicaIndex};

use crate::NodeEngine;

/// Where an invocation is aimed. The two shapes differ only in how they
/// resolve to a concrete member address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationTarget {
    /// The current owner of a partition replica. Re-resolved on every
    /// dispatch so migrations are observed mid-call.
    Partition {
        partition_id: PartitionId,
        replica_index: ReplicaIndex,
    },
    /// A fixed member address supplied at construction.
    Member(MemberAddress),
}

impl InvocationTarget {
    /// `None` means the partition is currently unassigned, which the
    /// invocation treats as a recoverable wrong-target outcome.
    pub(crate) fn resolve(&self, engine: &NodeEngine) -> Option<MemberAddress> {
        match *self {
            InvocationTarget::Partition {
                partition_id,
                replica_index,
            } => engine.partitions().owner(partition_id, replica_index),
            InvocationTarget::Member(address) => Some(address),
        }
    }

    pub fn partition_id(&self) -> Option<PartitionId> {
        match *self {
            InvocationTarget::Partition { partition_id, .. } => Some(partition_id),
            InvocationTarget::Member(_) => None,
        }
    }

    pub fn replica_index(&self) -> ReplicaIndex {
        match *self {
            InvocationTarget::Partition { replica_index, .. } => replica_index,
            InvocationTarget::Member(_) => ReplicaIndex::PRIMARY,
        }
    }
}
