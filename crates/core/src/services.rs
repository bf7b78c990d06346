// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Interfaces the invocation core consumes. The concrete operation runner,
//! membership service and partition table live outside this crate.

use std::sync::Arc;
use std::time::Duration;

use gridstone_types::time::MillisSinceEpoch;
use gridstone_types::{CallId, Member, MemberAddress, PartitionId, ReplicaIndex};

use crate::invocation::ResponseSink;
use crate::operation::{Envelope, Operation};

/// Runs operations locally and moves them between members.
pub trait OperationService: Send + Sync + 'static {
    /// Schedules `envelope` on the local operation runner. The runner funnels
    /// the operation's outcome into `sink`; it must never block the caller.
    fn run_local(&self, envelope: Envelope, sink: ResponseSink);

    /// Serializes and transmits one packet, fire-and-forget. Returns false
    /// when the packet could not be handed to the transport.
    fn send(&self, envelope: &Envelope, target: MemberAddress) -> bool;

    /// Per-attempt budget applied when an invocation does not carry an
    /// explicit call timeout.
    fn default_call_timeout(&self) -> Duration;

    /// Responder side of liveness probing: is the call `call_id`, submitted
    /// by `caller`, still being executed on this member?
    fn is_operation_executing(&self, caller: MemberAddress, call_id: CallId) -> bool;
}

/// Read-only view of the cluster membership. Updates are observed on every
/// dispatch.
pub trait ClusterService: Send + Sync + 'static {
    fn get_member(&self, address: MemberAddress) -> Option<Member>;

    /// Cluster-wide wall clock used to stamp invocation times.
    fn cluster_time(&self) -> MillisSinceEpoch;
}

/// Read-only view of the partition ownership table. Consulted on every
/// dispatch so migrations are observed.
pub trait PartitionService: Send + Sync + 'static {
    fn owner(
        &self,
        partition_id: PartitionId,
        replica_index: ReplicaIndex,
    ) -> Option<MemberAddress>;
}

/// Decides whether `child` may be invoked while `parent` is running.
///
/// The historical rule set (partition-level vs. key-based vs.
/// partition-aware) is disabled; the hook exists so a policy can be inserted
/// without a redesign. The parent is passed explicitly by whoever enables
/// nesting checks.
pub type NestedInvocationPolicy =
    Arc<dyn Fn(Option<&dyn Operation>, &dyn Operation) -> bool + Send + Sync>;

/// The default policy: always allow.
pub fn allow_all_nested() -> NestedInvocationPolicy {
    Arc::new(|_parent, _child| true)
}
