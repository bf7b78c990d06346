// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::debug;

use gridstone_types::config::InvocationOptions;
use gridstone_types::errors::OperationFailure;
use gridstone_types::response::InvocationResponse;
use gridstone_types::time::MillisSinceEpoch;
use gridstone_types::{CallId, MemberAddress};

use crate::invocation::CallRegistry;
use crate::services::{
    allow_all_nested, ClusterService, NestedInvocationPolicy, OperationService, PartitionService,
};

/// Shared handle to the local member's invocation runtime. Cheap to clone;
/// clones observe the same registry, activity flag and service views.
#[derive(Clone)]
pub struct NodeEngine {
    inner: Arc<Inner>,
}

struct Inner {
    this_address: MemberAddress,
    options: InvocationOptions,
    cluster: Arc<dyn ClusterService>,
    partitions: Arc<dyn PartitionService>,
    operations: Arc<dyn OperationService>,
    registry: CallRegistry,
    active: AtomicBool,
    /// Wakes tasks blocked in `get` so they can re-check the activity flag.
    waiter_interrupts: Notify,
    allow_nested: NestedInvocationPolicy,
}

impl NodeEngine {
    pub fn builder(
        this_address: MemberAddress,
        cluster: Arc<dyn ClusterService>,
        partitions: Arc<dyn PartitionService>,
        operations: Arc<dyn OperationService>,
    ) -> NodeEngineBuilder {
        NodeEngineBuilder {
            this_address,
            cluster,
            partitions,
            operations,
            options: InvocationOptions::default(),
            allow_nested: allow_all_nested(),
        }
    }

    pub fn this_address(&self) -> MemberAddress {
        self.inner.this_address
    }

    pub fn options(&self) -> &InvocationOptions {
        &self.inner.options
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn cluster_time(&self) -> MillisSinceEpoch {
        self.inner.cluster.cluster_time()
    }

    /// Routes a network response to the invocation registered under
    /// `call_id`. Returns false when no call is registered (late or duplicate
    /// response; dropped on the floor).
    pub fn notify_call(&self, call_id: CallId, response: InvocationResponse) -> bool {
        self.inner.registry.route(call_id, response)
    }

    /// Wakes every task currently blocked in `get`. Waiters on an active
    /// member resume waiting; on an inactive member the wakeup propagates as
    /// a node-inactive failure.
    pub fn interrupt_waiters(&self) {
        self.inner.waiter_interrupts.notify_waiters();
    }

    /// Marks the member inactive, fails every pending registered call and
    /// wakes blocked waiters. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.active.swap(false, Ordering::AcqRel) {
            debug!("node engine shutting down, failing pending invocations");
            self.inner.registry.drain(OperationFailure::NodeInactive);
            self.inner.waiter_interrupts.notify_waiters();
        }
    }

    pub(crate) fn interrupted(&self) -> Notified<'_> {
        self.inner.waiter_interrupts.notified()
    }

    pub(crate) fn cluster(&self) -> &dyn ClusterService {
        self.inner.cluster.as_ref()
    }

    pub(crate) fn partitions(&self) -> &dyn PartitionService {
        self.inner.partitions.as_ref()
    }

    pub(crate) fn operations(&self) -> &dyn OperationService {
        self.inner.operations.as_ref()
    }

    pub(crate) fn registry(&self) -> &CallRegistry {
        &self.inner.registry
    }

    pub(crate) fn allow_nested(&self) -> &NestedInvocationPolicy {
        &self.inner.allow_nested
    }
}

pub struct NodeEngineBuilder {
    this_address: MemberAddress,
    options: InvocationOptions,
    cluster: Arc<dyn ClusterService>,
    partitions: Arc<dyn PartitionService>,
    operations: Arc<dyn OperationService>,
    allow_nested: NestedInvocationPolicy,
}

impl NodeEngineBuilder {
    pub fn options(mut self, options: InvocationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn nested_policy(mut self, policy: NestedInvocationPolicy) -> Self {
        self.allow_nested = policy;
        self
    }

    pub fn build(self) -> NodeEngine {
        NodeEngine {
            inner: Arc::new(Inner {
                this_address: self.this_address,
                options: self.options,
                cluster: self.cluster,
                partitions: self.partitions,
                operations: self.operations,
                registry: CallRegistry::default(),
                active: AtomicBool::new(true),
                waiter_interrupts: Notify::new(),
                allow_nested: self.allow_nested,
            }),
        }
    }
}
