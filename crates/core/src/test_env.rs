// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! In-memory grid environment for tests: a node engine wired to scriptable
//! cluster, partition-table and operation-service mocks.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;

use gridstone_types::config::InvocationOptions;
use gridstone_types::time::MillisSinceEpoch;
use gridstone_types::{CallId, Member, MemberAddress, PartitionId, ReplicaIndex};

use crate::invocation::ResponseSink;
use crate::operation::Envelope;
use crate::services::{ClusterService, OperationService, PartitionService};
use crate::NodeEngine;

pub fn test_address(port: u16) -> MemberAddress {
    MemberAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

pub struct TestGridEnv {
    pub engine: NodeEngine,
    pub cluster: Arc<MockCluster>,
    pub partitions: Arc<MockPartitionTable>,
    pub operations: Arc<MockOperationService>,
}

impl TestGridEnv {
    pub fn builder() -> TestGridEnvBuilder {
        TestGridEnvBuilder {
            this_address: test_address(5701),
            options: InvocationOptions::default(),
            members: Vec::new(),
        }
    }
}

pub struct TestGridEnvBuilder {
    this_address: MemberAddress,
    options: InvocationOptions,
    members: Vec<MemberAddress>,
}

impl TestGridEnvBuilder {
    pub fn this_address(mut self, address: MemberAddress) -> Self {
        self.this_address = address;
        self
    }

    pub fn options(mut self, options: InvocationOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds a remote member to the initial membership view.
    pub fn member(mut self, address: MemberAddress) -> Self {
        self.members.push(address);
        self
    }

    pub fn build(self) -> TestGridEnv {
        let cluster = Arc::new(MockCluster::default());
        cluster.add_member(self.this_address);
        for member in self.members {
            cluster.add_member(member);
        }
        let partitions = Arc::new(MockPartitionTable::default());
        let operations = Arc::new(MockOperationService::default());
        let engine = NodeEngine::builder(
            self.this_address,
            cluster.clone(),
            partitions.clone(),
            operations.clone(),
        )
        .options(self.options)
        .build();
        TestGridEnv {
            engine,
            cluster,
            partitions,
            operations,
        }
    }
}

#[derive(Default)]
pub struct MockCluster {
    members: DashMap<MemberAddress, Member>,
}

impl MockCluster {
    pub fn add_member(&self, address: MemberAddress) {
        self.members
            .insert(address, Member::new(address, MillisSinceEpoch::now()));
    }

    pub fn remove_member(&self, address: MemberAddress) {
        self.members.remove(&address);
    }
}

impl ClusterService for MockCluster {
    fn get_member(&self, address: MemberAddress) -> Option<Member> {
        self.members.get(&address).map(|m| m.value().clone())
    }

    fn cluster_time(&self) -> MillisSinceEpoch {
        MillisSinceEpoch::now()
    }
}

#[derive(Default)]
pub struct MockPartitionTable {
    owners: DashMap<(PartitionId, ReplicaIndex), MemberAddress>,
}

impl MockPartitionTable {
    pub fn set_owner(
        &self,
        partition_id: PartitionId,
        replica_index: ReplicaIndex,
        owner: MemberAddress,
    ) {
        self.owners.insert((partition_id, replica_index), owner);
    }

    pub fn clear_owner(&self, partition_id: PartitionId, replica_index: ReplicaIndex) {
        self.owners.remove(&(partition_id, replica_index));
    }
}

impl PartitionService for MockPartitionTable {
    fn owner(
        &self,
        partition_id: PartitionId,
        replica_index: ReplicaIndex,
    ) -> Option<MemberAddress> {
        self.owners
            .get(&(partition_id, replica_index))
            .map(|owner| *owner)
    }
}

type LocalRunner = Box<dyn FnMut(Envelope, ResponseSink) + Send>;
type SendHandler = Box<dyn FnMut(&Envelope, MemberAddress) -> bool + Send>;

/// Scriptable operation service. The local runner answers null and `send`
/// accepts every packet unless overridden.
pub struct MockOperationService {
    local_runner: Mutex<LocalRunner>,
    send_handler: Mutex<SendHandler>,
    sent: Mutex<Vec<(Envelope, MemberAddress)>>,
    default_call_timeout: Mutex<Duration>,
    executing: AtomicBool,
    probed: Mutex<Vec<(MemberAddress, CallId)>>,
}

impl Default for MockOperationService {
    fn default() -> Self {
        Self {
            local_runner: Mutex::new(Box::new(|_envelope, sink| sink.notify_value(None))),
            send_handler: Mutex::new(Box::new(|_envelope, _target| true)),
            sent: Mutex::new(Vec::new()),
            default_call_timeout: Mutex::new(Duration::from_secs(60)),
            executing: AtomicBool::new(false),
            probed: Mutex::new(Vec::new()),
        }
    }
}

impl MockOperationService {
    pub fn set_local_runner(
        &self,
        runner: impl FnMut(Envelope, ResponseSink) + Send + 'static,
    ) {
        *self.local_runner.lock().unwrap() = Box::new(runner);
    }

    pub fn set_send_handler(
        &self,
        handler: impl FnMut(&Envelope, MemberAddress) -> bool + Send + 'static,
    ) {
        *self.send_handler.lock().unwrap() = Box::new(handler);
    }

    pub fn set_default_call_timeout(&self, timeout: Duration) {
        *self.default_call_timeout.lock().unwrap() = timeout;
    }

    pub fn set_operation_executing(&self, executing: bool) {
        self.executing.store(executing, Ordering::Relaxed);
    }

    /// Every envelope handed to `send`, with its target.
    pub fn sent(&self) -> Vec<(Envelope, MemberAddress)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Recorded responder-side is-executing queries.
    pub fn probes(&self) -> Vec<(MemberAddress, CallId)> {
        self.probed.lock().unwrap().clone()
    }
}

impl OperationService for MockOperationService {
    fn run_local(&self, envelope: Envelope, sink: ResponseSink) {
        (self.local_runner.lock().unwrap())(envelope, sink);
    }

    fn send(&self, envelope: &Envelope, target: MemberAddress) -> bool {
        self.sent.lock().unwrap().push((envelope.clone(), target));
        (self.send_handler.lock().unwrap())(envelope, target)
    }

    fn default_call_timeout(&self) -> Duration {
        *self.default_call_timeout.lock().unwrap()
    }

    fn is_operation_executing(&self, caller: MemberAddress, call_id: CallId) -> bool {
        self.probed.lock().unwrap().push((caller, call_id));
        self.executing.load(Ordering::Relaxed)
    }
}
