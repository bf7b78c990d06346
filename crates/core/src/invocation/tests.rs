// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use gridstone_types::errors::{
    CancelUnsupported, ExecutionError, InvocationError, OperationFailure, RetryableError,
};
use gridstone_types::response::InvocationResponse;
use gridstone_types::{PartitionId, ReplicaIndex};

use crate::invocation::{encode_bool, Invocation, IsStillExecuting};
use crate::operation::Operation;
use crate::test_env::{test_address, TestGridEnv};

const SERVICE: &str = "gs:impl:mapService";
const PARTITION: PartitionId = PartitionId::new(271);

#[derive(Debug)]
struct TestOp {
    wait_timeout: Option<Duration>,
    join: bool,
}

impl TestOp {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            wait_timeout: None,
            join: false,
        })
    }

    fn waiting(wait_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            wait_timeout: Some(wait_timeout),
            join: false,
        })
    }

    fn join() -> Arc<Self> {
        Arc::new(Self {
            wait_timeout: None,
            join: true,
        })
    }
}

impl Operation for TestOp {
    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(b"test-op");
    }

    fn is_join_operation(&self) -> bool {
        self.join
    }

    fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout
    }
}

fn partition_invocation(env: &TestGridEnv) -> super::InvocationBuilder {
    Invocation::on_partition(
        env.engine.clone(),
        SERVICE,
        TestOp::new(),
        PARTITION,
        ReplicaIndex::PRIMARY,
    )
}

#[tokio::test(start_paused = true)]
async fn local_happy_path() {
    let env = TestGridEnv::builder().build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, env.engine.this_address());
    env.operations
        .set_local_runner(|_envelope, sink| sink.notify_value(Some(Bytes::from_static(b"ok"))));

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();
    assert_eq!(
        invocation.get().await.unwrap(),
        Some(Bytes::from_static(b"ok"))
    );
    assert_eq!(invocation.invoke_count(), 1);
    assert!(invocation.is_done());
    // local dispatch never takes a call-id slot
    assert_eq!(env.operations.sent_count(), 0);
    assert_eq!(env.engine.registry().num_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn remote_happy_path() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();

    let sent = env.operations.sent();
    assert_eq!(sent.len(), 1);
    let (envelope, target) = &sent[0];
    assert_eq!(*target, remote);
    assert!(!envelope.header.call_id.is_unset());
    assert_eq!(env.engine.registry().num_in_flight(), 1);

    assert!(env.engine.notify_call(
        envelope.header.call_id,
        InvocationResponse::Value(Bytes::from_static(b"42"))
    ));
    assert_eq!(
        invocation.get().await.unwrap(),
        Some(Bytes::from_static(b"42"))
    );
    assert_eq!(env.engine.registry().num_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn retry_then_success_after_migration() {
    let env = TestGridEnv::builder().build();
    // partition unassigned at first dispatch
    env.operations
        .set_local_runner(|_envelope, sink| sink.notify_value(Some(Bytes::from_static(b"v"))));

    let mut invocation = partition_invocation(&env)
        .try_pause(Duration::from_millis(500))
        .build();
    invocation.invoke().unwrap();

    // the owner shows up before the retry re-resolves
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, env.engine.this_address());

    let started = tokio::time::Instant::now();
    assert_eq!(
        invocation.get().await.unwrap(),
        Some(Bytes::from_static(b"v"))
    );
    assert_eq!(invocation.invoke_count(), 2);
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn retry_budget_exhausted() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);
    env.operations.set_send_handler(|_envelope, _target| false);

    let mut invocation = partition_invocation(&env)
        .try_count(2)
        .try_pause(Duration::from_millis(10))
        .build();
    invocation.invoke().unwrap();

    let err = invocation.get().await.unwrap_err();
    let InvocationError::Execution(execution) = err else {
        panic!("expected an execution failure, got {err:?}");
    };
    assert_eq!(
        execution.cause(),
        Some(&RetryableError::SendFailed { target: remote })
    );
    assert!(invocation.is_done());
    assert_eq!(invocation.invoke_count(), 2);
    assert!(invocation.invoke_count() <= 2 + 1);
    assert_eq!(env.engine.registry().num_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn long_poll_probe_not_executing_times_out() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let engine = env.engine.clone();
    let mut sends = 0usize;
    env.operations.set_send_handler(move |envelope, _target| {
        sends += 1;
        if sends > 1 {
            // is-executing probe; the remote answers "not executing"
            engine.notify_call(
                envelope.header.call_id,
                InvocationResponse::Value(encode_bool(false)),
            );
        }
        true
    });

    let mut invocation = partition_invocation(&env)
        .call_timeout(Duration::from_millis(100))
        .build();
    invocation.invoke().unwrap();

    let err = invocation
        .get_with_timeout(Duration::from_secs(10))
        .await
        .unwrap_err();
    assert_eq!(err, InvocationError::OperationTimeout { waited_millis: 200 });
    assert!(invocation.is_done());
    assert_eq!(env.engine.registry().num_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn long_poll_race_win_returns_late_response() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let engine = env.engine.clone();
    let mut sends = 0usize;
    env.operations.set_send_handler(move |envelope, _target| {
        sends += 1;
        if sends > 1 {
            let probe = IsStillExecuting::decode_payload(envelope.payload()).unwrap();
            // the real response lands between the poll expiry and the verdict
            engine.notify_call(
                probe.call_id(),
                InvocationResponse::Value(Bytes::from_static(b"late")),
            );
            engine.notify_call(
                envelope.header.call_id,
                InvocationResponse::Value(encode_bool(false)),
            );
        }
        true
    });

    let mut invocation = partition_invocation(&env)
        .call_timeout(Duration::from_millis(100))
        .build();
    invocation.invoke().unwrap();

    assert_eq!(
        invocation
            .get_with_timeout(Duration::from_secs(10))
            .await
            .unwrap(),
        Some(Bytes::from_static(b"late"))
    );
    assert_eq!(env.engine.registry().num_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn long_poll_probes_every_two_call_timeouts() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let engine = env.engine.clone();
    let mut sends = 0usize;
    env.operations.set_send_handler(move |envelope, _target| {
        sends += 1;
        if sends > 1 {
            // the remote keeps claiming the operation is executing
            engine.notify_call(
                envelope.header.call_id,
                InvocationResponse::Value(encode_bool(true)),
            );
        }
        true
    });

    let mut invocation = partition_invocation(&env)
        .call_timeout(Duration::from_millis(100))
        .build();
    invocation.invoke().unwrap();

    let started = tokio::time::Instant::now();
    let err = invocation
        .get_with_timeout(Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err, InvocationError::Timeout);
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    // one slice per 2 * call_timeout, one probe between slices
    assert_eq!(env.operations.sent_count(), 1 + 4);
    // the caller deadline is not terminal; the call is still live
    assert!(!invocation.is_done());
}

#[tokio::test(start_paused = true)]
async fn long_poll_migration_to_local_skips_probe() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env)
        .call_timeout(Duration::from_millis(100))
        .build();
    invocation.invoke().unwrap();
    let call_id = env.operations.sent()[0].0.header.call_id;

    // the partition migrates home while the call is in flight
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, env.engine.this_address());

    let engine = env.engine.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        engine.notify_call(
            call_id,
            InvocationResponse::Value(Bytes::from_static(b"moved")),
        );
    });

    assert_eq!(
        invocation
            .get_with_timeout(Duration::from_secs(10))
            .await
            .unwrap(),
        Some(Bytes::from_static(b"moved"))
    );
    // no probe was issued for the migrated-home target
    assert_eq!(env.operations.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn notify_before_get_is_observed() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();

    invocation.notify(InvocationResponse::Value(Bytes::from_static(b"x")));
    assert_eq!(
        invocation.get().await.unwrap(),
        Some(Bytes::from_static(b"x"))
    );
}

#[tokio::test(start_paused = true)]
async fn notified_null_is_a_null_return() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();

    invocation.notify(InvocationResponse::from_value(None));
    assert_eq!(invocation.get().await.unwrap(), None);
    assert!(invocation.is_done());
}

#[tokio::test(start_paused = true)]
async fn repeated_get_replays_the_terminal_outcome() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();
    let call_id = env.operations.sent()[0].0.header.call_id;

    env.engine.notify_call(
        call_id,
        InvocationResponse::Failure(OperationFailure::Execution(ExecutionError::new("boom"))),
    );

    let first = invocation.get().await.unwrap_err();
    let second = invocation.get().await.unwrap_err();
    assert_eq!(first, second);
    assert_eq!(first, InvocationError::Execution(ExecutionError::new("boom")));
    // no re-dispatch happened
    assert_eq!(invocation.invoke_count(), 1);
    assert_eq!(env.operations.sent_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unclassified_failures_are_wrapped_once() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();
    let call_id = env.operations.sent()[0].0.header.call_id;

    env.engine.notify_call(
        call_id,
        InvocationResponse::Failure(OperationFailure::other("split brain suspected")),
    );
    let err = invocation.get().await.unwrap_err();
    let InvocationError::Execution(execution) = err else {
        panic!("expected an execution failure, got {err:?}");
    };
    assert_eq!(execution.message(), "split brain suspected");
    assert_eq!(execution.cause(), None);
}

#[tokio::test(start_paused = true)]
async fn non_member_target_is_recoverable() {
    let stranger = test_address(5799);
    let env = TestGridEnv::builder().build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, stranger);

    let mut invocation = partition_invocation(&env).try_count(1).build();
    invocation.invoke().unwrap();

    let err = invocation.get().await.unwrap_err();
    let InvocationError::Execution(execution) = err else {
        panic!("expected an execution failure, got {err:?}");
    };
    assert_eq!(
        execution.cause(),
        Some(&RetryableError::TargetNotMember { target: stranger })
    );
    assert_eq!(env.operations.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn join_operations_bypass_the_membership_check() {
    let joining = test_address(5799);
    let env = TestGridEnv::builder().build();

    let mut invocation =
        Invocation::on_member(env.engine.clone(), SERVICE, TestOp::join(), joining).build();
    invocation.invoke().unwrap();
    assert_eq!(env.operations.sent_count(), 1);

    let call_id = env.operations.sent()[0].0.header.call_id;
    env.engine
        .notify_call(call_id, InvocationResponse::from_value(None));
    assert_eq!(invocation.get().await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn get_with_zero_timeout_returns_immediately() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();

    let started = tokio::time::Instant::now();
    assert_eq!(
        invocation.get_with_timeout(Duration::ZERO).await.unwrap_err(),
        InvocationError::Timeout
    );
    assert_eq!(started.elapsed(), Duration::ZERO);

    // a response that is already in the inbox is still returned
    let call_id = env.operations.sent()[0].0.header.call_id;
    env.engine.notify_call(
        call_id,
        InvocationResponse::Value(Bytes::from_static(b"ready")),
    );
    assert_eq!(
        invocation.get_with_timeout(Duration::ZERO).await.unwrap(),
        Some(Bytes::from_static(b"ready"))
    );
}

#[tokio::test(start_paused = true)]
async fn interrupt_on_active_node_is_swallowed() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();
    let call_id = env.operations.sent()[0].0.header.call_id;

    let engine = env.engine.clone();
    let handle = tokio::spawn(async move { invocation.get().await });
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    engine.interrupt_waiters();
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert!(!handle.is_finished());

    engine.notify_call(call_id, InvocationResponse::Value(Bytes::from_static(b"ok")));
    assert_eq!(
        handle.await.unwrap().unwrap(),
        Some(Bytes::from_static(b"ok"))
    );
}

#[tokio::test(start_paused = true)]
async fn interrupt_on_inactive_node_propagates() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();

    let engine = env.engine.clone();
    let handle = tokio::spawn(async move { invocation.get().await });
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    engine.shutdown();
    assert_eq!(handle.await.unwrap(), Err(InvocationError::NodeInactive));
    assert_eq!(engine.registry().num_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn invoke_on_inactive_node_fails() {
    let env = TestGridEnv::builder().build();
    env.engine.shutdown();

    let mut invocation = partition_invocation(&env).build();
    assert_eq!(invocation.invoke(), Err(InvocationError::NodeInactive));
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "cannot be invoked more than once")]
async fn double_invoke_panics() {
    let env = TestGridEnv::builder().build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, env.engine.this_address());

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();
    let _ = invocation.invoke();
}

#[tokio::test(start_paused = true)]
async fn cancellation_is_unsupported() {
    let env = TestGridEnv::builder().build();
    let invocation = partition_invocation(&env).build();
    assert_eq!(invocation.cancel(), Err(CancelUnsupported));
    assert!(!invocation.is_cancelled());
    assert!(!invocation.is_done());
}

#[tokio::test(start_paused = true)]
async fn dropping_a_pending_invocation_reclaims_its_slot() {
    let remote = test_address(5702);
    let env = TestGridEnv::builder().member(remote).build();
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, remote);

    let mut invocation = partition_invocation(&env).build();
    invocation.invoke().unwrap();
    assert_eq!(env.engine.registry().num_in_flight(), 1);

    drop(invocation);
    assert_eq!(env.engine.registry().num_in_flight(), 0);
}

#[test]
fn zero_call_timeout_uses_the_derived_default() {
    let env = TestGridEnv::builder().build();
    env.operations
        .set_default_call_timeout(Duration::from_secs(30));

    let invocation = partition_invocation(&env)
        .call_timeout(Duration::ZERO)
        .build();
    assert_eq!(invocation.call_timeout(), Duration::from_secs(30));

    let invocation = partition_invocation(&env)
        .call_timeout(Duration::from_secs(7))
        .build();
    assert_eq!(invocation.call_timeout(), Duration::from_secs(7));
}

#[test]
fn wait_supporting_operations_derive_from_their_wait() {
    let env = TestGridEnv::builder().build();
    env.operations
        .set_default_call_timeout(Duration::from_secs(60));

    let invocation = Invocation::on_partition(
        env.engine.clone(),
        SERVICE,
        TestOp::waiting(Duration::from_secs(7)),
        PARTITION,
        ReplicaIndex::PRIMARY,
    )
    .build();
    assert_eq!(invocation.call_timeout(), Duration::from_secs(12));

    // a short default wins over the wait-derived budget
    env.operations
        .set_default_call_timeout(Duration::from_secs(3));
    let invocation = Invocation::on_partition(
        env.engine.clone(),
        SERVICE,
        TestOp::waiting(Duration::from_secs(7)),
        PARTITION,
        ReplicaIndex::PRIMARY,
    )
    .build();
    assert_eq!(invocation.call_timeout(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn nested_policy_can_reject_an_invocation() {
    let env = TestGridEnv::builder().build();
    let engine = {
        let rejecting: crate::services::NestedInvocationPolicy =
            Arc::new(|parent, _child| parent.is_none());
        crate::NodeEngine::builder(
            env.engine.this_address(),
            env.cluster.clone(),
            env.partitions.clone(),
            env.operations.clone(),
        )
        .nested_policy(rejecting)
        .build()
    };
    env.partitions
        .set_owner(PARTITION, ReplicaIndex::PRIMARY, engine.this_address());

    let mut allowed = Invocation::on_partition(
        engine.clone(),
        SERVICE,
        TestOp::new(),
        PARTITION,
        ReplicaIndex::PRIMARY,
    )
    .build();
    allowed.invoke().unwrap();

    let mut nested = Invocation::on_partition(
        engine.clone(),
        SERVICE,
        TestOp::new(),
        PARTITION,
        ReplicaIndex::PRIMARY,
    )
    .parent(TestOp::new())
    .build();
    assert!(matches!(
        nested.invoke(),
        Err(InvocationError::NotAllowed { .. })
    ));
    assert_eq!(nested.invoke_count(), 0);
}
