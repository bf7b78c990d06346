// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! One logical call into the grid: target resolution, local-vs-remote
//! dispatch, the retry loop, long-poll liveness checking and terminal result
//! classification.

mod inbox;
mod liveness;
mod registry;
mod target;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tokio::time::Instant;
use tracing::{trace, warn};

use gridstone_types::errors::{
    CancelUnsupported, ExecutionError, InvocationError, OperationFailure, RetryableError,
};
use gridstone_types::response::InvocationResponse;
use gridstone_types::time::TimeBudget;
use gridstone_types::{CallId, MemberAddress, PartitionId, ReplicaIndex};

use crate::metric_definitions::{
    INVOCATION_OPERATION_TIMEOUTS, INVOCATION_RETRIES, INVOCATION_STARTED,
};
use crate::operation::{CallHeader, Envelope, Operation};
use crate::NodeEngine;

pub use inbox::{ResponseInbox, ResponseSink};
pub use liveness::{decode_bool, encode_bool, IsStillExecuting};
pub use registry::{CallRegistry, RegisteredCall};
pub use target::InvocationTarget;

/// A single logical call against the grid.
///
/// Created over an operation and a logical destination, dispatched exactly
/// once with [`invoke`](Self::invoke), then driven by [`get`](Self::get) /
/// [`get_with_timeout`](Self::get_with_timeout) until a terminal outcome.
/// Re-dispatch on recoverable failures happens only inside the retry loop.
pub struct Invocation {
    engine: NodeEngine,
    service_name: String,
    op: Arc<dyn Operation>,
    target: InvocationTarget,
    try_count: u32,
    try_pause: Duration,
    call_timeout: Duration,
    parent: Option<Arc<dyn Operation>>,
    invoke_count: u32,
    done: bool,
    terminal: Option<Result<Option<Bytes>, InvocationError>>,
    inbox: ResponseInbox,
    registered: Option<RegisteredCall>,
}

/// Outcome of one timed inbox poll.
enum PollOutcome {
    Response(InvocationResponse),
    TimedOut,
    /// The engine woke blocked waiters; re-check the activity flag.
    Interrupted,
}

impl Invocation {
    /// An invocation aimed at the current owner of a partition replica.
    pub fn on_partition(
        engine: NodeEngine,
        service_name: impl Into<String>,
        op: Arc<dyn Operation>,
        partition_id: PartitionId,
        replica_index: ReplicaIndex,
    ) -> InvocationBuilder {
        InvocationBuilder::new(
            engine,
            service_name.into(),
            op,
            InvocationTarget::Partition {
                partition_id,
                replica_index,
            },
        )
    }

    /// An invocation aimed at a fixed member address.
    pub fn on_member(
        engine: NodeEngine,
        service_name: impl Into<String>,
        op: Arc<dyn Operation>,
        target: MemberAddress,
    ) -> InvocationBuilder {
        InvocationBuilder::new(
            engine,
            service_name.into(),
            op,
            InvocationTarget::Member(target),
        )
    }

    /// Dispatches the invocation. Must be called exactly once; after this,
    /// the retry loop owns every re-dispatch.
    ///
    /// Only non-recoverable conditions surface here; recoverable dispatch
    /// failures are funneled into the inbox so the retry loop in `get` owns
    /// them.
    pub fn invoke(&mut self) -> Result<(), InvocationError> {
        assert_eq!(
            self.invoke_count, 0,
            "an invocation cannot be invoked more than once"
        );
        let allow_nested = self.engine.allow_nested().as_ref();
        if !allow_nested(self.parent.as_deref(), self.op.as_ref()) {
            return Err(InvocationError::NotAllowed {
                reason: format!("{:?} rejected by the nested-invocation policy", self.op).into(),
            });
        }
        counter!(INVOCATION_STARTED).increment(1);
        self.dispatch()
    }

    /// Blocks until a terminal outcome, without a caller deadline.
    ///
    /// A caller-deadline expiry cannot normally happen with an infinite
    /// budget; if it does surface it is logged and reported as a null result.
    pub async fn get(&mut self) -> Result<Option<Bytes>, InvocationError> {
        match self.poll_terminal(TimeBudget::INFINITE).await {
            Err(InvocationError::Timeout) => {
                trace!(invocation = %self, "deadline expired without a caller timeout");
                Ok(None)
            }
            outcome => outcome,
        }
    }

    /// Blocks until a terminal outcome or `timeout` expires. On expiry the
    /// invocation is still live and `get` may be called again.
    pub async fn get_with_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Bytes>, InvocationError> {
        self.poll_terminal(TimeBudget::from_duration(timeout)).await
    }

    /// Callback entry point for external responders (the network dispatch
    /// path goes through the call registry instead).
    pub fn notify(&self, response: InvocationResponse) {
        self.inbox.sink().notify(response);
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn operation(&self) -> &dyn Operation {
        self.op.as_ref()
    }

    pub fn partition_id(&self) -> Option<PartitionId> {
        self.target.partition_id()
    }

    pub fn replica_index(&self) -> ReplicaIndex {
        self.target.replica_index()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn invoke_count(&self) -> u32 {
        self.invoke_count
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Rescinding work already accepted by a remote member is not possible.
    pub fn cancel(&self) -> Result<(), CancelUnsupported> {
        Err(CancelUnsupported)
    }

    pub fn is_cancelled(&self) -> bool {
        false
    }

    /// One dispatch attempt. Every recoverable outcome lands in the inbox;
    /// only an inactive node surfaces directly.
    fn dispatch(&mut self) -> Result<(), InvocationError> {
        if !self.engine.is_active() {
            return Err(InvocationError::NodeInactive);
        }
        self.invoke_count += 1;
        let sink = self.inbox.sink();
        let this_address = self.engine.this_address();

        let Some(target) = self.target.resolve(&self.engine) else {
            // only partition targets can fail to resolve
            if let InvocationTarget::Partition {
                partition_id,
                replica_index,
            } = self.target
            {
                sink.notify_failure(RetryableError::WrongTarget {
                    partition_id,
                    replica_index,
                });
            }
            return Ok(());
        };

        if !self.op.is_join_operation() && self.engine.cluster().get_member(target).is_none() {
            sink.notify_failure(RetryableError::TargetNotMember { target });
            return Ok(());
        }

        let header = CallHeader {
            service_name: self.service_name.clone(),
            partition_id: self.target.partition_id(),
            replica_index: self.target.replica_index(),
            caller: this_address,
            call_id: CallId::UNSET,
            invocation_time: self.engine.cluster_time(),
            call_timeout: self.call_timeout,
        };

        if target == this_address {
            // local runs answer through the sink; no call-id slot is taken
            self.registered = None;
            self.engine.operations().run_local(
                Envelope {
                    header,
                    op: self.op.clone(),
                },
                sink,
            );
        } else {
            let call = self.engine.registry().register(sink.clone());
            let mut header = header;
            header.call_id = call.call_id();
            let envelope = Envelope {
                header,
                op: self.op.clone(),
            };
            if self.engine.operations().send(&envelope, target) {
                // replacing the guard reclaims the previous attempt's slot
                self.registered = Some(call);
            } else {
                // no response can arrive for an unsent packet
                drop(call);
                self.registered = None;
                sink.notify_failure(RetryableError::SendFailed { target });
            }
        }
        Ok(())
    }

    async fn poll_terminal(
        &mut self,
        mut budget: TimeBudget,
    ) -> Result<Option<Bytes>, InvocationError> {
        if let Some(terminal) = &self.terminal {
            return terminal.clone();
        }

        let call_timeout_millis =
            u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX);
        let max_per_poll = call_timeout_millis.checked_mul(2).unwrap_or(u64::MAX);
        let long_polling = budget.millis() > max_per_poll;
        let mut poll_count: u64 = 0;

        loop {
            let poll_timeout = budget.millis().min(max_per_poll);
            let started = Instant::now();

            let outcome = self.await_response(poll_timeout).await;
            if matches!(outcome, PollOutcome::Interrupted) {
                // a waiter wakeup must never desynchronize the call/response
                // pairing; it only escapes once the node is inactive
                trace!(invocation = %self, "interrupted while waiting for a response");
                if !self.engine.is_active() {
                    return Err(InvocationError::NodeInactive);
                }
                continue;
            }
            budget.decrement(started.elapsed());
            poll_count += 1;

            match outcome {
                PollOutcome::Interrupted => unreachable!("handled above"),
                PollOutcome::Response(InvocationResponse::Failure(
                    OperationFailure::Retryable(err),
                )) => {
                    let attempts = self.invoke_count;
                    if attempts < self.try_count && budget.has_remaining() {
                        tokio::time::sleep(self.try_pause).await;
                        budget.decrement(self.try_pause);
                        if attempts > 5 && attempts % 10 == 0 {
                            warn!(invocation = %self, %err, "still invoking");
                        }
                        counter!(INVOCATION_RETRIES).increment(1);
                        self.dispatch()?;
                    } else {
                        return self.terminate(Err(InvocationError::Execution(
                            ExecutionError::retries_exhausted(attempts, err),
                        )));
                    }
                }
                PollOutcome::Response(InvocationResponse::Null) => {
                    return self.terminate(Ok(None));
                }
                PollOutcome::Response(InvocationResponse::Value(value)) => {
                    return self.terminate(Ok(Some(value)));
                }
                PollOutcome::Response(InvocationResponse::Failure(failure)) => {
                    let err = self.classify_failure(failure);
                    return self.terminate(Err(err));
                }
                PollOutcome::TimedOut => {
                    if !budget.has_remaining() {
                        return Err(InvocationError::Timeout);
                    }
                    if !long_polling {
                        continue;
                    }

                    let target = self.target.resolve(&self.engine);
                    if target == Some(self.engine.this_address()) {
                        // the partition migrated home mid-call; the local
                        // runner will answer the retried dispatch
                        continue;
                    }
                    warn!(
                        invocation = %self,
                        poll_timeout_millis = poll_timeout,
                        "no response yet"
                    );

                    let call_id = self
                        .registered
                        .as_ref()
                        .map(RegisteredCall::call_id)
                        .unwrap_or(CallId::UNSET);
                    let executing = match target {
                        Some(target) => {
                            liveness::is_operation_executing(
                                &self.engine,
                                &self.service_name,
                                target,
                                call_id,
                            )
                            .await
                        }
                        None => false,
                    };
                    if !executing {
                        // the real response might have arrived between the
                        // poll expiry and the probe verdict
                        if let Some(response) = self.inbox.try_recv() {
                            return self.finish_raced(response);
                        }
                        counter!(INVOCATION_OPERATION_TIMEOUTS).increment(1);
                        return self.terminate(Err(InvocationError::OperationTimeout {
                            waited_millis: poll_timeout.saturating_mul(poll_count),
                        }));
                    }
                }
            }
        }
    }

    async fn await_response(&mut self, poll_timeout_millis: u64) -> PollOutcome {
        let Self { engine, inbox, .. } = self;
        tokio::select! {
            response = inbox.recv(poll_timeout_millis) => match response {
                Some(response) => PollOutcome::Response(response),
                None => PollOutcome::TimedOut,
            },
            _ = engine.interrupted() => PollOutcome::Interrupted,
        }
    }

    /// Terminal classification of a response that won the race against a
    /// negative liveness verdict.
    fn finish_raced(
        &mut self,
        response: InvocationResponse,
    ) -> Result<Option<Bytes>, InvocationError> {
        match response {
            InvocationResponse::Value(value) => self.terminate(Ok(Some(value))),
            InvocationResponse::Null => self.terminate(Ok(None)),
            InvocationResponse::Failure(failure) => {
                let err = self.classify_failure(failure);
                self.terminate(Err(err))
            }
        }
    }

    /// Non-retryable failure classification: pre-wrapped execution failures
    /// pass through untouched, anything else is wrapped exactly once. A
    /// retryable failure landing here has exhausted its budget.
    fn classify_failure(&self, failure: OperationFailure) -> InvocationError {
        match failure {
            OperationFailure::Retryable(err) => {
                InvocationError::Execution(ExecutionError::retries_exhausted(self.invoke_count, err))
            }
            OperationFailure::NodeInactive => InvocationError::NodeInactive,
            OperationFailure::Execution(err) => InvocationError::Execution(err),
            OperationFailure::Other(message) => {
                InvocationError::Execution(ExecutionError::new(message))
            }
        }
    }

    fn terminate(
        &mut self,
        outcome: Result<Option<Bytes>, InvocationError>,
    ) -> Result<Option<Bytes>, InvocationError> {
        self.done = true;
        // reclaim the registry slot of an abandoned remote attempt
        self.registered = None;
        self.terminal = Some(outcome.clone());
        outcome
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invocation{{service_name={}, op={:?}, target={:?}, invoke_count={}, try_count={}, call_timeout={:?}}}",
            self.service_name,
            self.op,
            self.target,
            self.invoke_count,
            self.try_count,
            self.call_timeout
        )
    }
}

/// Builder for both invocation shapes; defaults come from the engine's
/// [`InvocationOptions`](gridstone_types::config::InvocationOptions).
pub struct InvocationBuilder {
    engine: NodeEngine,
    service_name: String,
    op: Arc<dyn Operation>,
    target: InvocationTarget,
    try_count: u32,
    try_pause: Duration,
    call_timeout: Option<Duration>,
    parent: Option<Arc<dyn Operation>>,
}

impl InvocationBuilder {
    fn new(
        engine: NodeEngine,
        service_name: String,
        op: Arc<dyn Operation>,
        target: InvocationTarget,
    ) -> Self {
        let options = engine.options();
        let try_count = options.default_try_count;
        let try_pause = *options.default_try_pause;
        Self {
            engine,
            service_name,
            op,
            target,
            try_count,
            try_pause,
            call_timeout: None,
            parent: None,
        }
    }

    /// Maximum number of dispatch attempts.
    pub fn try_count(mut self, try_count: u32) -> Self {
        self.try_count = try_count;
        self
    }

    /// Backoff between dispatch attempts.
    pub fn try_pause(mut self, try_pause: Duration) -> Self {
        self.try_pause = try_pause;
        self
    }

    /// Per-attempt budget. Zero means "derive": the operation service
    /// default, or for wait-supporting operations their bounded wait plus a
    /// fixed network allowance.
    pub fn call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = Some(call_timeout);
        self
    }

    /// Parent operation for nested-invocation policy checks.
    pub fn parent(mut self, parent: Arc<dyn Operation>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> Invocation {
        let call_timeout = effective_call_timeout(&self.engine, self.op.as_ref(), self.call_timeout);
        Invocation {
            engine: self.engine,
            service_name: self.service_name,
            op: self.op,
            target: self.target,
            try_count: self.try_count,
            try_pause: self.try_pause,
            call_timeout,
            parent: self.parent,
            invoke_count: 0,
            done: false,
            terminal: None,
            inbox: ResponseInbox::new(),
            registered: None,
        }
    }
}

/// The allowance added on top of a wait-supporting operation's own wait
/// budget, covering the network round trip.
const WAIT_TIMEOUT_ALLOWANCE: Duration = Duration::from_secs(5);

fn effective_call_timeout(
    engine: &NodeEngine,
    op: &dyn Operation,
    requested: Option<Duration>,
) -> Duration {
    if let Some(requested) = requested {
        if !requested.is_zero() {
            return requested;
        }
    }
    let default_call_timeout = engine.operations().default_call_timeout();
    if let Some(wait_timeout) = op.wait_timeout() {
        if !wait_timeout.is_zero() && default_call_timeout > WAIT_TIMEOUT_ALLOWANCE {
            return wait_timeout + WAIT_TIMEOUT_ALLOWANCE;
        }
    }
    default_call_timeout
}

#[cfg(test)]
mod tests;
