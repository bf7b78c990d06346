// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Failure taxonomy of the invocation core.
//!
//! Everything here is `Clone` so a terminal outcome can be memoized by the
//! invocation future and replayed on repeated `get` calls.

use std::borrow::Cow;

use crate::{MemberAddress, PartitionId, ReplicaIndex};

/// Failure categories whose contract is "dispatch again; may succeed".
///
/// The retry loop consumes these up to the invocation's try budget; they
/// never escape a live invocation while budget remains.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryableError {
    /// Partition resolution produced no owner, or the responder was not the
    /// owner it was believed to be.
    #[error("no owner for partition {partition_id} at replica {replica_index}")]
    WrongTarget {
        partition_id: PartitionId,
        replica_index: ReplicaIndex,
    },
    #[error("target {target} is not a member of the cluster")]
    TargetNotMember { target: MemberAddress },
    #[error("packet for {target} could not be sent")]
    SendFailed { target: MemberAddress },
    /// Transient transport or responder-side failure.
    #[error("{0}")]
    Io(Cow<'static, str>),
}

impl RetryableError {
    pub fn io(message: impl Into<Cow<'static, str>>) -> Self {
        RetryableError::Io(message.into())
    }
}

/// Failure payload of one dispatch attempt, as delivered through the
/// response inbox.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationFailure {
    #[error(transparent)]
    Retryable(#[from] RetryableError),
    #[error("grid member is not active")]
    NodeInactive,
    /// Already wrapped by a responder; surfaced as-is, never re-wrapped.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// Any other responder-side failure; wrapped into an execution failure
    /// exactly once when surfaced to the caller.
    #[error("{0}")]
    Other(Cow<'static, str>),
}

impl OperationFailure {
    pub fn other(message: impl Into<Cow<'static, str>>) -> Self {
        OperationFailure::Other(message.into())
    }
}

/// A failure raised by the operation itself (or by exhausting the retry
/// budget), carrying its cause when one is known.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutionError {
    message: Cow<'static, str>,
    #[source]
    cause: Option<RetryableError>,
}

impl ExecutionError {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn retries_exhausted(attempts: u32, cause: RetryableError) -> Self {
        Self {
            message: format!("invocation failed after {attempts} attempts: {cause}").into(),
            cause: Some(cause),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&RetryableError> {
        self.cause.as_ref()
    }
}

/// Terminal failure surfaced to the caller of `get`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error("grid member is not active")]
    NodeInactive,
    /// The caller-supplied deadline expired before a terminal outcome. The
    /// invocation itself may still complete; `get` can be called again.
    #[error("no response within the caller deadline")]
    Timeout,
    /// The liveness probe confirmed the remote is no longer executing the
    /// call and no response arrived.
    #[error("no response for {waited_millis} ms, aborting invocation")]
    OperationTimeout { waited_millis: u64 },
    /// Rejected by the nested-invocation policy.
    #[error("invocation is not allowed: {reason}")]
    NotAllowed { reason: Cow<'static, str> },
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Raised by `cancel`: rescinding work already accepted by a remote member
/// is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invocation cancellation is not supported")]
pub struct CancelUnsupported;
