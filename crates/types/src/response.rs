// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use bytes::Bytes;

use crate::errors::{OperationFailure, RetryableError};

/// Terminal outcome of one dispatch attempt, as carried by the response
/// inbox.
///
/// `Null` is an explicit sentinel: the inbox cannot otherwise distinguish
/// "the operation returned null" from "no response yet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationResponse {
    /// A non-null user value in serialized form.
    Value(Bytes),
    /// The operation completed and explicitly produced no value.
    Null,
    Failure(OperationFailure),
}

impl InvocationResponse {
    /// Responder-side value delivery; a missing value becomes the null
    /// sentinel before enqueue.
    pub fn from_value(value: Option<Bytes>) -> Self {
        match value {
            Some(bytes) => InvocationResponse::Value(bytes),
            None => InvocationResponse::Null,
        }
    }
}

impl From<OperationFailure> for InvocationResponse {
    fn from(failure: OperationFailure) -> Self {
        InvocationResponse::Failure(failure)
    }
}

impl From<RetryableError> for InvocationResponse {
    fn from(err: RetryableError) -> Self {
        InvocationResponse::Failure(OperationFailure::Retryable(err))
    }
}
