// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use gridstone_types::errors::OperationFailure;
use gridstone_types::response::InvocationResponse;
use gridstone_types::time::TimeBudget;

/// Per-invocation handoff from responder (local runner or network dispatch)
/// to the waiting future.
///
/// FIFO with a single consumer; in normal operation it holds at most one
/// element. Multiple writes are tolerated, later ones observed only if the
/// consumer re-polls during long-poll probing.
#[derive(Debug)]
pub struct ResponseInbox {
    // Holding our own sender keeps the channel open for late sinks.
    tx: mpsc::UnboundedSender<InvocationResponse>,
    rx: mpsc::UnboundedReceiver<InvocationResponse>,
}

impl Default for ResponseInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseInbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A producer half for responders. Cheap to clone.
    pub fn sink(&self) -> ResponseSink {
        ResponseSink {
            tx: self.tx.clone(),
        }
    }

    /// Awaits the next response for up to `timeout_millis`. The infinite
    /// budget waits without a timer.
    pub(crate) async fn recv(&mut self, timeout_millis: u64) -> Option<InvocationResponse> {
        if timeout_millis == TimeBudget::INFINITE.millis() {
            return self.recv_next().await;
        }
        tokio::time::timeout(Duration::from_millis(timeout_millis), self.recv_next())
            .await
            .unwrap_or(None)
    }

    /// Non-blocking poll, used to cover the window between a liveness-probe
    /// verdict and the real response.
    pub fn try_recv(&mut self) -> Option<InvocationResponse> {
        self.rx.try_recv().ok()
    }

    async fn recv_next(&mut self) -> Option<InvocationResponse> {
        // The inbox holds its own sender, so the channel can never close
        // while we are alive.
        self.rx.recv().await
    }
}

/// Cloneable producer half handed to responders. Delivery is a non-blocking
/// offer; a sink outliving its inbox is a no-op.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    tx: mpsc::UnboundedSender<InvocationResponse>,
}

impl ResponseSink {
    pub fn notify(&self, response: InvocationResponse) {
        let _ = self.tx.send(response);
    }

    /// Responder-side value delivery; a missing value becomes the explicit
    /// null sentinel so "returned null" stays distinct from "nothing yet".
    pub fn notify_value(&self, value: Option<Bytes>) {
        self.notify(InvocationResponse::from_value(value));
    }

    pub fn notify_failure(&self, failure: impl Into<OperationFailure>) {
        self.notify(InvocationResponse::Failure(failure.into()));
    }
}
