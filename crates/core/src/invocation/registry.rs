// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::trace;

use gridstone_types::errors::OperationFailure;
use gridstone_types::response::InvocationResponse;
use gridstone_types::CallId;

use super::ResponseSink;

/// Correlates outgoing remote calls with the futures awaiting their
/// responses, and allocates process-unique call ids.
///
/// Any thread may register, route or deregister concurrently. Routing never
/// blocks on user code; delivery is a non-blocking offer to the future's
/// inbox.
#[derive(Clone)]
pub struct CallRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    next_call_id: AtomicU64,
    in_flight: DashMap<CallId, ResponseSink>,
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                // 0 is CallId::UNSET and is never allocated.
                next_call_id: AtomicU64::new(1),
                in_flight: DashMap::default(),
            }),
        }
    }
}

impl CallRegistry {
    pub fn num_in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Allocates a fresh call id and registers `sink` under it. The returned
    /// guard deregisters on drop, so a terminated or abandoned future can
    /// never leak its slot.
    pub fn register(&self, sink: ResponseSink) -> RegisteredCall {
        let call_id = CallId::from(self.inner.next_call_id.fetch_add(1, Ordering::Relaxed));
        self.inner.in_flight.insert(call_id, sink);
        RegisteredCall {
            call_id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `response` to the future registered under `call_id` and
    /// removes the mapping. Returns false when no call is registered (late or
    /// duplicate response; dropped on the floor).
    pub fn route(&self, call_id: CallId, response: InvocationResponse) -> bool {
        match self.inner.in_flight.remove(&call_id) {
            Some((_, sink)) => {
                sink.notify(response);
                true
            }
            None => {
                trace!(%call_id, "response for an unregistered call dropped");
                false
            }
        }
    }

    /// Fails every pending call with `failure`. Called on local shutdown so
    /// no waiter stays parked on a response that can no longer arrive.
    pub fn drain(&self, failure: OperationFailure) {
        let pending: Vec<CallId> = self.inner.in_flight.iter().map(|e| *e.key()).collect();
        for call_id in pending {
            self.route(call_id, InvocationResponse::Failure(failure.clone()));
        }
    }
}

/// Owning side of one registry slot.
pub struct RegisteredCall {
    call_id: CallId,
    registry: Weak<Inner>,
}

impl RegisteredCall {
    pub fn call_id(&self) -> CallId {
        self.call_id
    }
}

impl Drop for RegisteredCall {
    fn drop(&mut self) {
        // A routed response has already removed the slot; this only reclaims
        // abandoned ones.
        if let Some(registry) = self.registry.upgrade() {
            registry.in_flight.remove(&self.call_id);
        }
    }
}
