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

use bytes::{Buf, BufMut, Bytes, BytesMut};
use metrics::counter;
use tracing::warn;

use gridstone_types::{CallId, MemberAddress};

use crate::metric_definitions::INVOCATION_LIVENESS_PROBES;
use crate::operation::{CodecError, Operation};
use crate::NodeEngine;

use super::{Invocation, ResponseSink};

/// Asks a remote member whether a call id is still being executed there.
///
/// Wire payload: the probed call id as one big-endian u64. The probe answers
/// through its response sink directly rather than through an implicit
/// operation response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsStillExecuting {
    call_id: CallId,
}

impl IsStillExecuting {
    pub fn new(call_id: CallId) -> Self {
        Self { call_id }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn decode_payload(mut buf: impl Buf) -> Result<Self, CodecError> {
        if buf.remaining() < 8 {
            return Err(CodecError::Truncated {
                expected: 8,
                got: buf.remaining(),
            });
        }
        Ok(Self {
            call_id: CallId::from(buf.get_u64()),
        })
    }

    /// Responder entry point: reports whether the probed call is still being
    /// executed on this member.
    pub fn run(&self, engine: &NodeEngine, caller: MemberAddress, sink: &ResponseSink) {
        let executing = engine.operations().is_operation_executing(caller, self.call_id);
        sink.notify_value(Some(encode_bool(executing)));
    }
}

impl Operation for IsStillExecuting {
    fn encode_payload(&self, buf: &mut BytesMut) {
        buf.put_u64(self.call_id.into());
    }
}

pub fn encode_bool(value: bool) -> Bytes {
    Bytes::from_static(if value { &[1] } else { &[0] })
}

pub fn decode_bool(mut buf: impl Buf) -> Result<bool, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated {
            expected: 1,
            got: 0,
        });
    }
    Ok(buf.get_u8() != 0)
}

/// Probes `target` for the execution state of `call_id`.
///
/// The probe is a nested fixed-target invocation with no retries and a short
/// budget of its own. Any failure reads as "not executing".
pub(super) async fn is_operation_executing(
    engine: &NodeEngine,
    service_name: &str,
    target: MemberAddress,
    call_id: CallId,
) -> bool {
    counter!(INVOCATION_LIVENESS_PROBES).increment(1);
    let probe_timeout: Duration = *engine.options().liveness_probe_timeout;
    let mut probe = Invocation::on_member(
        engine.clone(),
        service_name,
        Arc::new(IsStillExecuting::new(call_id)),
        target,
    )
    .try_count(0)
    .try_pause(Duration::ZERO)
    .call_timeout(probe_timeout)
    .build();

    warn!(%target, %call_id, "asking whether operation execution has started");
    let executing = match probe.invoke() {
        Ok(()) => match Box::pin(probe.get_with_timeout(probe_timeout)).await {
            Ok(Some(payload)) => decode_bool(payload).unwrap_or_else(|err| {
                warn!(%target, %call_id, %err, "undecodable is-executing response");
                false
            }),
            Ok(None) => false,
            Err(err) => {
                warn!(%target, %call_id, %err, "is-executing probe failed");
                false
            }
        },
        Err(err) => {
            warn!(%target, %call_id, %err, "is-executing probe could not be dispatched");
            false
        }
    };
    warn!(%target, %call_id, executing, "is-executing probe answered");
    executing
}
