// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use gridstone_types::time::MillisSinceEpoch;
use gridstone_types::{CallId, MemberAddress, PartitionId, ReplicaIndex};

/// An opaque command executed on a grid member.
///
/// The invocation core never looks at business logic; it only consults the
/// capability queries below and moves the serialized payload. Responses are
/// produced out-of-band through the response sink attached at dispatch time.
pub trait Operation: fmt::Debug + Send + Sync + 'static {
    /// Appends the wire form of the operation to `buf`.
    fn encode_payload(&self, buf: &mut BytesMut);

    /// Join operations may target members that are not yet part of the local
    /// membership view.
    fn is_join_operation(&self) -> bool {
        false
    }

    /// Bounded wait budget of a wait-supporting operation (lock acquisition,
    /// queue poll, ...). Drives the derived call timeout.
    fn wait_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Routing metadata stamped onto an operation at dispatch time.
///
/// A fresh header is produced for every dispatch attempt so that re-resolved
/// targets, new call ids and new invocation times never bleed into a previous
/// attempt's wire image.
#[derive(Debug, Clone)]
pub struct CallHeader {
    pub service_name: String,
    /// Absent for fixed-member targets, which address a member rather than a
    /// partition.
    pub partition_id: Option<PartitionId>,
    pub replica_index: ReplicaIndex,
    pub caller: MemberAddress,
    pub call_id: CallId,
    pub invocation_time: MillisSinceEpoch,
    pub call_timeout: Duration,
}

/// One dispatch attempt: the routing header plus the operation it carries.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub header: CallHeader,
    pub op: Arc<dyn Operation>,
}

impl Envelope {
    /// Serialized operation payload as it travels the wire.
    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.op.encode_payload(&mut buf);
        buf.freeze()
    }
}

/// Payload decoding failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload truncated: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}
