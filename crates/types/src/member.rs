// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::net::{IpAddr, SocketAddr};

use crate::time::MillisSinceEpoch;

/// Network identity of a cluster member. Two members are the same member iff
/// their addresses are equal; a restarted process that rebinds the same
/// address is considered the same member by this core.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
    derive_more::FromStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct MemberAddress(SocketAddr);

impl MemberAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

/// A member of the cluster as recorded in the local membership view.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Member {
    address: MemberAddress,
    joined_at: MillisSinceEpoch,
}

impl Member {
    pub fn new(address: MemberAddress, joined_at: MillisSinceEpoch) -> Self {
        Self { address, joined_at }
    }

    pub fn address(&self) -> MemberAddress {
        self.address
    }

    pub fn joined_at(&self) -> MillisSinceEpoch {
        self.joined_at
    }
}
