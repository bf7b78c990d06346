// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Shared value types of the gridstone data grid: identifiers, member
//! addressing, time and deadline arithmetic, the invocation error taxonomy,
//! and configuration.

pub mod config;
pub mod errors;
mod identifiers;
mod member;
pub mod response;
pub mod time;

pub use identifiers::{CallId, PartitionId, ReplicaIndex};
pub use member::{Member, MemberAddress};
