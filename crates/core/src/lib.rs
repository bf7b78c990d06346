// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The invocation engine of the gridstone data grid.
//!
//! Every data-plane action passes through here: an [`invocation::Invocation`]
//! resolves its target member, dispatches the operation locally or across the
//! network, collects exactly one response, and transparently retries on
//! recoverable failures while honoring the caller's deadline.

mod engine;
pub mod invocation;
mod metric_definitions;
pub mod operation;
pub mod services;

#[cfg(any(test, feature = "test-util"))]
pub mod test_env;

pub use engine::{NodeEngine, NodeEngineBuilder};
pub use metric_definitions::describe_metrics;
