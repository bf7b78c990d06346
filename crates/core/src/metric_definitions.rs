// Copyright (c) 2023 - 2025 Gridstone Software, Inc., Gridstone GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use metrics::{describe_counter, Unit};

pub const INVOCATION_STARTED: &str = "gridstone.invocation.started.total";
pub const INVOCATION_RETRIES: &str = "gridstone.invocation.retries.total";
pub const INVOCATION_LIVENESS_PROBES: &str = "gridstone.invocation.liveness_probes.total";
pub const INVOCATION_OPERATION_TIMEOUTS: &str = "gridstone.invocation.operation_timeouts.total";

pub fn describe_metrics() {
    describe_counter!(
        INVOCATION_STARTED,
        Unit::Count,
        "Number of invocations dispatched"
    );
    describe_counter!(
        INVOCATION_RETRIES,
        Unit::Count,
        "Number of re-dispatches after a recoverable failure"
    );
    describe_counter!(
        INVOCATION_LIVENESS_PROBES,
        Unit::Count,
        "Number of is-executing probes issued while long-polling"
    );
    describe_counter!(
        INVOCATION_OPERATION_TIMEOUTS,
        Unit::Count,
        "Number of invocations abandoned after a negative liveness probe"
    );
}
