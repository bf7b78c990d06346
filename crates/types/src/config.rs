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

use serde::{Deserialize, Serialize};

/// # Invocation options
///
/// Defaults applied to invocations that do not carry explicit values.
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[cfg_attr(feature = "schemars", derive(schemars::JsonSchema))]
#[cfg_attr(feature = "schemars", schemars(rename = "InvocationOptions", default))]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct InvocationOptions {
    /// # Default call timeout
    ///
    /// Per-attempt network budget applied when an invocation does not carry
    /// an explicit call timeout.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde(with = "serde_with::As::<serde_with::DisplayFromStr>")]
    #[cfg_attr(feature = "schemars", schemars(with = "String"))]
    pub default_call_timeout: humantime::Duration,

    /// # Default try count
    ///
    /// Maximum number of dispatch attempts before a recoverable failure is
    /// surfaced to the caller.
    pub default_try_count: u32,

    /// # Default try pause
    ///
    /// Backoff between dispatch attempts.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde(with = "serde_with::As::<serde_with::DisplayFromStr>")]
    #[cfg_attr(feature = "schemars", schemars(with = "String"))]
    pub default_try_pause: humantime::Duration,

    /// # Liveness probe timeout
    ///
    /// Budget of the nested is-still-executing probe issued while
    /// long-polling a silent remote.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde(with = "serde_with::As::<serde_with::DisplayFromStr>")]
    #[cfg_attr(feature = "schemars", schemars(with = "String"))]
    pub liveness_probe_timeout: humantime::Duration,
}

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_TRY_COUNT: u32 = 250;
const DEFAULT_TRY_PAUSE: Duration = Duration::from_millis(500);
const DEFAULT_LIVENESS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

impl Default for InvocationOptions {
    fn default() -> Self {
        Self {
            default_call_timeout: DEFAULT_CALL_TIMEOUT.into(),
            default_try_count: DEFAULT_TRY_COUNT,
            default_try_pause: DEFAULT_TRY_PAUSE.into(),
            liveness_probe_timeout: DEFAULT_LIVENESS_PROBE_TIMEOUT.into(),
        }
    }
}
