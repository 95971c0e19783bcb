// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! DoS learning-state replication and security logging.

pub mod arbitrator;
pub mod learning;
pub mod log;

pub use arbitrator::{Arbitrator, ArbitratorAddress, ArbitratorSync, HttpArbitrator, SyncHealth};
pub use learning::{LearningConfidence, LearningState, LearningStateCache};
pub use log::{parse_kv_line, parse_log, SecurityLogRecord, SyslogSink};
