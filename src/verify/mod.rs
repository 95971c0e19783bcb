// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Convergence observation: bounded polling, observers and load generation.

pub mod observer;
pub mod poll;
pub mod traffic;

pub use observer::{
    file_contains, find_in_log, wait_for_deletion, wait_for_learning_convergence, wait_for_status, AttackTimeline,
    FileLogSource, LogSource, PodLogSource, Wait,
};
pub use poll::{poll, PollError};
pub use traffic::{HttpTrafficGenerator, TrafficGenerator, TrafficStats};
