// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod config;
pub mod configuration;
pub mod constants;
pub mod dos;
pub mod error;
pub mod generator;
pub mod kubernetes;
pub mod reconcilers;
pub mod sync;
pub mod types;
pub mod verify;

#[cfg(test)]
mod test_utils;
