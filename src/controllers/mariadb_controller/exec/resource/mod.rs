// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod common;
pub mod config_map;
pub mod deployment;
pub mod persistent_volume_claim;
pub mod role;
pub mod role_binding;
pub mod service;
pub mod service_account;
pub mod stateful_set;

pub use common::*;
pub use config_map::*;
pub use deployment::*;
pub use persistent_volume_claim::*;
pub use role::*;
pub use role_binding::*;
pub use service::*;
pub use service_account::*;
pub use stateful_set::*;
