// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod phase_engine;
pub mod reconciler;
pub mod resource;
