// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gantry-kernel: cooperative actor runtime over a discrete-event clock

pub mod actor;
pub mod alarm;
pub mod commport;
pub mod error;
pub mod platform;
pub mod sim;

pub use actor::ActorId;
pub use alarm::Alarm;
pub use commport::{AnyMessage, Commport, Message};
pub use error::KernelError;
pub use platform::{
    Disk, Host, Link, Platform, PlatformBuilder, PlatformError, DEFAULT_BANDWIDTH_FACTOR,
};
pub use sim::{Kernel, KernelConfig, SimContext};
