// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Helpers and proptest strategies shared by this crate's tests and by
//! other crates' tests (behind the `test-support` feature).

use crate::action::{Action, ActionKind};
use crate::file::File;
use crate::job::{CompoundJob, JobRef};

/// A job of `n` sleep actions named `a0..a{n-1}` with no dependencies.
pub fn sleep_job(name: &str, n: usize, duration: f64) -> JobRef {
    let job = CompoundJob::new(name);
    {
        let mut j = job.borrow_mut();
        for i in 0..n {
            #[allow(clippy::unwrap_used)]
            j.add_action(Action::new(format!("a{i}"), ActionKind::Sleep { duration })).unwrap();
        }
    }
    job
}

/// A file with a deterministic name.
pub fn file(name: &str, size: u64) -> File {
    File::new(name, size)
}

pub mod strategies {
    use proptest::prelude::*;

    /// File sizes up to 4 GiB, biased toward small values.
    pub fn file_size() -> impl Strategy<Value = u64> {
        prop_oneof![
            3 => 0u64..4096,
            1 => 4096u64..(1 << 32),
        ]
    }

    /// A plausible directory path with 0..4 segments.
    pub fn dir_path() -> impl Strategy<Value = String> {
        proptest::collection::vec("[a-z]{1,8}", 0..4)
            .prop_map(|segments| format!("/{}", segments.join("/")))
    }
}
