// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: a two-task job with explicit host bindings across
//! heterogeneous hosts.

use gantry_compute::ServiceArgs;
use gantry_core::{ExecutionEvent, ParallelModel, PayloadMap, ServiceName};
use gantry_sim::{ControllerEnv, Simulation};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn two_bound_tasks_across_hosts() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(|b| {
        b.host("Host1", "1f", 4, "16GB")
            .host("Host2", "1Gf", 4, "16GB")
            .host("Head", "1Gf", 2, "4GB")
            .link("l1", "1GBps", "0s")
            .route("Head", "Host1", &["l1"])
            .route("Head", "Host2", &["l1"])
            .route("Host1", "Host2", &["l1"])
    })
    .unwrap();
    let bm = sim
        .add_bare_metal_service("bm1", "Head", &["Host1", "Host2"], None, PayloadMap::new())
        .unwrap();

    let observed = Rc::new(Cell::new((0u32, 0u32, 0u32)));
    let obs = observed.clone();
    let bm2 = bm.clone();
    sim.add_controller("main", "Head", move |env: ControllerEnv| async move {
        let jm = env.create_job_manager()?;
        let job = jm.create_compound_job("two-tasks");
        jm.add_compute_action(&job, "t1", 60.0, 0, 3, 3, ParallelModel::PERFECT)?;
        jm.add_compute_action(&job, "t2", 6e10, 0, 2, 2, ParallelModel::PERFECT)?;
        let args = ServiceArgs::from_pairs([("t1", "Host1:3"), ("t2", "Host2:2")]);
        jm.submit_job(&job, &ServiceName::new("bm1"), args).await?;

        env.sleep(1.0).await?;
        let idle = bm2.idle_cores();
        obs.set((
            idle[&gantry_core::HostName::new("Host1")],
            idle[&gantry_core::HostName::new("Host2")],
            bm2.total_idle_core_count(),
        ));

        match env.wait_for_next_event().await? {
            ExecutionEvent::CompoundJobCompleted { job, .. } => {
                let j = job.borrow();
                let t1 = j.action_index("t1").unwrap();
                let t2 = j.action_index("t2").unwrap();
                assert_eq!(j.action(t1).end_date(), Some(20.0));
                assert_eq!(j.action(t2).end_date(), Some(30.0));
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }
        Ok(())
    })
    .unwrap();

    sim.launch().unwrap();
    assert_eq!(observed.get(), (1, 2, 3), "idle cores at t=1");
    assert_eq!(sim.now(), 30.0);
}
