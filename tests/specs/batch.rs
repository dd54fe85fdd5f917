// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: EASY backfilling over four ten-core nodes.

use gantry_compute::ServiceArgs;
use gantry_core::{
    ExecutionEvent, PayloadMap, PropertyMap, ServiceName, ServiceProperty,
};
use gantry_sim::{ControllerEnv, Simulation};
use std::cell::RefCell;
use std::rc::Rc;

fn batch_args(n: u32, walltime_secs: f64) -> ServiceArgs {
    ServiceArgs::new()
        .set("-N", &n.to_string())
        .set("-c", "10")
        .set("-t", &(walltime_secs / 60.0).to_string())
}

#[test]
fn easy_backfilling_completion_dates() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(|b| {
        let mut b = b.host("Head", "1Gf", 2, "4GB");
        for i in 1..=4 {
            b = b
                .host(&format!("Node{i}"), "1Gf", 10, "32GB")
                .link(&format!("l{i}"), "1GBps", "0s")
                .route("Head", &format!("Node{i}"), &[&format!("l{i}")]);
        }
        b
    })
    .unwrap();
    let props = PropertyMap::new()
        .with(ServiceProperty::BatchSchedulingAlgorithm, "easy_bf")
        .with(ServiceProperty::WalltimePadding, "1");
    sim.add_batch_service(
        "batch1",
        "Head",
        &["Node1", "Node2", "Node3", "Node4"],
        &props,
        PayloadMap::new(),
    )
    .unwrap();

    let completions = Rc::new(RefCell::new(Vec::new()));
    let done = completions.clone();
    sim.add_controller("main", "Head", move |env: ControllerEnv| async move {
        let jm = env.create_job_manager()?;
        let service = ServiceName::new("batch1");
        let plan = [
            ("j1", 2u32, 60.0),
            ("j2", 4, 30.0),
            ("j3", 2, 30.0),
            ("j4", 2, 50.0),
        ];
        for (name, nodes, walltime) in plan {
            let job = jm.create_compound_job(name);
            jm.add_sleep_action(&job, "work", walltime)?;
            jm.submit_job(&job, &service, batch_args(nodes, walltime)).await?;
        }
        for _ in 0..4 {
            if let ExecutionEvent::CompoundJobCompleted { job, .. } =
                env.wait_for_next_event().await?
            {
                done.borrow_mut().push((job.borrow().name().to_string(), env.now()));
            } else {
                panic!("expected completions only");
            }
        }
        Ok(())
    })
    .unwrap();
    sim.launch().unwrap();

    let completions = completions.borrow();
    let date = |name: &str| {
        completions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| *d)
            .unwrap_or(f64::NAN)
    };
    assert!((date("j1") - 60.0).abs() < 0.01, "{completions:?}");
    assert!((date("j2") - 90.0).abs() < 0.01, "{completions:?}");
    assert!((date("j3") - 30.0).abs() < 0.01, "{completions:?}");
    assert!((date("j4") - 140.0).abs() < 0.01, "{completions:?}");
}
