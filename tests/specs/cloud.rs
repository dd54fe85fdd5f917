// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: first-fit VM placement exhausts the pool.

use gantry_compute::cloud;
use gantry_core::{FailureCause, PayloadMap, PropertyMap};
use gantry_sim::{ControllerEnv, Simulation};
use std::cell::Cell;
use std::rc::Rc;

#[test]
fn second_vm_start_exhausts_the_pool() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(|b| {
        b.host("Gateway", "1Gf", 2, "4GB")
            .host("HostA", "1Gf", 4, "10B")
            .host("HostB", "1Gf", 2, "20B")
            .link("l1", "1GBps", "0s")
            .route("Gateway", "HostA", &["l1"])
            .route("Gateway", "HostB", &["l1"])
    })
    .unwrap();
    let svc = sim
        .add_cloud_service(
            "cloud1",
            "Gateway",
            &["HostA", "HostB"],
            &PropertyMap::new(),
            PayloadMap::new(),
        )
        .unwrap();
    let ep = svc.endpoint();

    let outcome = Rc::new(Cell::new(false));
    let o2 = outcome.clone();
    sim.add_controller("main", "Gateway", move |env: ControllerEnv| async move {
        let ctx = env.ctx();
        let vm1 = cloud::create_vm(ctx, &ep, 2, 1, None).await?;
        let vm2 = cloud::create_vm(ctx, &ep, 3, 1, None).await?;
        cloud::start_vm(ctx, &ep, &vm1).await?;
        let err = cloud::start_vm(ctx, &ep, &vm2).await.unwrap_err();
        o2.set(matches!(err, FailureCause::NotEnoughComputeResources { .. }));
        Ok(())
    })
    .unwrap();
    sim.launch().unwrap();
    assert!(outcome.get());
}
