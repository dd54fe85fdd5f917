// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario: two custom actions exchanging messages through a
//! communicator.

use gantry_compute::ServiceArgs;
use gantry_core::{ExecutionEvent, PayloadMap, ServiceName};
use gantry_sim::{Communicator, ControllerEnv, Simulation};
use indexmap::IndexMap;
use std::rc::Rc;

#[test]
fn paired_actions_exchange_and_complete() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(|b| {
        b.host("Host1", "1Gf", 4, "16GB")
            .host("Host2", "1Gf", 4, "16GB")
            .host("Head", "1Gf", 2, "4GB")
            .link("l1", "125MBps", "100us")
            .route("Head", "Host1", &["l1"])
            .route("Head", "Host2", &["l1"])
            .route("Host1", "Host2", &["l1"])
    })
    .unwrap();
    sim.add_bare_metal_service("bm1", "Head", &["Host1", "Host2"], None, PayloadMap::new())
        .unwrap();

    sim.add_controller("main", "Head", move |env: ControllerEnv| async move {
        let jm = env.create_job_manager()?;
        let job = jm.create_compound_job("exchange");
        let comm = Communicator::new("pair", 2);
        for name in ["left", "right"] {
            let comm = comm.clone();
            jm.add_custom_action(
                &job,
                name,
                Rc::new(move |exec_env: gantry_compute::ExecutorEnv| {
                    let comm = comm.clone();
                    Box::pin(async move {
                        let ctx = &exec_env.ctx;
                        let rank = comm.join(ctx)?;
                        comm.barrier(ctx, rank).await?;
                        let peer = 1 - rank;
                        let mut sends = IndexMap::new();
                        sends.insert(peer, 1000u64);
                        let got = comm.send_and_receive(ctx, rank, &sends, 1).await?;
                        assert_eq!(got.len(), 1);
                        Ok(())
                    })
                }),
            )?;
        }
        // One action per host so the exchange crosses the wire.
        let args = ServiceArgs::from_pairs([("left", "Host1"), ("right", "Host2")]);
        jm.submit_job(&job, &ServiceName::new("bm1"), args).await?;

        match env.wait_for_next_event().await? {
            ExecutionEvent::CompoundJobCompleted { job, .. } => {
                assert_eq!(job.borrow().state(), gantry_core::JobState::Completed);
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }
        Ok(())
    })
    .unwrap();
    sim.launch().unwrap();

    // Message exchange is bounded by the payload transfer plus a few
    // latencies (the barrier-release hop included).
    let transfer = 1000.0 / 125e6 + 1e-4;
    assert!(sim.now() >= transfer, "at least one transfer: {}", sim.now());
    assert!(sim.now() <= 2.0 * transfer + 5e-4, "bounded by two: {}", sim.now());
}
