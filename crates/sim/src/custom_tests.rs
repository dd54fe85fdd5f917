// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::controller::ControllerEnv;
use crate::simulation::Simulation;
use gantry_compute::ServiceArgs;
use gantry_core::PayloadMap;
use std::cell::Cell;
use std::rc::Rc;

/// A custom action that acts as a little controller of its own: it
/// creates a job manager, submits a nested sleep job, and waits for
/// its completion event.
#[test]
fn custom_action_can_orchestrate_nested_jobs() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(|b| {
        b.host("Host1", "1Gf", 4, "16GB")
            .host("Head", "1Gf", 2, "4GB")
            .link("l1", "1GBps", "0s")
            .route("Head", "Host1", &["l1"])
    })
    .unwrap();
    sim.add_bare_metal_service("bm1", "Head", &["Host1"], None, PayloadMap::new()).unwrap();

    let nested_done = Rc::new(Cell::new(false));
    let nd = nested_done.clone();
    sim.add_controller("main", "Head", move |env: ControllerEnv| async move {
        let jm = env.create_job_manager()?;
        let outer = jm.create_compound_job("outer");
        let registry = env.registry().clone();
        let nd = nd.clone();
        jm.add_custom_action(
            &outer,
            "orchestrate",
            Rc::new(move |exec_env: gantry_compute::ExecutorEnv| {
                let registry = registry.clone();
                let nd = nd.clone();
                Box::pin(async move {
                    let cctx = CustomContext::new(exec_env, registry)?;
                    let inner_jm = cctx.create_job_manager()?;
                    let inner = inner_jm.create_compound_job("inner");
                    inner_jm.add_sleep_action(&inner, "nap", 5.0)?;
                    inner_jm
                        .submit_job(
                            &inner,
                            &gantry_core::ServiceName::new("bm1"),
                            ServiceArgs::new(),
                        )
                        .await?;
                    match cctx.wait_for_next_event().await? {
                        gantry_core::ExecutionEvent::CompoundJobCompleted { .. } => {
                            nd.set(true);
                            Ok(())
                        }
                        other => Err(gantry_core::FailureCause::fatal(other.log_summary())),
                    }
                })
            }),
        )?;
        jm.submit_job(&outer, &gantry_core::ServiceName::new("bm1"), ServiceArgs::new())
            .await?;
        match env.wait_for_next_event().await? {
            gantry_core::ExecutionEvent::CompoundJobCompleted { job, .. } => {
                assert_eq!(job.borrow().name(), "outer");
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }
        Ok(())
    })
    .unwrap();
    sim.launch().unwrap();
    assert!(nested_done.get());
    assert_eq!(sim.now(), 5.0);
}
