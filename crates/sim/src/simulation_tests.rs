// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::controller::ControllerEnv;
use gantry_compute::ServiceArgs;
use gantry_core::{ExecutionEvent, Location, PayloadMap, PropertyMap, ServiceName};
use std::cell::Cell;
use std::rc::Rc;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn two_host_platform(
    b: gantry_kernel::PlatformBuilder,
) -> gantry_kernel::PlatformBuilder {
    b.host("Host1", "1Gf", 4, "16GB")
        .disk("Host1", "/disk1", "10GB", "100MBps")
        .host("Host2", "1Gf", 4, "16GB")
        .link("l1", "1GBps", "0s")
        .route("Host1", "Host2", &["l1"])
}

#[test]
fn init_parses_recognised_flags_and_forwards_the_rest() {
    let mut sim = Simulation::new();
    let leftover = sim
        .init(&args(&[
            "--gantry-commport-pool-size=123",
            "--gantry-full-log",
            "--platform-thing",
        ]))
        .unwrap();
    assert_eq!(leftover, vec!["--platform-thing".to_string()]);
}

#[test]
fn init_twice_is_an_error() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    assert!(matches!(sim.init(&[]), Err(SimError::AlreadyInitialized)));
}

#[test]
fn bad_pool_size_is_an_error() {
    let mut sim = Simulation::new();
    assert!(matches!(
        sim.init(&args(&["--gantry-commport-pool-size=banana"])),
        Err(SimError::BadFlag { .. })
    ));
}

#[test]
fn help_flag_short_circuits() {
    let mut sim = Simulation::new();
    assert!(matches!(sim.init(&args(&["--gantry-help"])), Err(SimError::HelpRequested)));
    assert!(HELP_TEXT.contains("--gantry-commport-pool-size"));
}

#[test]
fn launch_requires_init_and_platform() {
    let mut sim = Simulation::new();
    assert!(matches!(sim.launch(), Err(SimError::NotInitialized)));
    sim.init(&[]).unwrap();
    assert!(matches!(sim.launch(), Err(SimError::NoPlatform)));
    sim.instantiate_platform(|b| b).unwrap();
}

#[test]
fn platform_can_only_be_instantiated_once() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(two_host_platform).unwrap();
    assert!(matches!(
        sim.instantiate_platform(two_host_platform),
        Err(SimError::PlatformAlreadyInstantiated)
    ));
}

#[test]
fn duplicate_files_are_rejected() {
    let sim = Simulation::new();
    sim.add_file("data", 100).unwrap();
    assert!(matches!(sim.add_file("data", 200), Err(SimError::DuplicateFile(_))));
    assert_eq!(sim.file("data").unwrap().size(), 100);
    assert!(matches!(sim.file("ghost"), Err(SimError::UnknownFile(_))));
}

#[test]
fn end_to_end_sleep_job() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(two_host_platform).unwrap();
    sim.add_bare_metal_service("bm1", "Host1", &["Host1"], None, PayloadMap::new()).unwrap();

    let completed = Rc::new(Cell::new(false));
    let c2 = completed.clone();
    sim.add_controller("main", "Host2", move |env: ControllerEnv| async move {
        let jm = env.create_job_manager()?;
        let job = jm.create_compound_job("hello");
        jm.add_sleep_action(&job, "nap", 10.0)?;
        jm.submit_job(&job, &ServiceName::new("bm1"), ServiceArgs::new()).await?;
        match env.wait_for_next_event().await? {
            ExecutionEvent::CompoundJobCompleted { job, .. } => {
                assert_eq!(job.borrow().name(), "hello");
                c2.set(true);
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }
        Ok(())
    })
    .unwrap();

    sim.launch().unwrap();
    assert!(completed.get());
    assert_eq!(sim.now(), 10.0);
}

#[test]
fn submit_to_unknown_service_is_service_down() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(two_host_platform).unwrap();

    let saw = Rc::new(Cell::new(false));
    let s2 = saw.clone();
    sim.add_controller("main", "Host1", move |env: ControllerEnv| async move {
        let jm = env.create_job_manager()?;
        let job = jm.create_compound_job("j");
        jm.add_sleep_action(&job, "nap", 1.0)?;
        let err = jm
            .submit_job(&job, &ServiceName::new("nowhere"), ServiceArgs::new())
            .await
            .unwrap_err();
        s2.set(matches!(err, gantry_core::FailureCause::ServiceDown { .. }));
        Ok(())
    })
    .unwrap();
    sim.launch().unwrap();
    assert!(saw.get());
}

#[test]
fn staged_files_register_everywhere() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(two_host_platform).unwrap();
    let storage = sim
        .add_storage_service("store", "Host1", &["/disk1"], &PropertyMap::new(), PayloadMap::new())
        .unwrap();
    let registry = sim
        .add_file_registry_service("registry", "Host1", PayloadMap::new())
        .unwrap();

    let file = sim.add_file("data", 1000).unwrap();
    let loc = Location::new("store", "/disk1", "/", file.clone());
    sim.stage_file(&loc).unwrap();

    assert!(storage.has_file(&loc));
    assert_eq!(registry.locations_of(file.id()), vec![loc]);
}

#[test]
fn timer_events_arrive_at_their_date() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(two_host_platform).unwrap();

    let fired = Rc::new(Cell::new(0.0));
    let f2 = fired.clone();
    sim.add_controller("main", "Host1", move |env: ControllerEnv| async move {
        env.set_timer(25.0, "checkpoint");
        match env.wait_for_next_event().await? {
            ExecutionEvent::Timer { message, date } => {
                assert_eq!(message, "checkpoint");
                assert_eq!(date, 25.0);
                f2.set(env.now());
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }
        Ok(())
    })
    .unwrap();
    sim.launch().unwrap();
    assert_eq!(fired.get(), 25.0);
}

#[test]
fn trace_dump_reports_action_frames() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(two_host_platform).unwrap();
    sim.add_bare_metal_service("bm1", "Host1", &["Host1"], None, PayloadMap::new()).unwrap();

    let traced_job = Rc::new(std::cell::RefCell::new(None));
    let t2 = traced_job.clone();
    sim.add_controller("main", "Host2", move |env: ControllerEnv| async move {
        let jm = env.create_job_manager()?;
        let job = jm.create_compound_job("traced");
        jm.add_sleep_action(&job, "nap", 2.0)?;
        jm.submit_job(&job, &ServiceName::new("bm1"), ServiceArgs::new()).await?;
        env.wait_for_next_event().await?;
        *t2.borrow_mut() = Some(job);
        Ok(())
    })
    .unwrap();
    sim.launch().unwrap();

    let job = traced_job.borrow().clone().unwrap();
    let dump = sim.dump_jobs_json(&[job]);
    let actions = dump["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["action"], "nap");
    assert_eq!(actions[0]["state"], "completed");
    assert_eq!(actions[0]["end_date"], 2.0);
}
