// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenarios: the bulk-copy timing pin and the free-space round trips.

use gantry_core::{ExecutionEvent, Location, PayloadMap, PropertyMap, ServiceProperty};
use gantry_sim::{ControllerEnv, Simulation};
use gantry_storage::client;
use std::cell::Cell;
use std::rc::Rc;

/// A fat link exists, but every route takes the slow one.
fn storage_platform(b: gantry_kernel::PlatformBuilder) -> gantry_kernel::PlatformBuilder {
    b.host("Host1", "1Gf", 4, "16GB")
        .disk("Host1", "/disk1", "1GB", "100MBps")
        .host("Host2", "1Gf", 4, "16GB")
        .disk("Host2", "/disk2", "10GB", "100MBps")
        .link("fat", "5000GBps", "0us")
        .link("slow", "0.1MBps", "10us")
        .route("Host1", "Host2", &["slow"])
}

/// A 1 MB file pulled over the 0.1 MBps route lands in ~10.87 s: the
/// wire is the bottleneck (10 s nominal, stretched by the TCP bandwidth
/// factor), with the 100 MB/s disks contributing ~0.02 s.
#[test]
fn megabyte_copy_is_network_bound() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(storage_platform).unwrap();
    let props = PropertyMap::new().with(ServiceProperty::BufferSize, "1000000");
    sim.add_storage_service("src", "Host2", &["/disk2"], &props, PayloadMap::new()).unwrap();
    let dst_svc = sim
        .add_storage_service("dst", "Host1", &["/disk1"], &props, PayloadMap::new())
        .unwrap();

    let file = sim.add_file("some_file", 1_000_000).unwrap();
    let src = Location::new("src", "/disk2", "/", file.clone());
    let dst = Location::new("dst", "/disk1", "/", file.clone());
    sim.stage_file(&src).unwrap();

    let copy_done_at = Rc::new(Cell::new(-1.0));
    let done = copy_done_at.clone();
    let dst2 = dst.clone();
    sim.add_controller("main", "Host2", move |env: ControllerEnv| async move {
        let dm = env.create_data_movement_manager();
        dm.initiate_file_copy(src.clone(), dst2.clone())?;
        match env.wait_for_next_event().await? {
            ExecutionEvent::FileCopyCompleted { dst, .. } => {
                assert_eq!(&dst, &dst2);
                done.set(env.now());
            }
            ExecutionEvent::FileCopyFailed { cause, .. } => {
                panic!("copy failed: {cause}");
            }
            other => panic!("unexpected event: {}", other.log_summary()),
        }
        Ok(())
    })
    .unwrap();
    sim.launch().unwrap();

    let t = copy_done_at.get();
    assert!((10.8..10.9).contains(&t), "network-bound copy, got {t}");
    assert!(dst_svc.has_file(&dst), "destination stores the file");
}

/// `stage; read` leaves free space untouched; `write; delete` restores
/// it exactly.
#[test]
fn free_space_round_trips() {
    let mut sim = Simulation::new();
    sim.init(&[]).unwrap();
    sim.instantiate_platform(storage_platform).unwrap();
    let svc = sim
        .add_storage_service("store", "Host1", &["/disk1"], &PropertyMap::new(), PayloadMap::new())
        .unwrap();

    let staged = sim.add_file("staged", 300_000).unwrap();
    let staged_loc = Location::new("store", "/disk1", "/", staged);
    sim.stage_file(&staged_loc).unwrap();
    let baseline = svc.free_space();

    let fresh = sim.add_file("fresh", 200_000).unwrap();
    let fresh_loc = Location::new("store", "/disk1", "/", fresh);
    let ep = svc.endpoint();
    let observed = Rc::new(Cell::new((0u64, 0u64)));
    let obs = observed.clone();
    sim.add_controller("main", "Host2", move |env: ControllerEnv| async move {
        let ctx = env.ctx();
        client::read_file(ctx, &ep, &staged_loc, None).await?;
        let after_read = client::free_space(ctx, &ep, None).await?;

        client::write_file(ctx, &ep, &fresh_loc).await?;
        client::delete(ctx, &ep, &fresh_loc).await?;
        let after_cycle = client::free_space(ctx, &ep, None).await?;
        obs.set((after_read, after_cycle));
        Ok(())
    })
    .unwrap();
    sim.launch().unwrap();

    let (after_read, after_cycle) = observed.get();
    assert_eq!(after_read, baseline, "read does not mutate free space");
    assert_eq!(after_cycle, baseline, "write+delete restores free space exactly");
}
