// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::client;
use crate::StorageError;
use gantry_core::{
    FailureCause, File, HostName, Location, PayloadMap, PropertyMap, ServiceProperty,
};
use gantry_kernel::{Kernel, KernelConfig, KernelError, Platform};
use std::cell::Cell;
use std::rc::Rc;

fn kernel() -> Kernel {
    let platform = Platform::builder()
        .host("Host1", "1Gf", 4, "16GB")
        .disk("Host1", "/disk1", "1GB", "100MBps")
        .host("Host2", "1Gf", 4, "16GB")
        .disk("Host2", "/disk2", "10GB", "100MBps")
        .link("l1", "5000GBps", "100us")
        .route("Host1", "Host2", &["l1"])
        .build()
        .unwrap();
    Kernel::new(platform, KernelConfig::default())
}

fn service(
    k: &Kernel,
    name: &str,
    host: &str,
    mount: &str,
    props: PropertyMap,
) -> Rc<SimpleStorageService> {
    let svc =
        SimpleStorageService::new(k, name, host, &[mount], &props, PayloadMap::new()).unwrap();
    svc.start().unwrap();
    svc
}

#[test]
fn overlapping_mounts_rejected_at_creation() {
    let k = kernel();
    let err = SimpleStorageService::new(
        &k,
        "s",
        "Host1",
        &["/disk1", "/disk1/sub"],
        &PropertyMap::new(),
        PayloadMap::new(),
    )
    .unwrap_err();
    assert!(matches!(err, StorageError::OverlappingMounts { .. }));
}

#[test]
fn unknown_mount_rejected_at_creation() {
    let k = kernel();
    let err = SimpleStorageService::new(
        &k,
        "s",
        "Host1",
        &["/nope"],
        &PropertyMap::new(),
        PayloadMap::new(),
    )
    .unwrap_err();
    assert!(matches!(err, StorageError::NoSuchDisk { .. }));
}

#[test]
fn write_lookup_delete_round_trip() {
    let k = kernel();
    let svc = service(&k, "store", "Host1", "/disk1", PropertyMap::new());
    let ep = svc.endpoint();
    let file = File::new("data", 10_000_000);
    let loc = Location::new("store", "/disk1", "/", file.clone());

    let free_after_delete = Rc::new(Cell::new(0u64));
    let fad = free_after_delete.clone();
    let loc2 = loc.clone();
    let svc2 = svc.clone();
    k.spawn("client", &HostName::new("Host2"), false, move |ctx| async move {
        client::write_file(&ctx, &ep, &loc2).await.map_err(KernelError::from)?;
        assert!(svc2.has_file(&loc2));
        assert!(client::lookup(&ctx, &ep, &loc2).await.unwrap_or(false));
        client::delete(&ctx, &ep, &loc2).await.map_err(KernelError::from)?;
        assert!(!svc2.has_file(&loc2));
        fad.set(client::free_space(&ctx, &ep, None).await.map_err(KernelError::from)?);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert_eq!(free_after_delete.get(), 1_000_000_000, "delete restores free space exactly");
}

#[test]
fn one_shot_write_costs_the_disk_time() {
    let k = kernel();
    let props = PropertyMap::new().with(ServiceProperty::BufferSize, "0");
    let svc = service(&k, "store", "Host1", "/disk1", props);
    let ep = svc.endpoint();
    let file = File::new("blob", 100_000_000); // 1 s at 100 MBps
    let loc = Location::new("store", "/disk1", "/", file);

    k.spawn("client", &HostName::new("Host2"), false, move |ctx| async move {
        client::write_file(&ctx, &ep, &loc).await.map_err(KernelError::from)?;
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    let t = k.now();
    assert!((1.0..1.01).contains(&t), "expected ~1 s, got {t}");
}

#[test]
fn read_of_missing_file_fails() {
    let k = kernel();
    let svc = service(&k, "store", "Host1", "/disk1", PropertyMap::new());
    let ep = svc.endpoint();
    let file = File::new("ghost", 1000);
    let loc = Location::new("store", "/disk1", "/", file);

    let saw = Rc::new(Cell::new(false));
    let saw2 = saw.clone();
    k.spawn("client", &HostName::new("Host2"), false, move |ctx| async move {
        let err = client::read_file(&ctx, &ep, &loc, None).await.unwrap_err();
        saw2.set(matches!(err, FailureCause::FileNotFound { .. }));
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(saw.get());
}

#[test]
fn staged_file_read_does_not_mutate_free_space() {
    let k = kernel();
    let svc = service(&k, "store", "Host1", "/disk1", PropertyMap::new());
    let ep = svc.endpoint();
    let file = File::new("data", 50_000_000);
    let loc = Location::new("store", "/disk1", "/", file);
    svc.stage_file(&loc).unwrap();
    let before = svc.free_space();

    let read_bytes = Rc::new(Cell::new(0u64));
    let rb = read_bytes.clone();
    let loc2 = loc.clone();
    k.spawn("client", &HostName::new("Host2"), false, move |ctx| async move {
        rb.set(client::read_file(&ctx, &ep, &loc2, None).await.map_err(KernelError::from)?);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert_eq!(read_bytes.get(), 50_000_000);
    assert_eq!(svc.free_space(), before);
}

#[test]
fn concurrent_write_to_same_slot_is_rejected() {
    let k = kernel();
    let svc = service(&k, "store", "Host1", "/disk1", PropertyMap::new());
    let ep = svc.endpoint();
    let file = File::new("contended", 200_000_000);
    let loc = Location::new("store", "/disk1", "/", file);

    let failures = Rc::new(Cell::new(0u32));
    for i in 0..2 {
        let ep = ep.clone();
        let loc = loc.clone();
        let failures = failures.clone();
        k.spawn(&format!("writer-{i}"), &HostName::new("Host2"), false, move |ctx| async move {
            if let Err(FailureCause::FileAlreadyBeingCopied { .. }) =
                client::write_file(&ctx, &ep, &loc).await
            {
                failures.set(failures.get() + 1);
            }
            Ok(())
        })
        .unwrap();
    }
    k.run().unwrap();
    assert_eq!(failures.get(), 1, "exactly one writer loses the slot");
    assert!(svc.has_file(&loc));
}

#[test]
fn copy_pulls_from_source_and_stores() {
    let k = kernel();
    let src_svc = service(&k, "src", "Host2", "/disk2", PropertyMap::new());
    let dst_svc = service(&k, "dst", "Host1", "/disk1", PropertyMap::new());
    let file = File::new("data", 100_000_000); // 1 s of disk at each end
    let src = Location::new("src", "/disk2", "/", file.clone());
    let dst = Location::new("dst", "/disk1", "/", file.clone());
    src_svc.stage_file(&src).unwrap();

    let src_ep = src_svc.endpoint();
    let dst_ep = dst_svc.endpoint();
    let dst2 = dst.clone();
    k.spawn("client", &HostName::new("Host2"), false, move |ctx| async move {
        client::copy_file(&ctx, &dst_ep, &src_ep, &src, &dst2).await.map_err(KernelError::from)
    })
    .unwrap();
    k.run().unwrap();
    assert!(dst_svc.has_file(&dst));
    let t = k.now();
    // read and write pipeline: ~1 s steady state plus the pipeline fill
    assert!((1.0..1.2).contains(&t), "expected ~1 s pipelined copy, got {t}");
}

#[test]
fn copy_of_missing_source_fails() {
    let k = kernel();
    let src_svc = service(&k, "src", "Host2", "/disk2", PropertyMap::new());
    let dst_svc = service(&k, "dst", "Host1", "/disk1", PropertyMap::new());
    let file = File::new("ghost", 1000);
    let src = Location::new("src", "/disk2", "/", file.clone());
    let dst = Location::new("dst", "/disk1", "/", file.clone());

    let saw = Rc::new(Cell::new(false));
    let saw2 = saw.clone();
    let src_ep = src_svc.endpoint();
    let dst_ep = dst_svc.endpoint();
    let dst2 = dst.clone();
    k.spawn("client", &HostName::new("Host1"), false, move |ctx| async move {
        let err = client::copy_file(&ctx, &dst_ep, &src_ep, &src, &dst2).await.unwrap_err();
        saw2.set(matches!(err, FailureCause::FileNotFound { .. }));
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(saw.get());
    assert!(!dst_svc.has_file(&dst));
    assert_eq!(dst_svc.free_space(), 1_000_000_000, "failed copy releases its reservation");
}

#[test]
fn dev_null_swallows_writes() {
    let k = kernel();
    let svc = SimpleStorageService::new(
        &k,
        "null",
        "Host1",
        &["/dev/null"],
        &PropertyMap::new(),
        PayloadMap::new(),
    )
    .unwrap();
    svc.start().unwrap();
    let ep = svc.endpoint();
    let file = File::new("gone", 123_456);
    let loc = Location::new("null", "/dev/null", "/", file);

    let loc2 = loc.clone();
    k.spawn("client", &HostName::new("Host2"), false, move |ctx| async move {
        client::write_file(&ctx, &ep, &loc2).await.map_err(KernelError::from)
    })
    .unwrap();
    k.run().unwrap();
    assert!(!svc.has_file(&loc), "sink retains nothing");
}
