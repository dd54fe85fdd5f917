// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::client;
use crate::simple::SimpleStorageService;
use crate::StorageError;
use gantry_core::{
    FailureCause, File, HostName, Location, PayloadMap, PropertyMap, ServiceProperty,
};
use gantry_kernel::{Kernel, KernelConfig, KernelError, Platform};
use std::cell::Cell;
use std::rc::Rc;

fn kernel() -> Kernel {
    let platform = Platform::builder()
        .host("Root", "1Gf", 4, "16GB")
        .host("Leaf1", "1Gf", 4, "16GB")
        .disk("Leaf1", "/d1", "10GB", "100MBps")
        .host("Leaf2", "1Gf", 4, "16GB")
        .disk("Leaf2", "/d2", "10GB", "100MBps")
        .host("Client", "1Gf", 4, "16GB")
        .link("l1", "1GBps", "100us")
        .route("Root", "Leaf1", &["l1"])
        .route("Root", "Leaf2", &["l1"])
        .route("Client", "Root", &["l1"])
        .route("Client", "Leaf1", &["l1"])
        .route("Client", "Leaf2", &["l1"])
        .build()
        .unwrap();
    Kernel::new(platform, KernelConfig::default())
}

struct Tree {
    proxy: Rc<ProxyStorageService>,
    leaf1: Rc<SimpleStorageService>,
    leaf2: Rc<SimpleStorageService>,
}

fn tree(k: &Kernel, props: PropertyMap) -> Tree {
    let leaf1 = SimpleStorageService::new(
        k,
        "leaf1",
        "Leaf1",
        &["/d1"],
        &PropertyMap::new(),
        PayloadMap::new(),
    )
    .unwrap();
    leaf1.start().unwrap();
    let leaf2 = SimpleStorageService::new(
        k,
        "leaf2",
        "Leaf2",
        &["/d2"],
        &PropertyMap::new(),
        PayloadMap::new(),
    )
    .unwrap();
    leaf2.start().unwrap();
    let proxy = ProxyStorageService::new(
        k,
        "proxy",
        "Root",
        vec![leaf1.endpoint(), leaf2.endpoint()],
        &props,
        PayloadMap::new(),
    )
    .unwrap();
    proxy.start().unwrap();
    Tree { proxy, leaf1, leaf2 }
}

#[test]
fn proxy_requires_children() {
    let k = kernel();
    assert!(matches!(
        ProxyStorageService::new(
            &k,
            "p",
            "Root",
            Vec::new(),
            &PropertyMap::new(),
            PayloadMap::new()
        ),
        Err(StorageError::NoChildren(_))
    ));
}

#[test]
fn lookup_walks_children_and_read_streams_from_holder() {
    let k = kernel();
    let t = tree(&k, PropertyMap::new());
    let file = File::new("data", 10_000_000);
    let loc = Location::new("leaf2", "/d2", "/", file.clone());
    t.leaf2.stage_file(&loc).unwrap();

    let pep = t.proxy.endpoint();
    let got = Rc::new(Cell::new(0u64));
    let g2 = got.clone();
    let loc2 = loc.clone();
    k.spawn("client", &HostName::new("Client"), false, move |ctx| async move {
        assert!(client::lookup(&ctx, &pep, &loc2).await.map_err(KernelError::from)?);
        g2.set(client::read_file(&ctx, &pep, &loc2, None).await.map_err(KernelError::from)?);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert_eq!(got.get(), 10_000_000);
}

#[test]
fn lookup_miss_reports_not_found_on_read() {
    let k = kernel();
    let t = tree(&k, PropertyMap::new());
    let file = File::new("ghost", 100);
    let loc = Location::new("leaf1", "/d1", "/", file);

    let pep = t.proxy.endpoint();
    let saw = Rc::new(Cell::new(false));
    let s2 = saw.clone();
    k.spawn("client", &HostName::new("Client"), false, move |ctx| async move {
        assert!(!client::lookup(&ctx, &pep, &loc).await.map_err(KernelError::from)?);
        let err = client::read_file(&ctx, &pep, &loc, None).await.unwrap_err();
        s2.set(matches!(err, FailureCause::FileNotFound { .. }));
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(saw.get());
}

#[test]
fn writes_route_to_the_targeted_leaf() {
    let k = kernel();
    let t = tree(&k, PropertyMap::new());
    let file = File::new("fresh", 1_000_000);
    let loc = Location::new("leaf2", "/d2", "/", file.clone());
    let ploc = ProxyLocation::new(t.proxy.name(), t.leaf2.name(), loc.clone());

    let pep = t.proxy.endpoint();
    k.spawn("client", &HostName::new("Client"), false, move |ctx| async move {
        write_through(&ctx, &pep, &ploc).await.map_err(KernelError::from)
    })
    .unwrap();
    k.run().unwrap();
    assert!(t.leaf2.has_file(&loc));
    assert!(!t.leaf1.has_file(&loc));
}

#[test]
fn delete_routes_and_invalidates_cache() {
    let k = kernel();
    let t = tree(&k, PropertyMap::new());
    let file = File::new("data", 1_000_000);
    let loc = Location::new("leaf1", "/d1", "/", file.clone());
    t.leaf1.stage_file(&loc).unwrap();
    let ploc = ProxyLocation::new(t.proxy.name(), t.leaf1.name(), loc.clone());

    let pep = t.proxy.endpoint();
    let loc2 = loc.clone();
    k.spawn("client", &HostName::new("Client"), false, move |ctx| async move {
        // warm the cache
        assert!(client::lookup(&ctx, &pep, &loc2).await.map_err(KernelError::from)?);
        delete_through(&ctx, &pep, &ploc).await.map_err(KernelError::from)?;
        // gone from the leaf and from the cache
        assert!(!client::lookup(&ctx, &pep, &loc2).await.map_err(KernelError::from)?);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(!t.leaf1.has_file(&loc));
}

#[test]
fn stale_cache_entries_are_revalidated() {
    let k = kernel();
    let props = PropertyMap::new().with(ServiceProperty::CacheMaxLifetime, "5");
    let t = tree(&k, props);
    let file = File::new("data", 100);
    let loc = Location::new("leaf1", "/d1", "/", file.clone());
    t.leaf1.stage_file(&loc).unwrap();

    let pep = t.proxy.endpoint();
    let leaf1 = t.leaf1.clone();
    let loc2 = loc.clone();
    k.spawn("client", &HostName::new("Client"), false, move |ctx| async move {
        assert!(client::lookup(&ctx, &pep, &loc2).await.map_err(KernelError::from)?);
        // Remove behind the proxy's back; the cached entry still answers
        // until its lifetime elapses.
        let leaf_ep = leaf1.endpoint();
        client::delete(&ctx, &leaf_ep, &loc2).await.map_err(KernelError::from)?;
        assert!(client::lookup(&ctx, &pep, &loc2).await.map_err(KernelError::from)?);
        ctx.sleep(6.0).await?;
        assert!(!client::lookup(&ctx, &pep, &loc2).await.map_err(KernelError::from)?);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}
