// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::service::ExecutorEnv;
use gantry_core::{
    Action, ActionKind, ActionState, CompoundJob, File, JobRef, Location, ParallelModel,
    PayloadMap, PropertyMap,
};
use gantry_kernel::{Kernel, KernelConfig, Platform};
use gantry_storage::SimpleStorageService;
use std::rc::Rc;

fn kernel() -> Kernel {
    let platform = Platform::builder()
        .host("Host1", "1Gf", 4, "16GB")
        .disk("Host1", "/disk1", "10GB", "100MBps")
        .host("Host2", "1Gf", 4, "16GB")
        .link("l1", "1GBps", "100us")
        .route("Host1", "Host2", &["l1"])
        .build()
        .unwrap();
    Kernel::new(platform, KernelConfig::default())
}

fn one_action_job(action: Action) -> (JobRef, usize) {
    let job = CompoundJob::new("j");
    let index = job.borrow_mut().add_action(action).unwrap();
    job.borrow_mut().mark_submitted(0.0).unwrap();
    (job, index)
}

fn spec(
    job: &JobRef,
    index: usize,
    notify: gantry_kernel::Commport,
    storage: StorageResolver,
) -> ExecutorSpec {
    ExecutorSpec {
        service: gantry_core::ServiceName::new("svc"),
        job: job.clone(),
        action_index: index,
        host: gantry_core::HostName::new("Host1"),
        physical_host: gantry_core::HostName::new("Host1"),
        cores: 2,
        ram: 0,
        custom: None,
        storage,
        registries: Rc::new(|_| None),
        scratch: None,
        notify,
    }
}

#[test]
fn sleep_action_runs_to_completion() {
    let k = kernel();
    let host = gantry_core::HostName::new("Host1");
    let notify = k.create_commport("notify", &host).unwrap();
    let (job, index) =
        one_action_job(Action::new("nap", ActionKind::Sleep { duration: 7.5 }));
    job.borrow_mut().promote_ready(0.0);
    let s = spec(&job, index, notify.clone(), Rc::new(|_| None));
    let job2 = job.clone();
    k.spawn("driver", &host, false, move |ctx| async move {
        spawn_executor(&ctx, s)?;
        let done = ctx.expect::<ActionExecutorDone>(&notify).await?;
        assert_eq!(done.action_index, index);
        assert_eq!(job2.borrow().action(index).state(), ActionState::Completed);
        assert_eq!(job2.borrow().action(index).end_date(), Some(7.5));
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}

#[test]
fn compute_uses_model_and_reserved_cores() {
    let k = kernel();
    let host = gantry_core::HostName::new("Host1");
    let notify = k.create_commport("notify", &host).unwrap();
    // 4e9 flops on 2 cores at 1 Gf/s, perfect scaling: 2 s
    let (job, index) = one_action_job(
        Action::new(
            "crunch",
            ActionKind::Compute { flops: 4e9, model: ParallelModel::PERFECT },
        )
        .with_resources(1, 2, 0),
    );
    job.borrow_mut().promote_ready(0.0);
    let s = spec(&job, index, notify.clone(), Rc::new(|_| None));
    k.spawn("driver", &host, false, move |ctx| async move {
        spawn_executor(&ctx, s)?;
        ctx.expect::<ActionExecutorDone>(&notify).await?;
        assert_eq!(ctx.now(), 2.0);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}

#[test]
fn thread_overhead_is_charged_before_start() {
    let k = kernel();
    let host = gantry_core::HostName::new("Host1");
    let notify = k.create_commport("notify", &host).unwrap();
    let (job, index) = one_action_job(
        Action::new("nap", ActionKind::Sleep { duration: 1.0 }).with_thread_overhead(0.25),
    );
    job.borrow_mut().promote_ready(0.0);
    let s = spec(&job, index, notify.clone(), Rc::new(|_| None));
    let job2 = job.clone();
    k.spawn("driver", &host, false, move |ctx| async move {
        spawn_executor(&ctx, s)?;
        ctx.expect::<ActionExecutorDone>(&notify).await?;
        assert_eq!(job2.borrow().action(index).start_date(), Some(0.25));
        assert_eq!(ctx.now(), 1.25);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}

#[test]
fn file_read_goes_through_storage() {
    let k = kernel();
    let storage = SimpleStorageService::new(
        &k,
        "store",
        "Host1",
        &["/disk1"],
        &PropertyMap::new(),
        PayloadMap::new(),
    )
    .unwrap();
    storage.start().unwrap();
    let file = File::new("data", 100_000_000); // 1 s at 100 MBps
    let loc = Location::new("store", "/disk1", "/", file);
    storage.stage_file(&loc).unwrap();

    let host = gantry_core::HostName::new("Host2");
    let notify = k.create_commport("notify", &host).unwrap();
    let (job, index) = one_action_job(Action::new(
        "stage-in",
        ActionKind::FileRead { location: loc, num_bytes: None },
    ));
    job.borrow_mut().promote_ready(0.0);
    let ep = storage.endpoint();
    let resolver: StorageResolver =
        Rc::new(move |name| (name.as_str() == "store").then(|| ep.clone()));
    let mut s = spec(&job, index, notify.clone(), resolver);
    s.host = host.clone();
    s.physical_host = host.clone();
    let job2 = job.clone();
    k.spawn("driver", &host, false, move |ctx| async move {
        spawn_executor(&ctx, s)?;
        ctx.expect::<ActionExecutorDone>(&notify).await?;
        assert_eq!(job2.borrow().action(index).state(), ActionState::Completed);
        assert!(ctx.now() >= 1.0, "disk time charged, got {}", ctx.now());
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}

#[test]
fn unknown_storage_service_fails_the_action() {
    let k = kernel();
    let host = gantry_core::HostName::new("Host1");
    let notify = k.create_commport("notify", &host).unwrap();
    let file = File::new("data", 10);
    let loc = Location::at_root("ghost-store", file);
    let (job, index) = one_action_job(Action::new(
        "stage-in",
        ActionKind::FileRead { location: loc, num_bytes: None },
    ));
    job.borrow_mut().promote_ready(0.0);
    let s = spec(&job, index, notify.clone(), Rc::new(|_| None));
    let job2 = job.clone();
    k.spawn("driver", &host, false, move |ctx| async move {
        spawn_executor(&ctx, s)?;
        ctx.expect::<ActionExecutorDone>(&notify).await?;
        let job = job2.borrow();
        assert_eq!(job.action(index).state(), ActionState::Failed);
        assert!(matches!(
            job.action(index).failure(),
            Some(gantry_core::FailureCause::ServiceDown { .. })
        ));
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}

#[test]
fn scratch_without_scratch_space_fails() {
    let k = kernel();
    let host = gantry_core::HostName::new("Host1");
    let notify = k.create_commport("notify", &host).unwrap();
    let file = File::new("tmp", 10);
    let (job, index) = one_action_job(Action::new(
        "stage",
        ActionKind::FileWrite { location: Location::scratch(file) },
    ));
    job.borrow_mut().promote_ready(0.0);
    let s = spec(&job, index, notify.clone(), Rc::new(|_| None));
    let job2 = job.clone();
    k.spawn("driver", &host, false, move |ctx| async move {
        spawn_executor(&ctx, s)?;
        ctx.expect::<ActionExecutorDone>(&notify).await?;
        assert!(matches!(
            job2.borrow().action(index).failure(),
            Some(gantry_core::FailureCause::NoScratchSpace { .. })
        ));
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}

#[test]
fn custom_action_runs_the_attached_closure() {
    let k = kernel();
    let host = gantry_core::HostName::new("Host1");
    let notify = k.create_commport("notify", &host).unwrap();
    let (job, index) = one_action_job(Action::new("user-logic", ActionKind::Custom));
    job.borrow_mut().promote_ready(0.0);
    let mut s = spec(&job, index, notify.clone(), Rc::new(|_| None));
    s.custom = Some(Rc::new(|env: ExecutorEnv| {
        Box::pin(async move {
            assert_eq!(env.hostname.as_str(), "Host1");
            env.ctx.sleep(3.0).await.map_err(gantry_core::FailureCause::from)
        })
    }));
    k.spawn("driver", &host, false, move |ctx| async move {
        spawn_executor(&ctx, s)?;
        ctx.expect::<ActionExecutorDone>(&notify).await?;
        assert_eq!(ctx.now(), 3.0);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}

#[test]
fn custom_action_without_work_is_fatal_to_the_action() {
    let k = kernel();
    let host = gantry_core::HostName::new("Host1");
    let notify = k.create_commport("notify", &host).unwrap();
    let (job, index) = one_action_job(Action::new("user-logic", ActionKind::Custom));
    job.borrow_mut().promote_ready(0.0);
    let s = spec(&job, index, notify.clone(), Rc::new(|_| None));
    let job2 = job.clone();
    k.spawn("driver", &host, false, move |ctx| async move {
        spawn_executor(&ctx, s)?;
        ctx.expect::<ActionExecutorDone>(&notify).await?;
        assert_eq!(job2.borrow().action(index).state(), ActionState::Failed);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}
