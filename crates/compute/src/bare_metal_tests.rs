// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::service::{
    submit_job, JobDoneNotification, JobFailedNotification, JobSubmission, ServiceArgs,
};
use gantry_core::{
    Action, ActionKind, ActionState, CompoundJob, FailureCause, HostName, JobState,
    ParallelModel, PayloadMap,
};
use gantry_kernel::{Kernel, KernelConfig, KernelError, Platform};
use std::cell::Cell;
use std::rc::Rc;

fn kernel() -> Kernel {
    // Scenario platform: Host1 at 1 f/s, Host2 at 1 Gf/s, 4 cores each.
    let platform = Platform::builder()
        .host("Host1", "1f", 4, "16GB")
        .host("Host2", "1Gf", 4, "16GB")
        .host("Head", "1Gf", 2, "4GB")
        .link("l1", "1GBps", "0s")
        .route("Head", "Host1", &["l1"])
        .route("Head", "Host2", &["l1"])
        .route("Host1", "Host2", &["l1"])
        .build()
        .unwrap();
    Kernel::new(platform, KernelConfig::default())
}

fn service(k: &Kernel) -> Rc<BareMetalComputeService> {
    let svc = BareMetalComputeService::new(
        k,
        "bm1",
        "Head",
        &["Host1", "Host2"],
        Rc::new(|_| None),
        Rc::new(|_| None),
        None,
        PayloadMap::new(),
    )
    .unwrap();
    svc.start().unwrap();
    svc
}

fn compute_action(name: &str, flops: f64, min: u32, max: u32) -> Action {
    Action::new(name, ActionKind::Compute { flops, model: ParallelModel::PERFECT })
        .with_resources(min, max, 0)
}

/// Two bound tasks across heterogeneous hosts.
#[test]
fn bound_tasks_on_heterogeneous_hosts() {
    let k = kernel();
    let svc = service(&k);
    let ep = svc.endpoint();

    let job = CompoundJob::new("two-tasks");
    {
        let mut j = job.borrow_mut();
        j.add_action(compute_action("t1", 60.0, 3, 3)).unwrap();
        j.add_action(compute_action("t2", 6e10, 2, 2)).unwrap();
    }
    let args = ServiceArgs::from_pairs([("t1", "Host1:3"), ("t2", "Host2:2")]);

    let idle_at_1 = Rc::new(Cell::new((0u32, 0u32, 0u32)));
    let i2 = idle_at_1.clone();
    let svc2 = svc.clone();
    let job2 = job.clone();
    k.spawn("controller", &HostName::new("Head"), false, move |ctx| async move {
        let notify = ctx.create_commport("events")?;
        let submission =
            JobSubmission::new(job2.clone(), notify.clone()).with_args(args);
        submit_job(&ctx, &ep, submission).await.map_err(KernelError::from)?;

        ctx.sleep(1.0).await?;
        let idle = svc2.idle_cores();
        i2.set((
            idle[&HostName::new("Host1")],
            idle[&HostName::new("Host2")],
            svc2.total_idle_core_count(),
        ));

        let done = ctx.expect::<JobDoneNotification>(&notify).await?;
        assert_eq!(done.job.borrow().state(), JobState::Completed);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();

    assert_eq!(idle_at_1.get(), (1, 2, 3), "idle cores at t=1");
    let j = job.borrow();
    // t1: 60 flops on 3 cores at 1 f/s = 20 s; t2: 6e10 on 2 at 1 Gf/s = 30 s
    let t1 = j.action_index("t1").unwrap();
    let t2 = j.action_index("t2").unwrap();
    assert_eq!(j.action(t1).end_date(), Some(20.0));
    assert_eq!(j.action(t2).end_date(), Some(30.0));
    assert_eq!(svc.total_idle_core_count(), 8, "all reservations released");
}

#[test]
fn impossible_requests_are_rejected_at_submission() {
    let k = kernel();
    let svc = service(&k);
    let ep = svc.endpoint();
    let job = CompoundJob::new("too-big");
    job.borrow_mut().add_action(compute_action("huge", 1.0, 16, 16)).unwrap();

    let saw = Rc::new(Cell::new(false));
    let s2 = saw.clone();
    k.spawn("controller", &HostName::new("Head"), false, move |ctx| async move {
        let notify = ctx.create_commport("events")?;
        let err = submit_job(&ctx, &ep, JobSubmission::new(job.clone(), notify))
            .await
            .unwrap_err();
        s2.set(matches!(err, FailureCause::NotEnoughComputeResources { .. }));
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(saw.get());
}

#[test]
fn pilot_jobs_are_not_supported() {
    let k = kernel();
    let svc = service(&k);
    let ep = svc.endpoint();
    let job = CompoundJob::new("pilot");

    k.spawn("controller", &HostName::new("Head"), false, move |ctx| async move {
        let notify = ctx.create_commport("events")?;
        let mut submission = JobSubmission::new(job.clone(), notify);
        submission.pilot = true;
        let err = submit_job(&ctx, &ep, submission).await.unwrap_err();
        assert!(matches!(err, FailureCause::JobTypeNotSupported { .. }));
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}

/// A feasible action blocks at READY while the host is full, then runs.
#[test]
fn transiently_full_hosts_block_at_ready() {
    let k = kernel();
    let svc = BareMetalComputeService::new(
        &k,
        "bm-one",
        "Head",
        &["Host2"],
        Rc::new(|_| None),
        Rc::new(|_| None),
        None,
        PayloadMap::new(),
    )
    .unwrap();
    svc.start().unwrap();
    let ep = svc.endpoint();

    let job = CompoundJob::new("queue");
    {
        let mut j = job.borrow_mut();
        // Three whole-host actions on a single 4-core host: strictly
        // serial, one second each.
        j.add_action(compute_action("a", 4e9, 4, 4)).unwrap();
        j.add_action(compute_action("b", 4e9, 4, 4)).unwrap();
        j.add_action(compute_action("c", 4e9, 4, 4)).unwrap();
    }
    let job2 = job.clone();
    k.spawn("controller", &HostName::new("Head"), false, move |ctx| async move {
        let notify = ctx.create_commport("events")?;
        submit_job(&ctx, &ep, JobSubmission::new(job2.clone(), notify.clone()))
            .await
            .map_err(KernelError::from)?;
        ctx.expect::<JobDoneNotification>(&notify).await?;
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert_eq!(job.borrow().state(), JobState::Completed);
    let mut ends: Vec<f64> =
        (0..3).filter_map(|i| job.borrow().action(i).end_date()).collect();
    ends.sort_by(f64::total_cmp);
    assert_eq!(ends, vec![1.0, 2.0, 3.0]);
}

#[test]
fn action_failure_fails_dependents_and_the_job() {
    let k = kernel();
    let svc = service(&k);
    let ep = svc.endpoint();

    let job = CompoundJob::new("doomed");
    {
        let mut j = job.borrow_mut();
        let bad = j
            .add_action(Action::new(
                "bad-read",
                ActionKind::FileRead {
                    location: gantry_core::Location::at_root(
                        "ghost",
                        gantry_core::File::new("f", 10),
                    ),
                    num_bytes: None,
                },
            ))
            .unwrap();
        let child = j.add_action(compute_action("after", 1e9, 1, 1)).unwrap();
        j.add_dependency(bad, child).unwrap();
    }
    let job2 = job.clone();
    let cause = Rc::new(Cell::new(false));
    let c2 = cause.clone();
    k.spawn("controller", &HostName::new("Head"), false, move |ctx| async move {
        let notify = ctx.create_commport("events")?;
        submit_job(&ctx, &ep, JobSubmission::new(job2.clone(), notify.clone()))
            .await
            .map_err(KernelError::from)?;
        let failed = ctx.expect::<JobFailedNotification>(&notify).await?;
        c2.set(matches!(failed.cause, FailureCause::ServiceDown { .. }));
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    let j = job.borrow();
    assert_eq!(j.state(), JobState::Discontinued);
    assert_eq!(j.action(1).state(), ActionState::Failed, "dependent failed too");
    assert!(cause.get());
}

#[test]
fn overheads_delay_dispatch_and_notification() {
    let k = kernel();
    let svc = service(&k);
    let ep = svc.endpoint();

    let job = CompoundJob::new("padded");
    {
        let mut j = job.borrow_mut();
        j.add_action(Action::new("nap", ActionKind::Sleep { duration: 1.0 })).unwrap();
        j.set_overheads(2.0, 3.0);
    }
    let job2 = job.clone();
    k.spawn("controller", &HostName::new("Head"), false, move |ctx| async move {
        let notify = ctx.create_commport("events")?;
        submit_job(&ctx, &ep, JobSubmission::new(job2, notify.clone()))
            .await
            .map_err(KernelError::from)?;
        ctx.expect::<JobDoneNotification>(&notify).await?;
        // 2 s pre + 1 s sleep + 3 s post (plus negligible latency)
        assert!((6.0..6.01).contains(&ctx.now()), "got {}", ctx.now());
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
}

#[test]
fn terminate_kills_running_work() {
    let k = kernel();
    let svc = service(&k);
    let ep = svc.endpoint();

    let job = CompoundJob::new("victim");
    job.borrow_mut().add_action(compute_action("long", 4e12, 2, 2)).unwrap();
    let job2 = job.clone();
    let svc2 = svc.clone();
    k.spawn("controller", &HostName::new("Head"), false, move |ctx| async move {
        let notify = ctx.create_commport("events")?;
        submit_job(&ctx, &ep, JobSubmission::new(job2.clone(), notify))
            .await
            .map_err(KernelError::from)?;
        ctx.sleep(5.0).await?;
        crate::service::terminate_job(&ctx, &ep, &job2).await.map_err(KernelError::from)?;
        assert_eq!(job2.borrow().state(), JobState::Discontinued);
        assert_eq!(svc2.total_idle_core_count(), 8, "reservation released");
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert_eq!(job.borrow().action(0).state(), ActionState::Killed);
}
