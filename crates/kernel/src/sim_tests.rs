// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::commport::Commport;
use crate::error::KernelError;
use crate::platform::{Platform, PlatformError};
use gantry_core::HostName;
use std::cell::Cell;
use std::rc::Rc;

fn h(name: &str) -> HostName {
    HostName::new(name)
}

fn kernel() -> Kernel {
    let platform = Platform::builder()
        .host("Host1", "1Gf", 4, "16GB")
        .host("Host2", "1Gf", 4, "16GB")
        .link("l1", "125MBps", "100us")
        .route("Host1", "Host2", &["l1"])
        .build()
        .unwrap();
    Kernel::new(platform, KernelConfig::default())
}

#[test]
fn sleep_advances_the_clock() {
    let k = kernel();
    let end = Rc::new(Cell::new(0.0));
    let end2 = end.clone();
    k.spawn("sleeper", &h("Host1"), false, move |ctx| async move {
        ctx.sleep(10.0).await?;
        ctx.sleep(2.5).await?;
        end2.set(ctx.now());
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert_eq!(end.get(), 12.5);
    assert_eq!(k.now(), 12.5);
}

#[test]
fn zero_sleep_completes_without_advancing() {
    let k = kernel();
    k.spawn("s", &h("Host1"), false, |ctx| async move { ctx.sleep(0.0).await })
        .unwrap();
    k.run().unwrap();
    assert_eq!(k.now(), 0.0);
}

#[test]
fn compute_uses_host_speed() {
    let k = kernel();
    k.spawn("c", &h("Host1"), false, |ctx| async move {
        // 2e9 flops at 1 Gf/s = 2 s
        ctx.compute(2e9).await
    })
    .unwrap();
    k.run().unwrap();
    assert_eq!(k.now(), 2.0);
}

#[test]
fn put_charges_network_time() {
    let k = kernel();
    let port = k.create_commport("mb", &h("Host2")).unwrap();
    let recv_date = Rc::new(Cell::new(-1.0));
    let rd = recv_date.clone();
    let port2 = port.clone();
    k.spawn("receiver", &h("Host2"), false, move |ctx| async move {
        let msg = ctx.get(&port2).await?;
        assert!(msg.is::<u32>());
        rd.set(ctx.now());
        Ok(())
    })
    .unwrap();
    k.spawn("sender", &h("Host1"), false, move |ctx| async move {
        // 125 MB at 92% of 125 MBps, plus the 100 us latency
        ctx.put(&port, 7u32, 125_000_000).await
    })
    .unwrap();
    k.run().unwrap();
    let expected = 125e6 / (crate::platform::DEFAULT_BANDWIDTH_FACTOR * 125e6) + 1e-4;
    assert!((recv_date.get() - expected).abs() < 1e-9, "{}", recv_date.get());
}

#[test]
fn dput_preserves_sender_order() {
    let k = kernel();
    let port = k.create_commport("mb", &h("Host1")).unwrap();
    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let seen2 = seen.clone();
    let port2 = port.clone();
    k.spawn("receiver", &h("Host1"), false, move |ctx| async move {
        for _ in 0..3 {
            let msg = ctx.get(&port2).await?;
            if let Ok(n) = msg.downcast::<u32>() {
                seen2.borrow_mut().push(n);
            }
        }
        Ok(())
    })
    .unwrap();
    k.spawn("sender", &h("Host2"), false, move |ctx| async move {
        ctx.dput(&port, 1u32, 0)?;
        ctx.dput(&port, 2u32, 0)?;
        ctx.dput(&port, 3u32, 0)?;
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
}

#[test]
fn get_timeout_elapses() {
    let k = kernel();
    let port = k.create_commport("mb", &h("Host1")).unwrap();
    let outcome = Rc::new(Cell::new(false));
    let o2 = outcome.clone();
    k.spawn("waiter", &h("Host1"), false, move |ctx| async move {
        let err = ctx.get_timeout(&port, 5.0).await.unwrap_err();
        assert!(matches!(err, KernelError::Timeout { .. }));
        assert_eq!(ctx.now(), 5.0);
        o2.set(true);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(outcome.get());
}

#[test]
fn expect_flags_unexpected_messages() {
    let k = kernel();
    let port = k.create_commport("mb", &h("Host1")).unwrap();
    let port2 = port.clone();
    k.spawn("receiver", &h("Host1"), false, move |ctx| async move {
        let err = ctx.expect::<String>(&port2).await.unwrap_err();
        assert!(matches!(err, KernelError::UnexpectedMessage { .. }));
        Ok(())
    })
    .unwrap();
    k.spawn("sender", &h("Host1"), false, move |ctx| async move {
        ctx.put(&port, 42u32, 0).await
    })
    .unwrap();
    k.run().unwrap();
}

#[test]
fn reply_round_trip() {
    #[derive(Debug)]
    struct Ping { reply_to: Commport }
    #[derive(Debug)]
    struct Pong;

    let k = kernel();
    let server_port = k.create_commport("server", &h("Host2")).unwrap();
    let sp = server_port.clone();
    k.spawn("server", &h("Host2"), true, move |ctx| async move {
        loop {
            let msg = ctx.expect::<Ping>(&sp).await?;
            ctx.dput(&msg.reply_to, Pong, 0)?;
        }
    })
    .unwrap();
    let done = Rc::new(Cell::new(false));
    let d2 = done.clone();
    k.spawn("client", &h("Host1"), false, move |ctx| async move {
        let reply_to = ctx.create_commport("reply")?;
        ctx.put(&server_port, Ping { reply_to: reply_to.clone() }, 1000).await?;
        ctx.expect::<Pong>(&reply_to).await?;
        d2.set(true);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(done.get());
}

#[test]
fn daemons_do_not_block_termination() {
    let k = kernel();
    let port = k.create_commport("never", &h("Host1")).unwrap();
    k.spawn("daemon", &h("Host1"), true, move |ctx| async move {
        let _ = ctx.get(&port).await;
        Ok(())
    })
    .unwrap();
    k.spawn("worker", &h("Host1"), false, |ctx| async move { ctx.sleep(1.0).await })
        .unwrap();
    k.run().unwrap();
    assert_eq!(k.now(), 1.0);
}

#[test]
fn stuck_actors_are_a_deadlock() {
    let k = kernel();
    let port = k.create_commport("never", &h("Host1")).unwrap();
    k.spawn("waiter", &h("Host1"), false, move |ctx| async move {
        ctx.get(&port).await?;
        Ok(())
    })
    .unwrap();
    assert!(matches!(k.run(), Err(KernelError::Deadlock { live: 1 })));
}

#[test]
fn killed_actor_stops_making_progress() {
    let k = kernel();
    let progressed = Rc::new(Cell::new(false));
    let p2 = progressed.clone();
    let victim = k
        .spawn("victim", &h("Host1"), false, move |ctx| async move {
            ctx.sleep(100.0).await?;
            p2.set(true);
            Ok(())
        })
        .unwrap();
    k.spawn("killer", &h("Host2"), false, move |ctx| async move {
        ctx.sleep(5.0).await?;
        ctx.kill(victim);
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(!progressed.get());
    assert!(!k.is_live(victim));
    assert_eq!(k.now(), 5.0);
}

#[test]
fn host_down_fails_pending_suspensions() {
    let k = kernel();
    let failed_with = Rc::new(Cell::new(false));
    let f2 = failed_with.clone();
    k.spawn("sleeper", &h("Host2"), false, move |ctx| async move {
        let err = ctx.sleep(100.0).await.unwrap_err();
        assert!(matches!(err, KernelError::Platform(PlatformError::HostDown(_))));
        f2.set(true);
        Ok(())
    })
    .unwrap();
    let kc = k.clone();
    k.spawn("chaos", &h("Host1"), false, move |ctx| async move {
        ctx.sleep(10.0).await?;
        kc.set_host_down(&h("Host2"))?;
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(failed_with.get());
}

#[test]
fn commport_pool_is_finite() {
    let platform = Platform::builder().host("H", "1f", 1, "1B").build().unwrap();
    let k = Kernel::new(platform, KernelConfig { commport_pool_size: 2 });
    k.create_commport("a", &h("H")).unwrap();
    k.create_commport("b", &h("H")).unwrap();
    assert!(matches!(
        k.create_commport("c", &h("H")),
        Err(KernelError::PortPoolExhausted(2))
    ));
}

#[test]
fn reset_discards_queued_messages() {
    let k = kernel();
    let port = k.create_commport("mb", &h("Host1")).unwrap();
    let port2 = port.clone();
    let timed_out = Rc::new(Cell::new(false));
    let t2 = timed_out.clone();
    k.spawn("actor", &h("Host1"), false, move |ctx| async move {
        ctx.dput(&port2, 1u32, 0)?;
        ctx.sleep(1.0).await?;
        ctx.kernel().reset_port(&port2);
        let res = ctx.get_timeout(&port2, 1.0).await;
        t2.set(res.is_err());
        Ok(())
    })
    .unwrap();
    k.run().unwrap();
    assert!(timed_out.get());
}
