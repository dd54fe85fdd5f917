// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[derive(Debug, PartialEq)]
struct Hello {
    n: u32,
}

#[test]
fn downcast_hits_the_right_type() {
    let msg = AnyMessage::new(Hello { n: 7 });
    assert!(msg.is::<Hello>());
    assert!(!msg.is::<String>());
    assert_eq!(msg.downcast::<Hello>().unwrap(), Hello { n: 7 });
}

#[test]
fn downcast_miss_returns_the_message() {
    let msg = AnyMessage::new(Hello { n: 7 });
    let back = msg.downcast::<String>().unwrap_err();
    assert!(back.type_name().contains("Hello"));
    assert_eq!(back.downcast::<Hello>().unwrap(), Hello { n: 7 });
}

#[test]
fn type_name_is_reportable() {
    let msg = AnyMessage::new(42u64);
    assert_eq!(msg.type_name(), "u64");
}
