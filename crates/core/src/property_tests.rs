// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn from_pairs_accepts_known_keys() {
    let map = PropertyMap::from_pairs([
        ("BATCH_SCHEDULING_ALGORITHM", "easy_bf"),
        ("BUFFER_SIZE", "1048576"),
    ])
    .unwrap();
    assert_eq!(map.get(ServiceProperty::BatchSchedulingAlgorithm), Some("easy_bf"));
    assert_eq!(map.get_u64(ServiceProperty::BufferSize, 0).unwrap(), 1_048_576);
}

#[test]
fn from_pairs_rejects_unknown_keys() {
    let err = PropertyMap::from_pairs([("NOT_A_KNOB", "1")]).unwrap_err();
    assert!(matches!(err, PropertyError::UnknownProperty(_)));
}

#[test]
fn typed_getters_validate() {
    let map = PropertyMap::new().with(ServiceProperty::CacheMaxLifetime, "banana");
    assert!(matches!(
        map.get_f64(ServiceProperty::CacheMaxLifetime, 0.0),
        Err(PropertyError::BadValue { .. })
    ));
    assert_eq!(map.get_f64(ServiceProperty::VmBootOverhead, 2.5).unwrap(), 2.5);
}

#[test]
fn bools_are_strict() {
    let map = PropertyMap::new().with(ServiceProperty::SupportsPilotJobs, "true");
    assert!(map.get_bool(ServiceProperty::SupportsPilotJobs, false).unwrap());
    let map = PropertyMap::new().with(ServiceProperty::SupportsPilotJobs, "yes");
    assert!(map.get_bool(ServiceProperty::SupportsPilotJobs, false).is_err());
}

#[test]
fn key_round_trip() {
    for key in [
        ServiceProperty::BatchSchedulingAlgorithm,
        ServiceProperty::HostSelectionAlgorithm,
        ServiceProperty::ReducedSimulation,
        ServiceProperty::AutoRestart,
    ] {
        assert_eq!(ServiceProperty::from_key(key.key()), Some(key));
    }
    assert_eq!(ServiceProperty::from_key("nope"), None);
}

#[test]
fn payloads_default_to_zero() {
    let map = PayloadMap::new();
    assert_eq!(map.get(MessagePayload::FileReadRequest), 0);
    let map = PayloadMap::uniform(1024).with(MessagePayload::FileReadRequest, 4096);
    assert_eq!(map.get(MessagePayload::FileReadRequest), 4096);
    assert_eq!(map.get(MessagePayload::FileReadAnswer), 1024);
}
