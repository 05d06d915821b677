// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::shim_layer::leader_election::next_lease_spec;
use k8s_openapi::api::coordination::v1::LeaseSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use k8s_openapi::chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

const LEASE_DURATION: Duration = Duration::from_secs(15);

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn held_by(holder: &str, renewed: i64, transitions: i32) -> LeaseSpec {
    LeaseSpec {
        holder_identity: Some(holder.to_string()),
        acquire_time: Some(MicroTime(at(0))),
        renew_time: Some(MicroTime(at(renewed))),
        lease_duration_seconds: Some(15),
        lease_transitions: Some(transitions),
        ..LeaseSpec::default()
    }
}

#[test]
pub fn test_acquire_missing_lease() {
    println!("Testing next_lease_spec() without a lease...");
    let spec = next_lease_spec(None, "me", LEASE_DURATION, at(100)).unwrap();
    assert_eq!(spec.holder_identity, Some("me".to_string()));
    assert_eq!(spec.lease_transitions, Some(0));
    assert_eq!(spec.lease_duration_seconds, Some(15));
    assert_eq!(spec.renew_time, Some(MicroTime(at(100))));
}

#[test]
pub fn test_renew_own_lease() {
    println!("Testing next_lease_spec() renewing...");
    let current = held_by("me", 90, 3);
    let spec = next_lease_spec(Some(&current), "me", LEASE_DURATION, at(100)).unwrap();
    assert_eq!(spec.renew_time, Some(MicroTime(at(100))));
    assert_eq!(spec.acquire_time, current.acquire_time);
    assert_eq!(spec.lease_transitions, Some(3));
}

#[test]
pub fn test_respect_live_lease_of_another_holder() {
    println!("Testing next_lease_spec() against a live holder...");
    let current = held_by("other", 90, 3);
    assert!(next_lease_spec(Some(&current), "me", LEASE_DURATION, at(100)).is_none());
    // exactly at expiry the lease still stands
    assert!(next_lease_spec(Some(&current), "me", LEASE_DURATION, at(105)).is_none());
}

#[test]
pub fn test_take_over_expired_lease() {
    println!("Testing next_lease_spec() take over...");
    let current = held_by("other", 90, 3);
    let spec = next_lease_spec(Some(&current), "me", LEASE_DURATION, at(106)).unwrap();
    assert_eq!(spec.holder_identity, Some("me".to_string()));
    assert_eq!(spec.lease_transitions, Some(4));
    assert_eq!(spec.acquire_time, Some(MicroTime(at(106))));
}

#[test]
pub fn test_take_over_released_lease() {
    println!("Testing next_lease_spec() on a released lease...");
    let mut current = held_by("other", 90, 3);
    current.holder_identity = None;
    let spec = next_lease_spec(Some(&current), "me", LEASE_DURATION, at(91)).unwrap();
    assert_eq!(spec.holder_identity, Some("me".to_string()));
    assert_eq!(spec.lease_transitions, Some(4));
}
