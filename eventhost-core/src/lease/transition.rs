//! Every function takes the current lease and the time of the decision and returns the next lease,
//! or `None` when the transition is not allowed. Engines apply the result atomically.

use chrono::{DateTime, TimeDelta, Utc};

use super::Lease;

/// How far in the past a released lease expires, in seconds.
const RELEASE_BACKDATE_SECS: i64 = 1;

/// A lease is available when nobody owns it or its owner let it expire.
pub fn is_available(lease: &Lease, now: DateTime<Utc>) -> bool {
    lease.owner.is_empty() || now > lease.expires_at
}

/// Whether `owner` currently holds the lease.
pub fn is_held_by(lease: &Lease, owner: &str, now: DateTime<Utc>) -> bool {
    !is_available(lease, now) && lease.owner == owner
}

/// Converts the configured lease duration, saturating instead of overflowing.
pub(crate) fn lease_delta(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn expiry(now: DateTime<Utc>, duration: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(duration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn acquire(
    current: &Lease,
    owner: &str,
    now: DateTime<Utc>,
    duration: TimeDelta,
) -> Option<Lease> {
    if !is_available(current, now) {
        return None;
    }
    Some(Lease {
        partition_id: current.partition_id.clone(),
        owner: owner.to_string(),
        expires_at: expiry(now, duration),
        epoch: current.epoch + 1,
    })
}

pub(crate) fn renew(
    current: &Lease,
    owner: &str,
    now: DateTime<Utc>,
    duration: TimeDelta,
) -> Option<Lease> {
    if !is_held_by(current, owner, now) {
        return None;
    }
    Some(Lease {
        expires_at: expiry(now, duration),
        ..current.clone()
    })
}

pub(crate) fn update(
    current: &Lease,
    owner: &str,
    now: DateTime<Utc>,
    duration: TimeDelta,
) -> Option<Lease> {
    renew(current, owner, now, duration).map(|lease| Lease {
        epoch: lease.epoch + 1,
        ..lease
    })
}

pub(crate) fn release(current: &Lease, owner: &str, now: DateTime<Utc>) -> Option<Lease> {
    if !is_held_by(current, owner, now) {
        return None;
    }
    Some(Lease {
        owner: String::new(),
        expires_at: now - TimeDelta::seconds(RELEASE_BACKDATE_SECS),
        ..current.clone()
    })
}
