// SPDX-License-Identifier: Apache-2.0

//! Canonical lifecycle status and timeline of an escrow.
//!
//! The contract keeps three independent flags, which admit more combinations
//! than there are lifecycle states. [`project_status`] resolves every
//! combination through one ordered decision table; combinations the contract
//! should never produce come out as [`EscrowStatus::Unknown`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::EscrowFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Created, waiting for the receiver.
    Pending,
    /// Never accepted and past its expiry date.
    Expired,
    Active,
    ReleaseRequested,
    Completed,
    /// Closed without a release: refunded, or expired after acceptance.
    Refunded,
    Unknown,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::Expired => "expired",
            EscrowStatus::Active => "active",
            EscrowStatus::ReleaseRequested => "release_requested",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Refunded => "refunded",
            EscrowStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscrowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(EscrowStatus::Pending),
            "expired" => Ok(EscrowStatus::Expired),
            "active" => Ok(EscrowStatus::Active),
            "release_requested" => Ok(EscrowStatus::ReleaseRequested),
            "completed" => Ok(EscrowStatus::Completed),
            "refunded" => Ok(EscrowStatus::Refunded),
            "unknown" => Ok(EscrowStatus::Unknown),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Derive the status from the flags, the expiry and the evaluation time.
///
/// Rows are tried top to bottom and the first match wins. Expiry only matters
/// for escrows nobody accepted, and is strict: `now == expiry_date` is not
/// expired yet.
pub fn project_status(flags: EscrowFlags, expiry_date: u64, now: u64) -> EscrowStatus {
    let expired = now > expiry_date;
    match (
        flags.is_active,
        flags.is_completed,
        flags.release_requested,
        expired,
    ) {
        (false, false, false, false) => EscrowStatus::Pending,
        (false, false, false, true) => EscrowStatus::Expired,
        (true, false, false, _) => EscrowStatus::Active,
        (true, false, true, _) => EscrowStatus::ReleaseRequested,
        (_, true, true, _) => EscrowStatus::Completed,
        (false, true, false, _) => EscrowStatus::Refunded,
        _ => EscrowStatus::Unknown,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineStep {
    pub title: &'static str,
    pub description: &'static str,
    pub completed: bool,
}

impl TimelineStep {
    fn new(title: &'static str, description: &'static str, completed: bool) -> Self {
        Self {
            title,
            description,
            completed,
        }
    }
}

/// Render the milestone list for an escrow.
///
/// An unaccepted escrow past its expiry gets a two-step created/expired
/// timeline. Everything else walks created, accepted, release requested and
/// released, each marked complete once its condition holds on the flags.
pub fn timeline(flags: EscrowFlags, expiry_date: u64, now: u64) -> Vec<TimelineStep> {
    if project_status(flags, expiry_date, now) == EscrowStatus::Expired {
        return vec![
            TimelineStep::new("Escrow Creation", "Depositor created escrow", true),
            TimelineStep::new(
                "Escrow Expired",
                "Escrow expired before the receiver accepted it",
                true,
            ),
        ];
    }

    let accepted = flags.is_active || flags.is_completed || flags.release_requested;
    let released = flags.is_completed && flags.release_requested;
    vec![
        TimelineStep::new("Escrow Creation", "Depositor created escrow", true),
        TimelineStep::new("Escrow Accepted", "Receiver accepted escrow", accepted),
        TimelineStep::new(
            "Payment Requested",
            "Receiver requested payment",
            flags.release_requested,
        ),
        TimelineStep::new(
            "Payment Released",
            "Depositor approved release of payment",
            released,
        ),
    ]
}

/// Status and timeline evaluated together at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectedStatus {
    pub status: EscrowStatus,
    pub timeline: Vec<TimelineStep>,
}

pub fn project(flags: EscrowFlags, expiry_date: u64, now: u64) -> ProjectedStatus {
    ProjectedStatus {
        status: project_status(flags, expiry_date, now),
        timeline: timeline(flags, expiry_date, now),
    }
}
