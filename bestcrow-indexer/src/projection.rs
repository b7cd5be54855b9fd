// SPDX-License-Identifier: Apache-2.0

//! Folding raw events into escrow records.
//!
//! [`apply_event`] is the single definition of how an event changes a record.
//! Every store backend and the rebuild path go through it, so replaying the
//! event log always reproduces the live projection.

use crate::types::{EscrowEvent, EscrowKey, EscrowRecord, RawEvent, Settlement};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// The record to persist for this event.
    Applied(EscrowRecord),
    /// The event references an escrow with no Created event yet.
    Orphaned(EscrowKey),
    /// The event no longer changes anything: a second Created for the same id,
    /// or any event after the escrow was settled.
    Stale(EscrowKey),
    /// Contract-level event with no escrow record.
    NoProjection,
}

/// Apply `event` on top of `current`, the stored record for the event's escrow.
pub fn apply_event(current: Option<&EscrowRecord>, event: &RawEvent) -> ProjectionOutcome {
    let Some(key) = event.escrow_key() else {
        return ProjectionOutcome::NoProjection;
    };

    if let EscrowEvent::Created {
        depositor,
        receiver,
        token,
        amount,
        expiry_date,
        created_at,
        title,
        description,
        ..
    } = &event.event
    {
        if current.is_some() {
            return ProjectionOutcome::Stale(key);
        }
        return ProjectionOutcome::Applied(EscrowRecord {
            key,
            depositor: *depositor,
            receiver: *receiver,
            token: *token,
            amount: *amount,
            expiry_date: *expiry_date,
            created_at: *created_at,
            title: title.clone(),
            description: description.clone(),
            flags: Default::default(),
            settlement: None,
            last_position: event.position,
        });
    }

    let Some(current) = current else {
        return ProjectionOutcome::Orphaned(key);
    };
    if current.is_settled() {
        return ProjectionOutcome::Stale(key);
    }

    let mut next = current.clone();
    match &event.event {
        EscrowEvent::Accepted { .. } => {
            next.flags.is_active = true;
        }
        EscrowEvent::ReleaseRequested { .. } => {
            next.flags.release_requested = true;
        }
        EscrowEvent::Completed { .. } => {
            next.flags.is_active = false;
            next.flags.is_completed = true;
            next.flags.release_requested = true;
            next.settlement = Some(Settlement::Released);
        }
        EscrowEvent::Refunded { .. } => {
            next.flags.is_active = false;
            next.flags.is_completed = true;
            next.flags.release_requested = false;
            next.settlement = Some(Settlement::Refunded);
        }
        EscrowEvent::Rejected { .. } => {
            next.flags.is_active = false;
            next.flags.is_completed = true;
            next.flags.release_requested = false;
            next.settlement = Some(Settlement::Rejected);
        }
        EscrowEvent::Created { .. } | EscrowEvent::FeesWithdrawn { .. } => {
            return ProjectionOutcome::Stale(key);
        }
    }
    next.last_position = event.position;

    ProjectionOutcome::Applied(next)
}

/// Replay an ordered event log from scratch. Returns the final records and the
/// number of events that could not be projected.
pub fn replay<'a>(
    events: impl IntoIterator<Item = &'a RawEvent>,
) -> (std::collections::BTreeMap<EscrowKey, EscrowRecord>, usize) {
    let mut records = std::collections::BTreeMap::new();
    let mut skipped = 0;
    for event in events {
        let current = event.escrow_key().and_then(|key| records.get(&key));
        match apply_event(current, event) {
            ProjectionOutcome::Applied(record) => {
                records.insert(record.key, record);
            }
            ProjectionOutcome::Orphaned(_) | ProjectionOutcome::Stale(_) => skipped += 1,
            ProjectionOutcome::NoProjection => {}
        }
    }
    (records, skipped)
}
