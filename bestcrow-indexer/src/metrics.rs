// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_vec_with_registry, Encoder, IntCounter, IntCounterVec, IntGaugeVec,
    Registry, TextEncoder,
};

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    pub(crate) events_ingested: IntCounterVec,
    pub(crate) events_duplicate: IntCounterVec,
    pub(crate) decode_errors: IntCounterVec,
    pub(crate) orphaned_events: IntCounterVec,
    pub(crate) checkpoint_block: IntGaugeVec,
    pub(crate) source_errors: IntCounterVec,
    pub(crate) reconcile_corrections: IntCounterVec,
    pub(crate) unknown_status: IntCounter,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            events_ingested: register_int_counter_vec_with_registry!(
                "escrow_events_ingested_total",
                "Total number of escrow events appended to the event log, by chain and kind",
                &["chain", "kind"],
                registry,
            )
            .unwrap(),
            events_duplicate: register_int_counter_vec_with_registry!(
                "escrow_events_duplicate_total",
                "Total number of redelivered events absorbed by the dedup key",
                &["chain"],
                registry,
            )
            .unwrap(),
            decode_errors: register_int_counter_vec_with_registry!(
                "escrow_decode_errors_total",
                "Total number of log entries skipped because they could not be decoded",
                &["chain", "reason"],
                registry,
            )
            .unwrap(),
            orphaned_events: register_int_counter_vec_with_registry!(
                "escrow_orphaned_events_total",
                "Total number of events referencing an escrow that was never created",
                &["chain", "kind"],
                registry,
            )
            .unwrap(),
            checkpoint_block: register_int_gauge_vec_with_registry!(
                "escrow_pipeline_checkpoint_block",
                "Last block fully processed by each ingestion pipeline",
                &["pipeline"],
                registry,
            )
            .unwrap(),
            source_errors: register_int_counter_vec_with_registry!(
                "escrow_source_errors_total",
                "Total number of chain RPC failures that outlived the retry budget",
                &["chain", "error_type"],
                registry,
            )
            .unwrap(),
            reconcile_corrections: register_int_counter_vec_with_registry!(
                "escrow_reconcile_corrections_total",
                "Total number of projection records backfilled or corrected from contract state",
                &["chain"],
                registry,
            )
            .unwrap(),
            unknown_status: register_int_counter_with_registry!(
                "escrow_unknown_status_total",
                "Total number of queries that resolved an impossible flag combination",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

/// Render every metric of `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
