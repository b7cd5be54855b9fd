// SPDX-License-Identifier: Apache-2.0

//! REST API over the escrow projection.
//!
//! Detail and search endpoints take a `viewer` address and only return
//! escrows the viewer participates in.

mod handlers;
mod types;

pub use handlers::create_api_router;
pub use types::*;

use std::sync::Arc;

use prometheus::Registry;

use crate::query::QueryService;

/// Shared state for API handlers
pub struct ApiState {
    pub query: Arc<QueryService>,
    /// Registry rendered on `/metrics`
    pub registry: Registry,
}

impl ApiState {
    pub fn new(query: Arc<QueryService>, registry: Registry) -> Arc<Self> {
        Arc::new(Self { query, registry })
    }
}
