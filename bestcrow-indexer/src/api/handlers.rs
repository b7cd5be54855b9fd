// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use ethers::types::{Address, U256};
use tracing::{debug, error};

use crate::api::types::*;
use crate::api::ApiState;
use crate::error::QueryError;
use crate::metrics::render;
use crate::status::EscrowStatus;
use crate::types::{ChainScope, EscrowKey};

pub fn create_api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/escrows/search", get(search_escrows))
        .route("/escrows/:chain_id/:contract/:escrow_id", get(get_escrow))
        .route("/participants/:address/escrows", get(list_participant_escrows))
        .route("/fees/quote", get(quote_fees))
        .route("/checkpoints", get(get_checkpoints))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "bestcrow-indexer-api"
    }))
}

/// Escrow detail with a freshly computed status. Only the depositor and the
/// receiver may read it.
async fn get_escrow(
    State(state): State<Arc<ApiState>>,
    Path((chain_id, contract, escrow_id)): Path<(String, String, String)>,
    Query(params): Query<ViewerQuery>,
) -> Result<Json<EscrowResponse>, ApiErrorResponse> {
    let chain_id = chain_id
        .parse::<u64>()
        .map_err(|e| ApiErrorResponse::bad_request(&format!("Invalid chain id: {}", e)))?;
    let contract = parse_hex_address(&contract)
        .map_err(|e| ApiErrorResponse::bad_request(&format!("Invalid contract: {}", e)))?;
    let escrow_id = escrow_id
        .parse::<u64>()
        .map_err(|e| ApiErrorResponse::bad_request(&format!("Invalid escrow id: {}", e)))?;
    let viewer = parse_hex_address(&params.viewer)
        .map_err(|e| ApiErrorResponse::bad_request(&format!("Invalid viewer: {}", e)))?;

    let key = EscrowKey::new(ChainScope::new(chain_id, contract), escrow_id);
    debug!("Fetching escrow {} for {:?}", key, viewer);
    let view = state.query.get_by_id(&key, &viewer).await?;
    Ok(Json(view.into()))
}

/// The escrows of `address`, readable only with `viewer` equal to it.
async fn list_participant_escrows(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Query(params): Query<ViewerQuery>,
) -> Result<Json<EscrowListResponse>, ApiErrorResponse> {
    let address = parse_hex_address(&address)
        .map_err(|e| ApiErrorResponse::bad_request(&format!("Invalid address: {}", e)))?;
    let viewer = parse_hex_address(&params.viewer)
        .map_err(|e| ApiErrorResponse::bad_request(&format!("Invalid viewer: {}", e)))?;
    let views = state.query.list_by_participant(&address, &viewer).await?;
    Ok(Json(views.into()))
}

/// Search the viewer's escrows by id or title, optionally by status
async fn search_escrows(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<EscrowListResponse>, ApiErrorResponse> {
    let viewer = parse_hex_address(&params.viewer)
        .map_err(|e| ApiErrorResponse::bad_request(&format!("Invalid viewer: {}", e)))?;
    let status = params
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<EscrowStatus>)
        .transpose()
        .map_err(|e| ApiErrorResponse::bad_request(&e))?;
    let views = state.query.search(&viewer, &params.q, status).await?;
    Ok(Json(views.into()))
}

async fn quote_fees(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<QuoteQuery>,
) -> Result<Json<FeeQuoteResponse>, ApiErrorResponse> {
    let amount = U256::from_dec_str(params.amount.trim())
        .map_err(|e| ApiErrorResponse::bad_request(&format!("Invalid amount: {:?}", e)))?;
    let quote = state.query.quote(amount)?;
    Ok(Json(FeeQuoteResponse::new(quote, state.query.fees())))
}

/// Last processed position of every pipeline
async fn get_checkpoints(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<CheckpointListResponse>, ApiErrorResponse> {
    let checkpoints = state.query.checkpoints().await?;
    Ok(Json(CheckpointListResponse {
        checkpoints: checkpoints.into_iter().map(Into::into).collect(),
    }))
}

async fn get_metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiErrorResponse> {
    let body = render(&state.registry).map_err(|e| {
        ApiErrorResponse::internal(&format!("Failed to encode metrics: {}", e))
    })?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response())
}

/// Parse a 20-byte hex address, with or without the 0x prefix
fn parse_hex_address(addr: &str) -> Result<Address, String> {
    let addr_clean = addr.strip_prefix("0x").unwrap_or(addr);
    let bytes = hex::decode(addr_clean).map_err(|e| format!("Invalid hex: {}", e))?;
    if bytes.len() != Address::len_bytes() {
        return Err(format!("Expected 20 bytes, got {}", bytes.len()));
    }
    Ok(Address::from_slice(&bytes))
}

pub(crate) struct ApiErrorResponse {
    status: StatusCode,
    body: Json<ApiError>,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, error: &str, message: &str) -> Self {
        Self {
            status,
            body: Json(ApiError {
                error: error.to_string(),
                message: message.to_string(),
            }),
        }
    }

    fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    fn forbidden(message: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    fn internal(message: &str) -> Self {
        error!("Internal error: {}", message);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<QueryError> for ApiErrorResponse {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::NotFound => Self::not_found(&e.to_string()),
            QueryError::Forbidden => Self::forbidden(&e.to_string()),
            QueryError::InvalidInput(_) | QueryError::Fee(_) => Self::bad_request(&e.to_string()),
            QueryError::Store(_) => Self::internal(&e.to_string()),
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use prometheus::Registry;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::feed::UpdateFeed;
    use crate::fees::FeeSchedule;
    use crate::metrics::IndexerMetrics;
    use crate::query::{FixedClock, QueryService};
    use crate::store::{EscrowStore, InMemoryEscrowStore};
    use crate::types::{Checkpoint, EscrowEvent, LogPosition, RawEvent};
    use ethers::types::H256;

    const T: u64 = 1_700_000_000;
    const CONTRACT: &str = "0x7777777777777777777777777777777777777777";
    const DEPOSITOR: &str = "0xd0d0d0d0d0d0d0d0d0d0d0d0d0d0d0d0d0d0d0d0";
    const RECEIVER: &str = "0xe0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0e0";
    const STRANGER: &str = "0x5555555555555555555555555555555555555555";

    fn scope() -> ChainScope {
        ChainScope::new(17000, Address::repeat_byte(0x77))
    }

    async fn router() -> Router {
        let store = Arc::new(InMemoryEscrowStore::new());
        let events = [
            EscrowEvent::Created {
                escrow_id: 1,
                depositor: Address::repeat_byte(0xd0),
                receiver: Address::repeat_byte(0xe0),
                token: Address::zero(),
                amount: U256::exp10(18),
                expiry_date: T + 10,
                created_at: T,
                title: "Website Redesign".to_string(),
                description: "Landing page".to_string(),
            },
            EscrowEvent::Accepted {
                escrow_id: 1,
                receiver: Address::repeat_byte(0xe0),
            },
        ];
        for (i, event) in events.into_iter().enumerate() {
            store
                .ingest(&RawEvent {
                    scope: scope(),
                    tx_hash: H256::from_low_u64_be(i as u64 + 1),
                    position: LogPosition::new(100 + i as u64, 0),
                    event,
                })
                .await
                .unwrap();
        }
        store
            .advance_checkpoint(scope(), Checkpoint::end_of_block(120))
            .await
            .unwrap();

        let registry = Registry::new();
        let metrics = Arc::new(IndexerMetrics::new(&registry));
        let query = QueryService::new(
            store,
            FeeSchedule::default(),
            UpdateFeed::default(),
            metrics,
        )
        .with_clock(Arc::new(FixedClock::new(T)));
        create_api_router(ApiState::new(Arc::new(query), registry))
    }

    async fn get(uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router()
            .await
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let (status, body) = get(uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_get_escrow_for_participant() {
        let (status, body) =
            get_json(&format!("/escrows/17000/{}/1?viewer={}", CONTRACT, RECEIVER)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["escrow_id"], 1);
        assert_eq!(body["status"], "active");
        assert_eq!(body["amount"], "1000000000000000000");
        assert_eq!(body["is_native"], true);
        assert_eq!(body["depositor"], DEPOSITOR);
        assert_eq!(body["timeline"].as_array().unwrap().len(), 4);
        assert_eq!(body["timeline"][1]["completed"], true);
        assert_eq!(body["timeline"][2]["completed"], false);
    }

    #[tokio::test]
    async fn test_get_escrow_errors() {
        let (status, body) =
            get_json(&format!("/escrows/17000/{}/1?viewer={}", CONTRACT, STRANGER)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, _) =
            get_json(&format!("/escrows/17000/{}/2?viewer={}", CONTRACT, DEPOSITOR)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Same id on another deployment is a different escrow.
        let (status, _) = get_json(&format!(
            "/escrows/1/{}/1?viewer={}",
            CONTRACT, DEPOSITOR
        ))
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            get_json(&format!("/escrows/17000/0x1234/1?viewer={}", DEPOSITOR)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");

        let (status, _) =
            get_json(&format!("/escrows/17000/{}/abc?viewer={}", CONTRACT, DEPOSITOR)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_and_search() {
        let (status, body) = get_json(&format!(
            "/participants/{}/escrows?viewer={}",
            DEPOSITOR, DEPOSITOR
        ))
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["escrows"][0]["title"], "Website Redesign");

        let (_, body) = get_json(&format!(
            "/participants/{}/escrows?viewer={}",
            STRANGER, STRANGER
        ))
        .await;
        assert_eq!(body["total"], 0);

        let (_, body) = get_json(&format!(
            "/escrows/search?viewer={}&q=redesign&status=active",
            DEPOSITOR
        ))
        .await;
        assert_eq!(body["total"], 1);

        let (_, body) = get_json(&format!(
            "/escrows/search?viewer={}&q=redesign&status=completed",
            DEPOSITOR
        ))
        .await;
        assert_eq!(body["total"], 0);

        let (status, _) = get_json(&format!(
            "/escrows/search?viewer={}&status=bogus",
            DEPOSITOR
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_participant_listing_hidden_from_other_viewers() {
        let (status, body) = get(&format!(
            "/participants/{}/escrows?viewer={}",
            DEPOSITOR, STRANGER
        ))
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let body = String::from_utf8(body).unwrap();
        assert!(!body.contains("Website Redesign"));
        assert!(!body.contains("Landing page"));
        assert!(!body.contains("1000000000000000000"));

        let (status, _) = get_json(&format!(
            "/participants/{}/escrows?viewer={}",
            DEPOSITOR, RECEIVER
        ))
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // The viewer is mandatory.
        let (status, body) = get(&format!("/participants/{}/escrows", DEPOSITOR)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!String::from_utf8(body).unwrap().contains("Website Redesign"));
    }

    #[tokio::test]
    async fn test_quote_and_checkpoints() {
        let (status, body) = get_json("/fees/quote?amount=1000000000000000000").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fee"], "5000000000000000");
        assert_eq!(body["collateral"], "500000000000000000");
        assert_eq!(body["creation_total"], "1005000000000000000");
        assert_eq!(body["fee_bps"], 50);

        let (status, _) = get_json("/fees/quote?amount=-5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json("/checkpoints").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checkpoints"][0]["chain_id"], 17000);
        assert_eq!(body["checkpoints"][0]["block_number"], 120);
        assert_eq!(body["checkpoints"][0]["log_index"], Value::Null);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = get("/metrics").await;
        assert_eq!(status, StatusCode::OK);
        // Vec metrics only show up once a label set is touched.
        assert!(String::from_utf8(body)
            .unwrap()
            .contains("escrow_unknown_status_total 0"));
    }

    #[test]
    fn test_parse_hex_address() {
        assert_eq!(
            parse_hex_address(DEPOSITOR).unwrap(),
            Address::repeat_byte(0xd0)
        );
        assert_eq!(
            parse_hex_address(&DEPOSITOR[2..]).unwrap(),
            Address::repeat_byte(0xd0)
        );
        assert!(parse_hex_address("0x1234").is_err());
        assert!(parse_hex_address("0xGGGG").unwrap_err().contains("Invalid hex"));
    }

    #[test]
    fn test_query_error_mapping() {
        let err: ApiErrorResponse = QueryError::Forbidden.into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        let err: ApiErrorResponse = QueryError::NotFound.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.body.0.error, "not_found");
        let err: ApiErrorResponse = QueryError::InvalidInput("x".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
