//! HTTP Route Handlers
//!
//! The SCRAPI surface over the core:
//! - `POST /entries` - register a signed statement
//! - `GET  /entries/{id}` - COSE receipt for an entry
//! - `GET  /checkpoint` - latest signed tree head
//! - `GET  /tile/{L}/{path}[.p/{W}]` - hash tiles
//! - `GET  /tile/entries/{path}[.p/{W}]` - entry tiles
//! - `GET  /.well-known/scitt-configuration` - service discovery
//! - `GET  /.well-known/jwks.json` - service keys as a JWK set
//! - `GET  /.well-known/scitt-keys` - service keys as COSE_Key set
//! - `GET  /health` - liveness and tree size

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::server::SharedAppState;
use crate::common::error::{ErrorKind, ScittError};
use crate::registry::RegistrationOutcome;
use crate::tlog::path::{
    entry_tile_key, entry_tile_partial_key, hash_tile_key, hash_tile_partial_key, parse_index,
};

/// Create the API router
pub fn create_router(state: SharedAppState) -> Router {
    let cors_enabled = state.config.server.cors.enabled;
    let allowed_origins = state.config.server.cors.allowed_origins.clone();

    let router = Router::new()
        .route("/entries", post(handle_register))
        .route("/entries/:id", get(handle_get_entry))
        .route("/checkpoint", get(handle_checkpoint))
        .route("/tile/entries/*path", get(handle_entry_tile))
        .route("/tile/:level/*path", get(handle_hash_tile))
        .route(
            "/.well-known/scitt-configuration",
            get(handle_configuration),
        )
        .route("/.well-known/jwks.json", get(handle_jwks))
        .route("/.well-known/scitt-keys", get(handle_cose_keys))
        .route("/health", get(handle_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        let cors = if allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = allowed_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        };
        router.layer(cors)
    } else {
        router
    }
}

/// Map a core error to status code and JSON body
fn error_response(err: ScittError) -> Response {
    let status = match err.kind() {
        ErrorKind::MalformedInput | ErrorKind::SignatureInvalid => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Policy => StatusCode::FORBIDDEN,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
        // No internals across the trust boundary
        let body = serde_json::json!({ "error": "internal error" });
        return (status, Json(body)).into_response();
    }
    let body = serde_json::json!({
        "error": err.error_code(),
        "details": err.to_string(),
    });
    (status, Json(body)).into_response()
}

/// POST /entries
///
/// Register a COSE_Sign1 statement. Duplicates return 409 with the
/// original entry id and a fresh receipt.
async fn handle_register(
    State(state): State<SharedAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/cose") {
        let body = serde_json::json!({
            "error": "UNSUPPORTED_MEDIA_TYPE",
            "details": "expected Content-Type: application/cose",
        });
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, Json(body)).into_response();
    }

    // Run the append in its own task so a client disconnect cannot cancel
    // it partway through the durable writes.
    let service = state.service.clone();
    let result = match tokio::spawn(async move { service.register(&body).await }).await {
        Ok(result) => result,
        Err(e) => Err(ScittError::internal(format!("append task failed: {}", e))),
    };

    match result {
        Ok(RegistrationOutcome::Created(response)) => {
            let location = format!("/entries/{}", response.entry_id);
            (
                StatusCode::CREATED,
                [(header::LOCATION, location)],
                Json(response),
            )
                .into_response()
        }
        Ok(RegistrationOutcome::Conflict(response)) => {
            let body = serde_json::json!({
                "error": "CONFLICT",
                "details": "statement already registered",
                "entry_id": response.entry_id,
                "statement_hash": response.statement_hash,
                "receipt": response.receipt,
            });
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// GET /entries/:id
///
/// COSE receipt with the inclusion proof at the current tree size.
async fn handle_get_entry(
    State(state): State<SharedAppState>,
    Path(id): Path<String>,
) -> Response {
    let entry_id: u64 = match id.parse() {
        Ok(entry_id) => entry_id,
        Err(_) => {
            return error_response(ScittError::malformed(format!(
                "entry id must be a number, got {:?}",
                id
            )))
        }
    };
    match state.service.receipt_cose(entry_id).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/cose")],
            bytes,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

/// GET /checkpoint
///
/// Latest signed tree head as a text signed note.
async fn handle_checkpoint(State(state): State<SharedAppState>) -> Response {
    match state.meta.latest_tree_state().await {
        Ok(Some(row)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            row.checkpoint,
        )
            .into_response(),
        Ok(None) => error_response(ScittError::not_found("log is empty, no checkpoint yet")),
        Err(err) => error_response(err.into()),
    }
}

/// GET /tile/entries/*path
async fn handle_entry_tile(
    State(state): State<SharedAppState>,
    Path(path): Path<String>,
) -> Response {
    let (index, width) = match parse_tile_ref(&path) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(err),
    };
    let key = match width {
        Some(width) => entry_tile_partial_key(index, width),
        None => entry_tile_key(index),
    };
    serve_tile(&state, &key).await
}

/// GET /tile/:level/*path
async fn handle_hash_tile(
    State(state): State<SharedAppState>,
    Path((level_str, path)): Path<(String, String)>,
) -> Response {
    let level: u8 = match level_str.parse::<u8>() {
        Ok(level) if level.to_string() == level_str => level,
        _ => {
            return error_response(ScittError::malformed(format!(
                "tile level must be a small number, got {:?}",
                level_str
            )))
        }
    };
    let (index, width) = match parse_tile_ref(&path) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(err),
    };
    let key = match width {
        Some(width) => hash_tile_partial_key(level, index, width),
        None => hash_tile_key(level, index),
    };
    serve_tile(&state, &key).await
}

async fn serve_tile(state: &SharedAppState, key: &str) -> Response {
    match state.store.get(key).await {
        Ok(Some(bytes)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Ok(None) => error_response(ScittError::not_found(format!("tile {}", key))),
        Err(err) => error_response(err.into()),
    }
}

/// Split an optional `.p/{W}` suffix off a tile path and parse both parts
/// strictly.
fn parse_tile_ref(path: &str) -> Result<(u64, Option<usize>), ScittError> {
    match path.rsplit_once(".p/") {
        Some((tile, width_str)) => {
            let index = parse_index(tile)?;
            let width: usize = width_str
                .parse()
                .map_err(|_| ScittError::malformed(format!("tile width: {:?}", width_str)))?;
            if width_str != width.to_string() || !(1..=255).contains(&width) {
                return Err(ScittError::malformed(format!(
                    "tile width must be 1..255, got {:?}",
                    width_str
                )));
            }
            Ok((index, Some(width)))
        }
        None => Ok((parse_index(path)?, None)),
    }
}

/// GET /.well-known/scitt-configuration
async fn handle_configuration(State(state): State<SharedAppState>) -> Response {
    let origin = &state.config.origin;
    Json(serde_json::json!({
        "origin": origin,
        "supported_algorithms": ["ES256"],
        "registration_endpoint": format!("{}/entries", origin),
        "jwks_uri": format!("{}/.well-known/jwks.json", origin),
        "tile_endpoint": format!("{}/tile", origin),
        "checkpoint_endpoint": format!("{}/checkpoint", origin),
    }))
    .into_response()
}

/// GET /.well-known/jwks.json
async fn handle_jwks(State(state): State<SharedAppState>) -> Response {
    Json(state.key.jwks()).into_response()
}

/// GET /.well-known/scitt-keys
async fn handle_cose_keys(State(state): State<SharedAppState>) -> Response {
    match state.key.cose_key_set() {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/cbor")],
            bytes,
        )
            .into_response(),
        Err(err) => error_response(err.into()),
    }
}

/// GET /health
async fn handle_health(State(state): State<SharedAppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "service": "scittlog",
        "version": env!("CARGO_PKG_VERSION"),
        "tree_size": state.log.size().await,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::api::server::AppState;
    use crate::common::config::{ServiceConfig, StorageKind};
    use crate::cose::sign1::{encode_sign1, sign1_create, CwtClaims, ProtectedHeader};
    use crate::cose::ServiceKey;
    use crate::registry::RegistrationService;
    use crate::storage::{MemoryObjectStore, MetadataStore, ObjectStore, SqliteMetadataStore};
    use crate::tlog::{CheckpointSigner, TileLog};

    const ORIGIN: &str = "https://transparency.example.com";

    async fn test_state() -> SharedAppState {
        let mut config: ServiceConfig =
            serde_json::from_str(&format!(r#"{{"origin": "{}"}}"#, ORIGIN)).unwrap();
        config.storage.kind = StorageKind::Memory;
        config.storage.path = None;

        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let meta: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let key = Arc::new(ServiceKey::from_signing_key(
            p256::ecdsa::SigningKey::from_slice(&[8u8; 32]).unwrap(),
        ));
        let signer = CheckpointSigner::new(key.signing_key().clone(), ORIGIN).unwrap();
        let log = Arc::new(
            TileLog::open(store.clone(), meta.clone(), signer)
                .await
                .unwrap(),
        );
        let service = Arc::new(RegistrationService::new(
            log.clone(),
            meta.clone(),
            key.clone(),
            ORIGIN.to_string(),
            false,
        ));

        Arc::new(AppState {
            config,
            store,
            meta,
            key,
            log,
            service,
        })
    }

    fn statement(subject: &str) -> Vec<u8> {
        let issuer = p256::ecdsa::SigningKey::from_slice(&[21u8; 32]).unwrap();
        let mut protected = ProtectedHeader::es256();
        protected.cwt_claims = Some(CwtClaims {
            iss: Some("https://issuer.example.com".to_string()),
            sub: Some(subject.to_string()),
            ..Default::default()
        });
        let sign1 = sign1_create(protected, b"payload".to_vec(), &issuer).unwrap();
        encode_sign1(&sign1).unwrap()
    }

    fn post_entry(bytes: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/entries")
            .header("content-type", "application/cose")
            .body(Body::from(bytes))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(test_state().await);
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["tree_size"], 0);
    }

    #[tokio::test]
    async fn test_register_and_fetch_receipt() {
        let state = test_state().await;
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_entry(statement("a")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/entries/0"
        );
        let json = body_json(response).await;
        assert_eq!(json["entry_id"], 0);
        assert_eq!(json["receipt"]["tree_size"], 1);

        let response = app.clone().oneshot(get("/entries/0")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/cose"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let receipt = crate::cose::decode_sign1(&bytes).unwrap();
        assert!(
            crate::cose::sign1_verify(&receipt, state.key.verifying_key(), None).unwrap()
        );
    }

    #[tokio::test]
    async fn test_register_requires_cose_media_type() {
        let app = create_router(test_state().await);
        let request = Request::builder()
            .method("POST")
            .uri("/entries")
            .header("content-type", "application/json")
            .body(Body::from(statement("a")))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_register_malformed_body() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(post_entry(b"junk".to_vec()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "MALFORMED_INPUT");
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let state = test_state().await;
        let app = create_router(state.clone());

        let first = app
            .clone()
            .oneshot(post_entry(statement("a")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app
            .clone()
            .oneshot(post_entry(statement("a")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let json = body_json(second).await;
        assert_eq!(json["entry_id"], 0);
        assert_eq!(state.log.size().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_and_unparsable_entries() {
        let app = create_router(test_state().await);

        let response = app.clone().oneshot(get("/entries/7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.clone().oneshot(get("/entries/seven")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_checkpoint_endpoint() {
        let app = create_router(test_state().await);

        let response = app.clone().oneshot(get("/checkpoint")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(post_entry(statement("a")))
            .await
            .unwrap();

        let response = app.clone().oneshot(get("/checkpoint")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with(ORIGIN));
        let checkpoint = crate::tlog::Checkpoint::decode(&text).unwrap();
        assert_eq!(checkpoint.tree_size, 1);
    }

    #[tokio::test]
    async fn test_tile_endpoints() {
        let app = create_router(test_state().await);
        app.clone()
            .oneshot(post_entry(statement("a")))
            .await
            .unwrap();
        app.clone()
            .oneshot(post_entry(statement("b")))
            .await
            .unwrap();

        // Partial tiles at width 2
        for uri in ["/tile/entries/000.p/2", "/tile/0/000.p/2"] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
            assert_eq!(
                response.headers().get(header::CONTENT_TYPE).unwrap(),
                "application/octet-stream"
            );
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(bytes.len(), 64);
        }

        // Full tile does not exist yet
        let response = app.clone().oneshot(get("/tile/entries/000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Malformed paths and widths
        for uri in [
            "/tile/entries/00",
            "/tile/entries/000.p/0",
            "/tile/entries/000.p/256",
            "/tile/entries/000.p/02",
            "/tile/0/x000/042",
            "/tile/zero/000",
        ] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_well_known_documents() {
        let state = test_state().await;
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(get("/.well-known/scitt-configuration"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["origin"], ORIGIN);
        assert_eq!(json["supported_algorithms"][0], "ES256");

        let response = app
            .clone()
            .oneshot(get("/.well-known/jwks.json"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["keys"][0]["kty"], "EC");
        assert_eq!(json["keys"][0]["kid"], state.key.kid());

        let response = app
            .clone()
            .oneshot(get("/.well-known/scitt-keys"))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/cbor"
        );
    }
}
