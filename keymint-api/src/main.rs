//! keymint API server
//!
//! HTTP/1.1 JSON surface over the KDS core. The transport layer owns exactly
//! three jobs: request parsing, mapping core error kinds to status codes,
//! and process bootstrap. Everything with semantics lives in keymint-core.
//!
//! Configuration (environment variables):
//!   KEYMINT_PORT             - Listen port (default: 9109)
//!   KEYMINT_BIND             - Listen address (default: 0.0.0.0)
//!   KEYMINT_DATA_DIR         - Data directory for the file backend
//!                              (default: ./keymint-data)
//!   KEYMINT_MASTER_KEY_FILE  - Master key location
//!                              (default: {data_dir}/kds.mkey, created if absent)
//!   KEYMINT_BACKEND          - "file" or "memory" (default: file)
//!   KEYMINT_TICKET_LIFETIME  - Request/ticket lifetime in seconds (default: 3600)
//!   KEYMINT_SWEEP_INTERVAL   - Expired-record sweep interval in seconds,
//!                              0 disables (default: 300)
//!   KEYMINT_LOG_FORMAT       - "json" for structured logging, "pretty" for dev

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use keymint_core::{
    BackendKind, FileBackend, GroupKeyIssuer, KdsConfig, KdsError, KeyStore, MemoryBackend,
    RequestValidator, SignedRequest, StorageManager, TicketIssuer,
};
use keymint_crypto::CryptoEngine;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    storage: Arc<StorageManager>,
    validator: RequestValidator,
    tickets: TicketIssuer,
    group_keys: GroupKeyIssuer,
}

type Shared = Arc<AppState>;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ApiError {
    error: String,
}

/// The single place where core error kinds become HTTP statuses.
struct Failure(KdsError);

impl From<KdsError> for Failure {
    fn from(e: KdsError) -> Self {
        Self(e)
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            KdsError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            KdsError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            KdsError::KeyNotFound { .. } => StatusCode::NOT_FOUND,
            KdsError::GroupStatusChanged { .. } | KdsError::Conflict { .. } => {
                StatusCode::CONFLICT
            }
            KdsError::Crypto(_) | KdsError::Storage(_) | KdsError::Encoding(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // internal failures get a generic message; validation errors are
        // surfaced verbatim
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(ApiError { error: message })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Key endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct KeyInput {
    key: String,
}

#[derive(Serialize)]
struct KeyCreated {
    name: String,
    generation: u32,
}

async fn put_key(
    State(state): State<Shared>,
    Path(name): Path<String>,
    Json(body): Json<KeyInput>,
) -> Result<Json<KeyCreated>, Failure> {
    let key = B64
        .decode(&body.key)
        .map_err(|_| KdsError::BadRequest { field: "key" })?;
    let generation = state.storage.set_key(&name, &key, None)?;
    Ok(Json(KeyCreated { name, generation }))
}

async fn delete_key(
    State(state): State<Shared>,
    Path(name): Path<String>,
) -> Result<StatusCode, Failure> {
    if state.storage.delete_key(&name)? == 0 {
        return Err(KdsError::not_found(name, None).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Group endpoints
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GroupCreated {
    name: String,
}

async fn put_group(
    State(state): State<Shared>,
    Path(name): Path<String>,
) -> Result<Json<GroupCreated>, Failure> {
    if !state.storage.create_group(&name)? {
        return Err(KdsError::Conflict { name }.into());
    }
    Ok(Json(GroupCreated { name }))
}

async fn delete_group(
    State(state): State<Shared>,
    Path(name): Path<String>,
) -> Result<StatusCode, Failure> {
    if state.storage.delete_group(&name)? == 0 {
        return Err(KdsError::not_found(name, None).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Ticket and group-key issuance
// ---------------------------------------------------------------------------

async fn post_ticket(
    State(state): State<Shared>,
    Json(body): Json<SignedRequest>,
) -> Result<Response, Failure> {
    let validated = state.validator.validate_ticket(&body)?;
    let response = state.tickets.issue(&validated)?;
    Ok(Json(response).into_response())
}

async fn post_group_key(
    State(state): State<Shared>,
    Json(body): Json<SignedRequest>,
) -> Result<Response, Failure> {
    let validated = state.validator.validate_group_key(&body)?;
    let response = state.group_keys.issue(&validated)?;
    Ok(Json(response).into_response())
}

async fn health() -> &'static str {
    "ok"
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn config_from_env() -> KdsConfig {
    let defaults = KdsConfig::default();
    let data_dir: PathBuf = env_or("KEYMINT_DATA_DIR", defaults.data_dir.clone());

    let backend = match std::env::var("KEYMINT_BACKEND").as_deref() {
        Ok("memory") => BackendKind::Memory,
        _ => BackendKind::File,
    };

    KdsConfig {
        master_key_file: std::env::var("KEYMINT_MASTER_KEY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("kds.mkey")),
        crypto: defaults.crypto,
        ticket_lifetime: Duration::seconds(env_or("KEYMINT_TICKET_LIFETIME", 3600)),
        windows: defaults.windows,
        backend,
        data_dir,
        bind_address: env_or("KEYMINT_BIND", defaults.bind_address),
        port: env_or("KEYMINT_PORT", defaults.port),
        sweep_interval: Duration::seconds(env_or("KEYMINT_SWEEP_INTERVAL", 300)),
    }
}

#[tokio::main]
async fn main() {
    let log_format = std::env::var("KEYMINT_LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "keymint_api=info,keymint_core=info,tower_http=info".into());
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = config_from_env();

    if config.backend == BackendKind::File {
        std::fs::create_dir_all(&config.data_dir).expect("failed to create data directory");
    }

    let crypto = Arc::new(
        CryptoEngine::open(&config.master_key_file, config.crypto)
            .expect("failed to load or create the master key"),
    );

    let store: Arc<dyn KeyStore> = match config.backend {
        BackendKind::File => {
            let dir = config.data_dir.join("endpoints");
            Arc::new(FileBackend::open(dir).expect("failed to open the key repository"))
        }
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };

    let storage = Arc::new(StorageManager::new(store, crypto.clone(), config.windows));

    let state: Shared = Arc::new(AppState {
        storage: storage.clone(),
        validator: RequestValidator::new(storage.clone(), crypto.clone(), config.ticket_lifetime),
        tickets: TicketIssuer::new(crypto.clone(), config.ticket_lifetime),
        group_keys: GroupKeyIssuer::new(crypto, config.ticket_lifetime),
    });

    if config.sweep_interval > Duration::zero() {
        let sweeper = storage.clone();
        let every = config.sweep_interval.num_seconds() as u64;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(every));
            loop {
                interval.tick().await;
                if let Err(e) = sweeper.sweep(Utc::now()) {
                    tracing::warn!(error = %e, "sweep failed");
                }
            }
        });
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/keys/:name", put(put_key).delete(delete_key))
        .route("/v1/groups/:name", put(put_group).delete(delete_group))
        .route("/v1/tickets", post(post_ticket))
        .route("/v1/groups", post(post_group_key))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    tracing::info!(%addr, backend = ?config.backend, "starting keymint API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listen address");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("server error");
}
