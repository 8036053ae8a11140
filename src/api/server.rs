//! API Server Module
//!
//! Consolidates application state and wires the core components together
//! from configuration: object store, metadata store, service key, tile
//! log (with startup recovery) and registration service.

use std::sync::Arc;

use crate::common::config::ServiceConfig;
use crate::common::error::Result;
use crate::cose::ServiceKey;
use crate::registry::RegistrationService;
use crate::storage::{build_object_store, MetadataStore, ObjectStore, SqliteMetadataStore};
use crate::tlog::{CheckpointSigner, TileLog};

/// Combined application state for all API endpoints
pub struct AppState {
    pub config: ServiceConfig,
    pub store: Arc<dyn ObjectStore>,
    pub meta: Arc<dyn MetadataStore>,
    pub key: Arc<ServiceKey>,
    pub log: Arc<TileLog>,
    pub service: Arc<RegistrationService>,
}

/// Shared application state type
pub type SharedAppState = Arc<AppState>;

impl AppState {
    /// Build the full component stack from configuration.
    pub async fn build(config: ServiceConfig) -> Result<SharedAppState> {
        let store = build_object_store(&config.storage)?;
        let meta: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(
            &config.database.path,
            config.database.enable_wal,
        )?);

        let (key, created) =
            ServiceKey::load_or_generate(&config.keys.private, &config.keys.public)?;
        let key = Arc::new(key);
        if created {
            tracing::info!(kid = key.kid(), "generated new service key pair");
        }
        meta.record_service_key(key.kid(), &key.public_jwk().to_string())
            .await?;

        let signer = CheckpointSigner::new(key.signing_key().clone(), &config.origin)?;
        let log = Arc::new(TileLog::open(store.clone(), meta.clone(), signer).await?);
        tracing::info!(tree_size = log.size().await, origin = %config.origin, "log opened");

        let service = Arc::new(RegistrationService::new(
            log.clone(),
            meta.clone(),
            key.clone(),
            config.origin.clone(),
            config.registration_policy.verify_signatures,
        ));

        Ok(Arc::new(Self {
            config,
            store,
            meta,
            key,
            log,
            service,
        }))
    }
}
