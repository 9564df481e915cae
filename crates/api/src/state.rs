//! Application state

use std::sync::Arc;

use receiptly_billing::BillingService;
use receiptly_shared::Config;
use sqlx::PgPool;

use crate::auth::JwtManager;
use crate::processor::HttpProcessor;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, 24);

        let processor = Arc::new(HttpProcessor::new(
            config.processor_base_url.clone(),
            config.processor_api_key.clone(),
            config.processor_timeout,
        ));
        if config.processor_api_key.is_empty() {
            tracing::warn!("PROCESSOR_API_KEY not set - processor calls will be unauthenticated");
        }

        let billing = Arc::new(BillingService::new(
            pool.clone(),
            config.catalog_cache_ttl,
            config.webhook_secret.clone(),
            processor,
        ));
        tracing::info!("Billing service initialized");

        Self {
            pool,
            config,
            jwt_manager,
            billing,
        }
    }
}
