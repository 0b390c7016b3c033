use std::sync::Arc;

use gatekey_keystore::SeaOrmKeyStore;
use gatekey_orchestrator::RetryOrchestrator;
use gatekey_scheduler::KeyScheduler;

/// Everything the axum handlers need, shared behind `Arc` clones per request.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: KeyScheduler<SeaOrmKeyStore>,
    pub orchestrator: RetryOrchestrator<SeaOrmKeyStore>,
    pub admin_key: Arc<String>,
}
