use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use gatekey_forwarder::{ProviderFamily, UnaryResponse};

/// Everything about an inbound request the orchestrator needs beyond the
/// forwarded payload itself: who's asking, and for the audit log, under
/// which tenant alias.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub request_id: String,
    pub tenant_alias: Option<String>,
    pub family: ProviderFamily,
}

pub enum HandleOutcome {
    Unary(UnaryResponse),
    Stream(Pin<Box<dyn Stream<Item = Bytes> + Send>>),
}
