use std::{sync::Arc, time::Duration};

use relaygate_auth::AuthVerifier;
use relaygate_bus::BusClient;
use relaygate_cache::SessionCache;
use relaygate_dispatcher::Dispatcher;

/// Shared gateway runtime state, wrapped in `Arc` for use across connection
/// tasks (`SPEC_FULL.md` §4.E).
pub struct GatewayState {
    pub bus: Arc<dyn BusClient>,
    pub cache: Arc<dyn SessionCache>,
    pub auth: Arc<AuthVerifier>,
    pub dispatcher: Arc<Dispatcher>,
    pub stream_path: String,
    pub ws_keepalive: Duration,
}

impl GatewayState {
    #[must_use]
    pub fn new(
        bus: Arc<dyn BusClient>,
        cache: Arc<dyn SessionCache>,
        auth: Arc<AuthVerifier>,
        dispatcher: Arc<Dispatcher>,
        stream_path: String,
        ws_keepalive: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            cache,
            auth,
            dispatcher,
            stream_path,
            ws_keepalive,
        })
    }
}

/// Axum router state. A thin `Clone` wrapper around `GatewayState` following
/// the teacher's `AppState` shape (cheap to clone, one `Arc` field).
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}
