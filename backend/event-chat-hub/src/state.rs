use crate::{
    config::Config,
    middleware::auth::{ChannelAccess, IdentityVerifier, JwtIdentityVerifier, OpenChannelAccess},
    websocket::Hub,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub identity: Arc<dyn IdentityVerifier>,
    /// Consulted on every `join`; open by default
    pub channel_access: Arc<dyn ChannelAccess>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Production wiring: JWT identity and open channel access
    pub fn new(config: Arc<Config>, hub: Hub) -> Self {
        Self {
            hub,
            identity: Arc::new(JwtIdentityVerifier::new(&config.jwt_secret)),
            channel_access: Arc::new(OpenChannelAccess),
            config,
        }
    }
}
