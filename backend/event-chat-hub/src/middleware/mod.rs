pub mod auth;
pub mod logging;

pub use auth::{
    AuthError, ChannelAccess, Claims, IdentityVerifier, JwtIdentityVerifier, OpenChannelAccess,
};
pub use logging::RequestLogging;
