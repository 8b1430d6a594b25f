use actix_web::web;

use crate::metrics;

pub mod wsroute;

/// Mount every HTTP and WebSocket route on an app
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(wsroute::ws_handler)
        .route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(metrics::serve_metrics));
}
