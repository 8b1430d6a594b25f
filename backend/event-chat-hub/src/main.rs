use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use event_chat_hub::{
    config, error, logging, middleware::RequestLogging, routes, state::AppState, websocket::Hub,
};
use std::sync::Arc;

fn cors(allowed_origins: &[String]) -> Cors {
    let cors = if allowed_origins.iter().any(|o| o == "*") {
        Cors::default().allow_any_origin()
    } else {
        allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

#[tokio::main]
async fn main() -> error::AppResult<()> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let hub = Hub::new(cfg.hub.clone());
    let eviction_task = hub
        .spawn_eviction_task()
        .ok_or_else(|| error::AppError::StartServer("eviction task already running".into()))?;

    let state = AppState::new(cfg.clone(), hub);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(
        %bind_addr,
        pong_wait_secs = cfg.hub.pong_wait.as_secs(),
        mailbox_capacity = cfg.hub.mailbox_capacity,
        "starting event-chat-hub"
    );

    // actix-web HttpServer futures are not Send, so it runs in the foreground
    let origins = cfg.cors_allowed_origins.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors(&origins))
            .wrap(RequestLogging)
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run();

    tokio::select! {
        res = server => {
            res.map_err(|e| error::AppError::StartServer(format!("http server: {e}")))?;
            tracing::info!("event-chat-hub stopped");
            Ok(())
        }
        res = eviction_task => {
            res.map_err(|e| error::AppError::StartServer(format!("eviction task: {e}")))?;
            Err(error::AppError::Internal)
        }
    }
}
