use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{dev::ServerHandle, web, App, HttpServer};
use awc::ws;
use event_chat_hub::config::{Config, HubConfig};
use event_chat_hub::middleware::auth::Claims;
use event_chat_hub::routes;
use event_chat_hub::state::AppState;
use event_chat_hub::websocket::{Hub, UserId};
use futures_util::{Stream, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;

pub const SECRET: &str = "integration-secret";

pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
    pub hub: Hub,
}

impl TestServer {
    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("http://{}/api/ws?token={token}", self.addr),
            None => format!("http://{}/api/ws", self.addr),
        }
    }
}

pub async fn start_hub_server(hub_config: HubConfig) -> std::io::Result<TestServer> {
    let config = Arc::new(Config {
        port: 0,
        jwt_secret: SECRET.to_string(),
        cors_allowed_origins: vec!["*".to_string()],
        hub: hub_config.clone(),
    });
    let hub = Hub::new(hub_config);
    hub.spawn_eviction_task();
    let state = AppState::new(config, hub.clone());

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .workers(1)
    .shutdown_timeout(1)
    .listen(listener)?
    .run();

    let handle = server.handle();
    actix_rt::spawn(server);
    Ok(TestServer { addr, handle, hub })
}

pub fn token_for(user_id: UserId) -> String {
    encode(
        &Header::default(),
        &Claims { user_id, exp: None },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("mint token")
}

/// Poll `check` until it holds or a second passes
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(1), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

/// Next text frame as JSON, skipping control frames
pub async fn next_json<S>(conn: &mut S) -> Value
where
    S: Stream<Item = Result<ws::Frame, awc::error::WsProtocolError>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(1), conn.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("frame data");
        match frame {
            ws::Frame::Text(bytes) => {
                return serde_json::from_slice(&bytes).expect("frame is json");
            }
            ws::Frame::Ping(_) | ws::Frame::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Asserts no text frame arrives within a short window
pub async fn assert_silent<S>(conn: &mut S)
where
    S: Stream<Item = Result<ws::Frame, awc::error::WsProtocolError>> + Unpin,
{
    let got = tokio::time::timeout(Duration::from_millis(100), conn.next()).await;
    if let Ok(Some(Ok(ws::Frame::Text(bytes)))) = got {
        panic!("unexpected frame: {}", String::from_utf8_lossy(&bytes));
    }
}
