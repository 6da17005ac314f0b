mod jobs;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use chatty_api::middleware::require_auth;
use chatty_api::{auth, chats, files, messages, push, settings};
use chatty_auth::{LivenessStore, TokenAuthority, tokens::TokenKeys};
use chatty_gateway::{GatewayState, connection, registry::Registry};
use chatty_push::{HttpPushProvider, Notifier};

struct Config {
    access_secret: String,
    refresh_secret: String,
    db_path: String,
    host: String,
    port: u16,
    push_endpoint: String,
    push_server_key: String,
    liveness_ttl_secs: u64,
    daily_purge_hour: u32,
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        let access_secret = std::env::var("CHATTY_ACCESS_SECRET")
            .unwrap_or_else(|_| "dev-access-secret-change-me".into());
        let refresh_secret = std::env::var("CHATTY_REFRESH_SECRET")
            .unwrap_or_else(|_| "dev-refresh-secret-change-me".into());
        let db_path = std::env::var("CHATTY_DB_PATH").unwrap_or_else(|_| "chatty.db".into());
        let host = std::env::var("CHATTY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("CHATTY_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()?;
        let push_endpoint = std::env::var("CHATTY_PUSH_ENDPOINT")
            .unwrap_or_else(|_| "https://fcm.googleapis.com/fcm/send".into());
        let push_server_key = std::env::var("CHATTY_PUSH_SERVER_KEY").unwrap_or_default();
        let liveness_ttl_secs: u64 = std::env::var("CHATTY_LIVENESS_TTL_SECS")
            .unwrap_or_else(|_| "1800".into())
            .parse()?;
        let daily_purge_hour: u32 = std::env::var("CHATTY_DAILY_PURGE_HOUR")
            .unwrap_or_else(|_| "18".into())
            .parse()?;
        anyhow::ensure!(daily_purge_hour < 24, "CHATTY_DAILY_PURGE_HOUR must be 0-23");

        Ok(Self {
            access_secret,
            refresh_secret,
            db_path,
            host,
            port,
            push_endpoint,
            push_server_key,
            liveness_ttl_secs,
            daily_purge_hour,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatty=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(chatty_db::Database::open(&PathBuf::from(&config.db_path))?);

    let authority = Arc::new(TokenAuthority::new(
        TokenKeys::new(config.access_secret.clone(), config.refresh_secret.clone()),
        LivenessStore::new(Duration::from_secs(config.liveness_ttl_secs)),
    ));
    let notifier = Arc::new(Notifier::new(
        Arc::clone(&db),
        HttpPushProvider::new(config.push_endpoint.clone(), config.push_server_key.clone()),
    ));

    let state = GatewayState {
        registry: Registry::new(),
        db: Arc::clone(&db),
        authority,
        notifier,
    };

    tokio::spawn(jobs::run_auto_delete_loop(Arc::clone(&db)));
    tokio::spawn(jobs::run_daily_purge_loop(
        Arc::clone(&db),
        config.daily_purge_hour,
    ));

    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/sign-in", post(auth::sign_in))
        .route("/auth/refresh-token", post(auth::refresh_token))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/info", get(auth::info))
        .route("/auth/force-logout/{user_id}", delete(auth::force_logout))
        .route("/auth/force-logout-all", delete(auth::force_logout_all))
        .route("/chats", post(chats::create_chat).get(chats::list_chats))
        .route("/chats/private", post(chats::create_private_chat).get(chats::list_private_chats))
        .route("/chats/{chat_id}", axum::routing::patch(chats::update_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(messages::list_messages).post(messages::create_message),
        )
        .route("/files", post(files::upload_file))
        .route("/files/{file_id}", get(files::download_file))
        .route("/push/tokens", post(push::register_device_token))
        .route(
            "/settings/chat-auto-delete",
            get(settings::get_auto_delete).put(settings::set_auto_delete),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Chatty server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
    #[serde(rename = "refreshToken")]
    refresh_token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state, query.token, query.refresh_token)
    })
}
