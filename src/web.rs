use crate::{
    config::Config,
    errors::FetchError,
    metadata::{self, types::FetchRequest},
    scrape::PageRenderer,
};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    config: Arc<Config>,
    renderer: Arc<dyn PageRenderer>,
}

async fn start_app(config: Config, renderer: Arc<dyn PageRenderer>) {
    let listen_addr = config.listen_addr.clone();
    let shared_state = Arc::new(SharedState {
        config: Arc::new(config),
        renderer,
    });

    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    let app = Router::new()
        .route("/api/fetch", post(fetch))
        .route("/api/health", get(health))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await.unwrap();
    log::info!("listening on {listen_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

pub fn start_daemon(config: Config, renderer: Arc<dyn PageRenderer>) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(config, renderer).await });
}

struct HttpError(FetchError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            FetchError::Input(_) => axum::http::StatusCode::BAD_REQUEST,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

async fn fetch(
    State(state): State<Arc<SharedState>>,
    Json(request): Json<FetchRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let response =
        metadata::fetch_and_extract(&state.config, state.renderer.clone(), request)
            .await
            .map_err(HttpError)?;
    Ok(Json(response))
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}
