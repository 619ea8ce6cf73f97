mod handlers;

use std::{
    fs::{self, File},
    io::BufReader,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{Router, extract::FromRef, http::StatusCode};
use repopush_core::config::{Config, GitHubConfig};
use repopush_db::Database;
use repopush_github::{GitHubClient, RepoApi};
use repopush_jobs::{JobContext, Worker};
use repopush_publish::PublishEngine;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt,
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore, cookie::SameSite};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    db: Database,
    github: Arc<GitHubClient>,
}

impl FromRef<AppState> for GitHubConfig {
    fn from_ref(state: &AppState) -> Self { state.config.github.clone() }
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config: Arc<Config> = {
        let file = BufReader::new(File::open("config.yml").expect("Failed to open config file"));
        serde_yaml::from_reader(file).expect("Failed to parse config file")
    };
    fs::create_dir_all(&config.upload.dir).expect("Failed to create upload directory");
    let db = Database::new(&config.db).await.expect("Failed to open database");
    let github =
        Arc::new(GitHubClient::new(&config.github.api_base).expect("Failed to create GitHub client"));
    let api: Arc<dyn RepoApi> = github.clone();
    let engine = Arc::new(PublishEngine::new(api, config.publish.clone()));

    let state = AppState { config: config.clone(), db: db.clone(), github };

    // Create session store
    let session_store = SqliteStore::new(db.pool.clone());
    session_store.migrate().await.expect("Failed to migrate session store");

    // Start the single background worker; request handlers only enqueue and
    // query, they never block on the publish engine.
    let worker = Worker::new(JobContext { config: config.clone(), db: db.clone(), engine });
    let worker_task = tokio::spawn(worker.run(shutdown_signal()));

    let router = app(state, session_store);
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
    tracing::info!("Web server: Listening on {}", addr);
    let listener = TcpListener::bind(addr).await.expect("bind error");
    if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await {
        tracing::error!("Web server error: {e}");
    }
    tracing::info!("Web server stopped");

    if let Err(e) = worker_task.await {
        tracing::error!("Worker task error: {e}");
    }
    db.close().await;
    tracing::info!("Shut down gracefully");
}

fn app(state: AppState, session_store: impl SessionStore + Clone) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(120),
        ))
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(
            SessionManagerLayer::new(session_store)
                .with_secure(false)
                .with_same_site(SameSite::Lax)
                .with_expiry(Expiry::OnInactivity(time::Duration::days(30))),
        )
        .compression();
    handlers::build_router().with_state(state).layer(middleware)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler");
        tokio::select! {
            result = signal::ctrl_c() => result.expect("Failed to listen for ctrl-c"),
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to listen for ctrl-c");
    }
}
