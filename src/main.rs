use axum::extract::FromRef;
use config::{Environment, File};
use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tower_sessions::ExpiredDeletion;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{Layer, layer::SubscriberExt};

use crate::{
    db::{bill::BillsGateway, receipt::ReceiptStore, user::UserStore},
    web::{
        bill::list_view::BillViews,
        rate_limit::{RateLimiter, RateLimits},
        session::InMemSessionStore,
    },
};

mod db;
mod web;

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, serde::Deserialize)]
pub struct Config {
    pub address: std::net::SocketAddr,
    pub domain: String,
    pub cookie_secure: bool,
    pub log_level: String,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    pub db_host: String,
    pub max_receipt_size_bytes: usize,
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: i64,
}

impl Config {
    pub fn new() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(File::with_name(&format!(
                "{}/config/config.toml",
                env!("CARGO_MANIFEST_DIR")
            )))
            .add_source(Environment::with_prefix("EXPENSES").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn db_connection_string(&self) -> String {
        let db_name = if self.db_name.is_empty() {
            "".to_string()
        } else {
            format!("/{}", self.db_name)
        };
        format!(
            "postgres://{}:{}@{}?host={}",
            self.db_user, self.db_password, db_name, self.db_host
        )
    }
}

#[derive(Clone, FromRef)]
pub struct Ctx {
    pub bills_gateway: Arc<dyn BillsGateway>,
    pub receipt_store: Arc<dyn ReceiptStore>,
    pub user_store: Arc<dyn UserStore>,
    pub config: Config,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub session_store: InMemSessionStore,
    pub bill_views: BillViews,
}

impl Ctx {
    pub async fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        let db = db::PostgresStore::new(&cfg.db_connection_string()).await?;
        db.init().await?;
        let store = Arc::new(db);

        let session_store = InMemSessionStore::default();

        // Delete expired sessions regularly
        let expiring = session_store.clone();
        tokio::spawn(async move {
            if let Err(e) = expiring
                .continuously_delete_expired(SESSION_CLEANUP_INTERVAL)
                .await
            {
                error!("Error deleting expired sessions: {e}");
            }
        });

        Ok(Self {
            bills_gateway: store.clone(),
            receipt_store: store.clone(),
            user_store: store,
            config: cfg.to_owned(),
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(RateLimits::new(
                cfg.rate_limit_requests,
                cfg.rate_limit_window_secs,
            )))),
            session_store,
            bill_views: BillViews::default(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cfg = Config::new()?;

    tracing_log::LogTracer::init()?;
    let level_filter = LevelFilter::from_str(&cfg.log_level)?;
    let stdout_log = tracing_subscriber::fmt::layer().with_filter(level_filter);
    let subscriber = tracing_subscriber::registry().with(stdout_log);
    tracing::subscriber::set_global_default(subscriber)?;

    if let Ok(listener) = tokio::net::TcpListener::bind(&cfg.address).await {
        info!(
            "Expense portal running at http://{} with log-level={}",
            cfg.address, cfg.log_level
        );
        let ctx = Ctx::new(&cfg).await?;
        let router = web::router(ctx, &cfg);
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_handler())
        .await?;
    } else {
        error!("Failed to bind to listen address {}", &cfg.address);
    }

    Ok(())
}

async fn shutdown_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install ctrl_c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
