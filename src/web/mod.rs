use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tower_sessions::{
    Expiry, SessionManagerLayer,
    cookie::{SameSite, time::Duration},
};

use crate::{Config, Ctx};

pub mod bill;
mod csrf;
mod error;
pub mod navigation;
pub mod rate_limit;
pub mod session;
mod templates;
mod user;

pub type Result<T> = std::result::Result<T, error::Error>;

pub const SESSION_EXPIRATION_SEC: i64 = 60 * 30; // 30 min
pub const CSRF_TOKEN: &str = "csrf_token";

/// Room for the text fields next to the receipt
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn router(ctx: Ctx, cfg: &Config) -> Router {
    let sessions = SessionManagerLayer::new(ctx.session_store.clone())
        .with_secure(cfg.cookie_secure)
        .with_domain(cfg.domain.clone())
        .with_same_site(SameSite::Strict)
        .with_expiry(Expiry::OnInactivity(Duration::seconds(
            SESSION_EXPIRATION_SEC,
        )))
        .with_http_only(true);

    let web = Router::new()
        .nest_service(
            "/static",
            ServeDir::new(format!("{}/static", env!("CARGO_MANIFEST_DIR"))),
        )
        .route("/health", get(health))
        .route("/", get(user::login))
        .route("/login", post(user::do_login))
        .route("/logout", get(user::logout))
        .route("/bills", get(bill::ssr::list))
        .route("/bills/new-bill", post(bill::ssr::click_new_bill))
        .route("/bills/{id}/preview", get(bill::ssr::preview))
        .route(
            "/bill/new",
            get(bill::ssr::new_bill).post(bill::ssr::do_new_bill).layer(
                DefaultBodyLimit::max(cfg.max_receipt_size_bytes + FORM_OVERHEAD_BYTES),
            ),
        )
        .route("/receipts/{id}", get(bill::ssr::receipt))
        .layer(sessions)
        .layer(TraceLayer::new_for_http());
    Router::new().merge(web).with_state(ctx)
}

async fn health() -> Result<&'static str> {
    Ok("OK")
}
