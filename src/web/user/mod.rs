use axum::{
    Form,
    extract::State,
    response::{IntoResponse, Redirect},
};
use tower_sessions::Session;
use tracing::{error, info, warn};

mod data;

use crate::{
    Ctx,
    db::user::{Role, User},
    web::{
        Result,
        csrf::{gen_csrf, verify_csrf},
        error::Error,
        navigation::Route,
        rate_limit::RealIp,
        session::{Auth, SESSION_USER, SessionUser},
        templates::{HtmlTemplate, LoginTemplate, Nav},
        user::data::LoginData,
    },
};

#[tracing::instrument(level = tracing::Level::DEBUG, skip(auth, session))]
pub async fn login(session: Session, auth: Auth) -> Result<impl IntoResponse> {
    if auth.0.is_some() {
        return Ok(Redirect::to(Route::Bills.path()).into_response());
    }
    let template = LoginTemplate {
        nav: Nav::new(None, Route::Login),
        csrf_token: gen_csrf(&session).await.map_err(|_| Error::Internal)?,
    };
    Ok(HtmlTemplate(template).into_response())
}

/// Logs a known user in. An unknown email gets a new employee account,
/// admin accounts are never created here.
#[tracing::instrument(level = tracing::Level::DEBUG, skip(ctx, session, payload))]
pub async fn do_login(
    RealIp(ip): RealIp,
    session: Session,
    State(ctx): State<Ctx>,
    Form(payload): Form<LoginData>,
) -> Result<impl IntoResponse> {
    let email = payload.email.trim().to_lowercase();
    let mut rate_limiter = ctx.rate_limiter.lock().await;
    let allowed = rate_limiter.check(&ip.to_string(), Some(&email));
    drop(rate_limiter);
    if !allowed {
        warn!("Rate limited login from {} for {}", ip, email);
        return Err(Error::TooManyRequests);
    }

    verify_csrf(&payload.csrf_token, &session)
        .await
        .map_err(|_| Error::Unauthorized)?;
    if !payload.validate() {
        return Err(Error::BadRequest("invalid payload".to_string()));
    }

    let user = match ctx.user_store.get_by_email(&email).await {
        Ok(Some(u)) => {
            if u.role != payload.role || !u.verify_password(&payload.password) {
                return Err(Error::Unauthorized);
            }
            u
        }
        Ok(None) if payload.role == Role::Employee => {
            let user = User::new(&email, Role::Employee, &payload.password).map_err(|e| {
                error!("error hashing password for {email}: {e}");
                Error::Internal
            })?;
            ctx.user_store.create_user(&user).await.map_err(|e| {
                error!("error creating user {email}: {e}");
                Error::Internal
            })?;
            info!("Created employee account {email}");
            user
        }
        Ok(None) => return Err(Error::Unauthorized),
        Err(e) => {
            error!("error fetching user {email}: {e}");
            return Err(Error::Unauthorized);
        }
    };

    // a fresh session id on privilege change
    session.cycle_id().await.map_err(|e| {
        error!("error cycling session id: {e}");
        Error::Internal
    })?;
    session
        .insert(
            SESSION_USER,
            SessionUser {
                role: user.role,
                email: Some(user.email.clone()),
            },
        )
        .await
        .map_err(|e| {
            error!("error putting user in session: {e}");
            Error::Internal
        })?;

    Ok(Redirect::to(Route::Bills.path()).into_response())
}

#[tracing::instrument(level = tracing::Level::DEBUG, skip(ctx, session))]
pub async fn logout(
    State(ctx): State<Ctx>,
    session: Session,
    Auth(user): Auth,
) -> Result<impl IntoResponse> {
    if let Some(user) = user {
        ctx.bill_views.forget(user.email()).await;
    }
    session.delete().await.map_err(|e| {
        error!("Error logging out: {e}");
        Error::Internal
    })?;
    Ok(Redirect::to(Route::Login.path()))
}
