use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use tower_sessions::Session;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    Ctx,
    db::user::Role,
    web::{
        Result,
        bill::{
            data::{ErrorBanner, NewBillFields, UploadCandidate},
            list_view::BillListView,
            new_bill::{NewBillForm, SubmitError, ValidationResult},
        },
        csrf::{gen_csrf, verify_csrf},
        error::Error,
        navigation::{RedirectNavigator, Route},
        rate_limit::RealIp,
        session::{AuthUser, SessionUser},
        templates::{BillPreviewTemplate, ExpenseOption, HtmlTemplate, Nav, NewBillTemplate},
    },
};

async fn list_view(ctx: &Ctx, user: SessionUser, navigator: Arc<RedirectNavigator>) -> BillListView {
    let state = ctx.bill_views.for_user(&user).await;
    BillListView::new(ctx.bills_gateway.clone(), navigator, user, state)
}

#[tracing::instrument(level = tracing::Level::DEBUG, skip(ctx))]
pub async fn list(State(ctx): State<Ctx>, AuthUser(user): AuthUser) -> Result<impl IntoResponse> {
    let view = list_view(&ctx, user, Arc::new(RedirectNavigator::default())).await;
    let markup = view.mount().await.map_err(|e| {
        error!("Error rendering bill list: {e}");
        Error::Internal
    })?;
    Ok(Html(markup))
}

#[tracing::instrument(level = tracing::Level::DEBUG, skip(ctx))]
pub async fn click_new_bill(
    State(ctx): State<Ctx>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse> {
    let navigator = Arc::new(RedirectNavigator::default());
    list_view(&ctx, user, navigator.clone())
        .await
        .handle_click_new_bill();
    Ok(navigator
        .redirect()
        .unwrap_or_else(|| Redirect::to(Route::Bills.path())))
}

#[tracing::instrument(level = tracing::Level::DEBUG, skip(ctx))]
pub async fn preview(
    State(ctx): State<Ctx>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let parsed_id = Uuid::from_str(&id).map_err(|_| Error::BadRequest("invalid id".to_string()))?;
    let nav = Nav::new(Some(user.clone()), Route::Bills);
    let view = list_view(&ctx, user, Arc::new(RedirectNavigator::default())).await;

    let bill = match view.find_bill(&parsed_id).await {
        Ok(Some(bill)) => bill,
        Ok(None) => return Err(Error::NotFound("bill not found".to_string())),
        Err(e) => {
            error!("Error fetching bill {id}: {e}");
            return Err(Error::Internal);
        }
    };
    let modal = view.handle_preview_requested(&bill.receipt_url);

    Ok(HtmlTemplate(BillPreviewTemplate {
        nav,
        bill_name: bill.name,
        receipt_name: bill.receipt_name,
        receipt_url: modal.receipt_url,
    }))
}

/// Serves a receipt to its owner or an admin. Anyone else gets the same 404
/// as for an unknown id.
#[tracing::instrument(level = tracing::Level::DEBUG, skip(ctx))]
pub async fn receipt(
    State(ctx): State<Ctx>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let parsed_id = Uuid::from_str(&id).map_err(|_| Error::BadRequest("invalid id".to_string()))?;
    match ctx.receipt_store.get_receipt(&parsed_id).await {
        Ok(Some(receipt)) if user.is_admin() || receipt.owner == user.email() => Ok((
            [
                (header::CONTENT_TYPE, served_content_type(&receipt.content_type)),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            ],
            [(
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", header_safe(&receipt.file_name)),
            )],
            receipt.content,
        )),
        Ok(Some(_)) => {
            warn!("{} asked for receipt {id} of another employee", user.email());
            Err(Error::NotFound("receipt not found".to_string()))
        }
        Ok(None) => Err(Error::NotFound("receipt not found".to_string())),
        Err(e) => {
            error!("Error fetching receipt {id}: {e}");
            Err(Error::Internal)
        }
    }
}

fn served_content_type(stored: &str) -> &'static str {
    match stored {
        "image/png" => "image/png",
        "image/jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn header_safe(file_name: &str) -> String {
    file_name
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && *c != '"' && *c != '\\')
        .collect()
}

struct FormView<'a> {
    user: &'a SessionUser,
    csrf_token: String,
    fields: NewBillFields,
    file_name: String,
    warning: Option<&'static str>,
    error: Option<ErrorBanner>,
}

impl FormView<'_> {
    fn into_response(self, status: StatusCode) -> Response {
        let template = NewBillTemplate {
            nav: Nav::new(Some(self.user.clone()), Route::NewBill),
            csrf_token: self.csrf_token,
            expense_types: ExpenseOption::all(&self.fields.expense_type),
            fields: self.fields,
            file_name: self.file_name,
            warning: self.warning,
            error: self.error,
        };
        (status, HtmlTemplate(template)).into_response()
    }
}

fn require_employee(user: &SessionUser) -> Result<()> {
    if user.role != Role::Employee {
        return Err(Error::Forbidden);
    }
    Ok(())
}

#[tracing::instrument(level = tracing::Level::DEBUG, skip(session))]
pub async fn new_bill(session: Session, AuthUser(user): AuthUser) -> Result<impl IntoResponse> {
    require_employee(&user)?;
    let csrf_token = gen_csrf(&session).await.map_err(|_| Error::Internal)?;
    Ok(FormView {
        user: &user,
        csrf_token,
        fields: NewBillFields::default(),
        file_name: String::new(),
        warning: None,
        error: None,
    }
    .into_response(StatusCode::OK))
}

struct SubmittedForm {
    csrf_token: String,
    fields: NewBillFields,
    file: Option<UploadCandidate>,
}

async fn read_new_bill_form(mut multipart: Multipart, max_file_size: usize) -> Result<SubmittedForm> {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        warn!("Error reading new bill form: {e}");
        Error::BadRequest("invalid form".to_string())
    };

    let mut form = SubmittedForm {
        csrf_token: String::new(),
        fields: NewBillFields::default(),
        file: None,
    };
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_owned();
        if name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_owned();
            let content_type = field.content_type().unwrap_or_default().to_owned();
            let content = field.bytes().await.map_err(bad_request)?;
            if file_name.is_empty() && content.is_empty() {
                continue; // nothing selected
            }
            if content.len() > max_file_size {
                return Err(Error::BadRequest("receipt too large".to_string()));
            }
            form.file = Some(UploadCandidate {
                file_name,
                content_type,
                content: content.to_vec(),
            });
            continue;
        }

        let value = field.text().await.map_err(bad_request)?;
        match name.as_str() {
            "csrf_token" => form.csrf_token = value,
            "expense-type" => form.fields.expense_type = value,
            "expense-name" => form.fields.name = value,
            "datepicker" => form.fields.date = value,
            "amount" => form.fields.amount = value,
            "vat" => form.fields.vat = value,
            "pct" => form.fields.pct = value,
            "commentary" => form.fields.commentary = value,
            _ => (),
        }
    }
    Ok(form)
}

#[tracing::instrument(level = tracing::Level::DEBUG, skip(ctx, session, multipart, ip))]
pub async fn do_new_bill(
    RealIp(ip): RealIp,
    session: Session,
    State(ctx): State<Ctx>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> Result<Response> {
    require_employee(&user)?;

    let mut rate_limiter = ctx.rate_limiter.lock().await;
    let allowed = rate_limiter.check(&ip.to_string(), Some(user.email()));
    drop(rate_limiter);
    if !allowed {
        warn!("Rate limited new bill from {} for {}", ip, user.email());
        return Err(Error::TooManyRequests);
    }

    let submitted = read_new_bill_form(multipart, ctx.config.max_receipt_size_bytes).await?;
    verify_csrf(&submitted.csrf_token, &session)
        .await
        .map_err(|_| Error::Unauthorized)?;

    let navigator = Arc::new(RedirectNavigator::default());
    let mut form = NewBillForm::new(ctx.bills_gateway.clone(), navigator.clone(), user.clone());
    let page = |form: &NewBillForm, fields: NewBillFields, error: Option<ErrorBanner>| FormView {
        user: &user,
        csrf_token: submitted.csrf_token.clone(),
        fields,
        file_name: form.file_input_value().to_owned(),
        warning: form.warning(),
        error,
    };

    if let Some(file) = submitted.file
        && let ValidationResult::Rejected { .. } = form.handle_file_selected(file)
    {
        return Ok(page(&form, submitted.fields, None).into_response(StatusCode::BAD_REQUEST));
    }

    match form.handle_submit(&submitted.fields).await {
        Ok(_) => Ok(navigator
            .redirect()
            .unwrap_or_else(|| Redirect::to(Route::Bills.path()))
            .into_response()),
        Err(SubmitError::Invalid(e)) => {
            let banner = ErrorBanner {
                class: "error-generic",
                message: e.to_string(),
            };
            Ok(page(&form, submitted.fields, Some(banner)).into_response(StatusCode::BAD_REQUEST))
        }
        Err(SubmitError::Gateway(e)) => {
            tracing::debug!("new bill submit ended in {:?}", form.state());
            let banner = ErrorBanner::from(&e);
            Ok(page(&form, submitted.fields, Some(banner)).into_response(StatusCode::BAD_GATEWAY))
        }
    }
}
