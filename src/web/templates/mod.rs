use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::{
    db::bill::ExpenseType,
    web::{
        bill::data::{BillForList, ErrorBanner, NewBillFields},
        navigation::Route,
        session::SessionUser,
    },
};

use super::error::Error;

const ICON: &str = "icon";
const ACTIVE_ICON: &str = "icon active-icon";

pub struct HtmlTemplate<T>(pub T);

impl<T> IntoResponse for HtmlTemplate<T>
where
    T: Template,
{
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(e) => {
                tracing::error!("Error rendering template: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error rendering template",
                )
                    .into_response()
            }
        }
    }
}

/// Layout data: who is logged in and which nav icon is highlighted
#[derive(Debug, Clone)]
pub struct Nav {
    pub user: Option<SessionUser>,
    pub window_class: &'static str,
    pub mail_class: &'static str,
}

impl Nav {
    pub fn new(user: Option<SessionUser>, active: Route) -> Self {
        let class = |route: Route| if route == active { ACTIVE_ICON } else { ICON };
        Self {
            user,
            window_class: class(Route::Bills),
            mail_class: class(Route::NewBill),
        }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub nav: Nav,
    pub error: String,
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub nav: Nav,
    pub csrf_token: String,
}

#[derive(Template)]
#[template(path = "bills.html")]
pub struct BillsTemplate {
    pub nav: Nav,
    pub rows: Vec<BillForList>,
    pub error: Option<ErrorBanner>,
    pub show_owner: bool,
}

#[derive(Template)]
#[template(path = "bill_preview.html")]
pub struct BillPreviewTemplate {
    pub nav: Nav,
    pub bill_name: String,
    pub receipt_name: String,
    pub receipt_url: String,
}

#[derive(Debug, Clone)]
pub struct ExpenseOption {
    pub label: &'static str,
    pub selected: bool,
}

impl ExpenseOption {
    pub fn all(selected: &str) -> Vec<Self> {
        ExpenseType::ALL
            .iter()
            .map(|t| Self {
                label: t.label(),
                selected: t.label() == selected,
            })
            .collect()
    }
}

#[derive(Template)]
#[template(path = "new_bill.html")]
pub struct NewBillTemplate {
    pub nav: Nav,
    pub csrf_token: String,
    pub expense_types: Vec<ExpenseOption>,
    pub fields: NewBillFields,
    pub file_name: String,
    pub warning: Option<&'static str>,
    pub error: Option<ErrorBanner>,
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let response = match self {
            Error::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("Internal Server Error"),
            ),
            Error::Unauthorized => (StatusCode::UNAUTHORIZED, String::from("Unauthorized")),
            Error::Forbidden => (StatusCode::FORBIDDEN, String::from("Forbidden")),
            Error::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                String::from("Please try again later"),
            ),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        (
            response.0,
            HtmlTemplate(ErrorTemplate {
                nav: Nav::new(None, Route::Login),
                error: response.1,
            }),
        )
            .into_response()
    }
}
