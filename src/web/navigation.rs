use std::sync::Mutex;

use axum::response::Redirect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Bills,
    NewBill,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/",
            Route::Bills => "/bills",
            Route::NewBill => "/bill/new",
        }
    }
}

pub trait Navigator: Send + Sync {
    fn on_navigate(&self, route: Route);
}

/// Records the last requested route so a handler can answer with a redirect
#[derive(Debug, Default)]
pub struct RedirectNavigator {
    target: Mutex<Option<Route>>,
}

impl RedirectNavigator {
    pub fn target(&self) -> Option<Route> {
        self.target.lock().ok().and_then(|t| *t)
    }

    pub fn redirect(&self) -> Option<Redirect> {
        self.target().map(|route| Redirect::to(route.path()))
    }
}

impl Navigator for RedirectNavigator {
    fn on_navigate(&self, route: Route) {
        tracing::debug!("navigating to {}", route.path());
        if let Ok(mut target) = self.target.lock() {
            *target = Some(route);
        }
    }
}
