use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use askama::Template;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    db::bill::{BillRecord, BillScope, BillsGateway, GatewayError},
    web::{
        SESSION_EXPIRATION_SEC,
        bill::data::{BillForList, ErrorBanner, PreviewModal},
        navigation::{Navigator, Route},
        session::SessionUser,
        templates::{BillsTemplate, Nav},
    },
};

/// What a user's bill list showed last, kept across mounts
#[derive(Debug, Default)]
pub struct ListViewState {
    generation: AtomicU64,
    records: Mutex<Option<Vec<BillRecord>>>,
    preview_requests: AtomicUsize,
}

impl ListViewState {
    pub fn preview_requests(&self) -> usize {
        self.preview_requests.load(Ordering::SeqCst)
    }
}

// a view outliving its session is never read again
const VIEW_MAX_IDLE: Duration = Duration::seconds(SESSION_EXPIRATION_SEC);

#[derive(Debug)]
struct CachedView {
    state: Arc<ListViewState>,
    last_used: DateTime<Utc>,
}

/// List view state per user email
#[derive(Debug, Default, Clone)]
pub struct BillViews(Arc<Mutex<HashMap<String, CachedView>>>);

impl BillViews {
    pub async fn for_user(&self, user: &SessionUser) -> Arc<ListViewState> {
        self.for_user_at(user, Utc::now()).await
    }

    async fn for_user_at(&self, user: &SessionUser, now: DateTime<Utc>) -> Arc<ListViewState> {
        let mut views = self.0.lock().await;
        views.retain(|_, view| now - view.last_used <= VIEW_MAX_IDLE);
        let view = views
            .entry(user.email().to_owned())
            .or_insert_with(|| CachedView {
                state: Arc::default(),
                last_used: now,
            });
        view.last_used = now;
        view.state.clone()
    }

    /// Drops the state kept for `email`, on logout
    pub async fn forget(&self, email: &str) {
        self.0.lock().await.remove(email);
    }
}

pub struct BillListView {
    gateway: Arc<dyn BillsGateway>,
    navigator: Arc<dyn Navigator>,
    user: SessionUser,
    state: Arc<ListViewState>,
}

impl BillListView {
    pub fn new(
        gateway: Arc<dyn BillsGateway>,
        navigator: Arc<dyn Navigator>,
        user: SessionUser,
        state: Arc<ListViewState>,
    ) -> Self {
        Self {
            gateway,
            navigator,
            user,
            state,
        }
    }

    /// Fetches the bills and renders them. A failed fetch keeps the rows of
    /// the last successful one and adds an error banner. Only the most
    /// recently started mount may change what is shown.
    pub async fn mount(&self) -> Result<String, askama::Error> {
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.gateway.list(&self.scope()).await;

        let mut records = self.state.records.lock().await;
        let current = self.state.generation.load(Ordering::SeqCst) == generation;
        let error = match result {
            Ok(fetched) if current => {
                debug!("fetched {} bills for {}", fetched.len(), self.user.email());
                *records = Some(fetched);
                None
            }
            Err(e) if current => {
                warn!("Error fetching bills for {}: {e}", self.user.email());
                Some(e)
            }
            _ => {
                debug!("discarding stale bill list result {generation}");
                None
            }
        };
        let shown = records.clone().unwrap_or_default();
        drop(records);

        match error {
            None => self.render(&shown),
            Some(e) => self.render_page(&shown, Some(&e)),
        }
    }

    /// Renders bills newest first
    pub fn render(&self, records: &[BillRecord]) -> Result<String, askama::Error> {
        self.render_page(records, None)
    }

    fn render_page(
        &self,
        records: &[BillRecord],
        error: Option<&GatewayError>,
    ) -> Result<String, askama::Error> {
        let mut rows: Vec<BillForList> = records
            .iter()
            .filter(|b| self.is_visible(b))
            .map(|b| BillForList {
                id: b.id.to_string(),
                expense_type: b.expense_type.to_string(),
                name: b.name.clone(),
                date: b.date.clone(),
                amount: b.amount,
                status: b.status.to_string(),
                owner: b.email.clone(),
                receipt_url: b.receipt_url.clone(),
            })
            .collect();
        // ISO dates order lexicographically, sort_by is stable for equal dates
        rows.sort_by(|a, b| b.date.cmp(&a.date));

        BillsTemplate {
            nav: Nav::new(Some(self.user.clone()), Route::Bills),
            rows,
            error: error.map(ErrorBanner::from),
            show_owner: self.user.is_admin(),
        }
        .render()
    }

    fn scope(&self) -> BillScope {
        if self.user.is_admin() {
            BillScope::All
        } else {
            BillScope::Owner(self.user.email().to_owned())
        }
    }

    fn is_visible(&self, bill: &BillRecord) -> bool {
        self.user.is_admin() || bill.email == self.user.email()
    }

    /// Looks a bill up among the rows last shown, fetching if nothing was shown yet
    pub async fn find_bill(&self, id: &Uuid) -> Result<Option<BillRecord>, GatewayError> {
        let cached = self.state.records.lock().await.clone();
        let records = match cached {
            Some(records) => records,
            None => self.gateway.list(&self.scope()).await?,
        };
        Ok(records
            .into_iter()
            .find(|b| &b.id == id && self.is_visible(b)))
    }

    pub fn handle_preview_requested(&self, receipt_url: &str) -> PreviewModal {
        let count = self.state.preview_requests.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("receipt preview {count} requested: {receipt_url}");
        PreviewModal {
            receipt_url: receipt_url.to_owned(),
        }
    }

    pub fn handle_click_new_bill(&self) {
        self.navigator.on_navigate(Route::NewBill);
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex as StdMutex};

    use async_trait::async_trait;
    use proptest::prelude::*;
    use tokio::sync::oneshot;

    use super::*;
    use crate::db::{
        bill::{BillPayload, BillStatus, ExpenseType},
        user::Role,
    };

    fn bill(email: &str, date: &str, name: &str) -> BillRecord {
        let id = Uuid::new_v4();
        BillRecord {
            id,
            email: email.to_string(),
            expense_type: ExpenseType::Hotel,
            name: name.to_string(),
            date: date.to_string(),
            amount: 400,
            vat: Some(80),
            pct: 20,
            commentary: String::new(),
            status: BillStatus::Pending,
            receipt_name: format!("{name}.jpg"),
            receipt_url: format!("/receipts/{id}"),
            created_at: Utc::now(),
        }
    }

    fn fixture() -> Vec<BillRecord> {
        vec![
            bill("a@a", "2004-04-04", "encore"),
            bill("a@a", "2001-01-01", "test1"),
            bill("a@a", "2003-03-03", "test3"),
            bill("a@a", "2002-02-02", "test2"),
        ]
    }

    fn employee() -> SessionUser {
        SessionUser {
            role: Role::Employee,
            email: Some("a@a".to_string()),
        }
    }

    fn rendered_dates(html: &str) -> Vec<&str> {
        html.split("data-testid=\"bill-date\">")
            .skip(1)
            .filter_map(|s| s.split('<').next())
            .collect()
    }

    /// Input indexes of bills named `bill{i}`, in rendered order
    fn rendered_names(html: &str) -> Vec<usize> {
        html.split(">bill")
            .skip(1)
            .filter_map(|s| s.split('<').next())
            .filter_map(|i| i.parse().ok())
            .collect()
    }

    #[derive(Default)]
    struct ScriptedGateway {
        results: StdMutex<VecDeque<Result<Vec<BillRecord>, GatewayError>>>,
        scopes: StdMutex<Vec<BillScope>>,
    }

    impl ScriptedGateway {
        fn new(results: Vec<Result<Vec<BillRecord>, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                results: StdMutex::new(results.into()),
                scopes: StdMutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl BillsGateway for ScriptedGateway {
        async fn list(&self, scope: &BillScope) -> Result<Vec<BillRecord>, GatewayError> {
            self.scopes.lock().unwrap().push(scope.clone());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }

        async fn create(&self, _payload: &BillPayload) -> Result<BillRecord, GatewayError> {
            Err(GatewayError::server())
        }
    }

    #[derive(Default)]
    struct RecordingNavigator {
        routes: StdMutex<Vec<Route>>,
    }

    impl Navigator for RecordingNavigator {
        fn on_navigate(&self, route: Route) {
            self.routes.lock().unwrap().push(route);
        }
    }

    fn view(gateway: Arc<dyn BillsGateway>, user: SessionUser) -> BillListView {
        BillListView::new(
            gateway,
            Arc::new(RecordingNavigator::default()),
            user,
            Arc::new(ListViewState::default()),
        )
    }

    #[test]
    fn bills_are_ordered_newest_first() {
        let view = view(ScriptedGateway::new(vec![]), employee());
        let html = view.render(&fixture()).unwrap();
        let dates = rendered_dates(&html);
        assert_eq!(
            dates,
            vec!["2004-04-04", "2003-03-03", "2002-02-02", "2001-01-01"]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn any_bill_sequence_renders_newest_first(
            days in proptest::collection::vec(0u32..20, 0..12)
        ) {
            let records: Vec<BillRecord> = days
                .iter()
                .enumerate()
                .map(|(i, day)| bill("a@a", &format!("2020-01-{:02}", day + 1), &format!("bill{i}")))
                .collect();
            let html = view(ScriptedGateway::new(vec![]), employee())
                .render(&records)
                .unwrap();

            let dates = rendered_dates(&html);
            prop_assert_eq!(dates.len(), records.len());
            prop_assert!(dates.windows(2).all(|w| w[0] >= w[1]));

            // ties keep input order
            let names = rendered_names(&html);
            for pair in names.windows(2) {
                let (a, b) = (&records[pair[0]], &records[pair[1]]);
                if a.date == b.date {
                    prop_assert!(pair[0] < pair[1]);
                }
            }
        }
    }

    #[test]
    fn equal_dates_keep_their_input_order() {
        let view = view(ScriptedGateway::new(vec![]), employee());
        let records = vec![
            bill("a@a", "2002-02-02", "first"),
            bill("a@a", "2005-05-05", "newest"),
            bill("a@a", "2002-02-02", "second"),
        ];
        let html = view.render(&records).unwrap();
        let first = html.find(">first<").unwrap();
        let second = html.find(">second<").unwrap();
        assert!(html.find(">newest<").unwrap() < first);
        assert!(first < second);
    }

    #[test]
    fn bill_icon_is_highlighted() {
        let view = view(ScriptedGateway::new(vec![]), employee());
        let html = view.render(&fixture()).unwrap();
        assert!(html.contains(r#"data-testid="icon-window" id="layout-icon1" class="icon active-icon""#));
        assert!(html.contains(r#"data-testid="icon-mail" id="layout-icon2" class="icon""#));
    }

    #[test]
    fn employees_only_see_their_own_bills() {
        let mut records = fixture();
        records.push(bill("b@b", "2010-10-10", "someone-else"));

        let html = view(ScriptedGateway::new(vec![]), employee())
            .render(&records)
            .unwrap();
        assert_eq!(rendered_dates(&html).len(), 4);
        assert!(!html.contains("someone-else"));

        let admin = SessionUser {
            role: Role::Admin,
            email: Some("admin@a".to_string()),
        };
        let html = view(ScriptedGateway::new(vec![]), admin)
            .render(&records)
            .unwrap();
        assert_eq!(rendered_dates(&html).len(), 5);
        assert!(html.contains("<th>Employé</th>"));
        assert!(!html.contains("btn-new-bill"));
    }

    #[tokio::test]
    async fn mount_fails_with_404_message() {
        let gateway = ScriptedGateway::new(vec![Err(GatewayError::new("Erreur 404"))]);
        let html = view(gateway, employee()).mount().await.unwrap();
        assert!(html.contains("Erreur 404"));
        assert!(html.contains("error-not-found"));
    }

    #[tokio::test]
    async fn mount_fails_with_500_message() {
        let gateway = ScriptedGateway::new(vec![Err(GatewayError::new("Erreur 500"))]);
        let html = view(gateway, employee()).mount().await.unwrap();
        assert!(html.contains("Erreur 500"));
        assert!(html.contains("error-server"));
    }

    #[tokio::test]
    async fn failed_remount_keeps_previous_rows() {
        let gateway = ScriptedGateway::new(vec![
            Ok(fixture()),
            Err(GatewayError::new("connection reset")),
            Ok(vec![bill("a@a", "2020-01-01", "fresh")]),
        ]);
        let view = view(gateway, employee());

        let html = view.mount().await.unwrap();
        assert_eq!(rendered_dates(&html).len(), 4);
        assert!(!html.contains("error-message"));

        let html = view.mount().await.unwrap();
        assert_eq!(rendered_dates(&html).len(), 4);
        assert!(html.contains("connection reset"));
        assert!(html.contains("error-generic"));

        let html = view.mount().await.unwrap();
        assert_eq!(rendered_dates(&html), vec!["2020-01-01"]);
        assert!(!html.contains("connection reset"));
    }

    struct SlowFirstGateway {
        started: StdMutex<Option<oneshot::Sender<()>>>,
        release: tokio::sync::Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl BillsGateway for SlowFirstGateway {
        async fn list(&self, _scope: &BillScope) -> Result<Vec<BillRecord>, GatewayError> {
            let release = self.release.lock().await.take();
            match release {
                Some(release) => {
                    if let Some(started) = self.started.lock().unwrap().take() {
                        started.send(()).unwrap();
                    }
                    release.await.unwrap();
                    Ok(vec![bill("a@a", "2001-01-01", "stale")])
                }
                None => Ok(vec![bill("a@a", "2002-02-02", "latest")]),
            }
        }

        async fn create(&self, _payload: &BillPayload) -> Result<BillRecord, GatewayError> {
            Err(GatewayError::server())
        }
    }

    #[tokio::test]
    async fn last_mount_issued_wins() {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let gateway = Arc::new(SlowFirstGateway {
            started: StdMutex::new(Some(started_tx)),
            release: tokio::sync::Mutex::new(Some(release_rx)),
        });
        let view = Arc::new(view(gateway, employee()));

        let first = tokio::spawn({
            let view = view.clone();
            async move { view.mount().await.unwrap() }
        });
        started_rx.await.unwrap();

        let html = view.mount().await.unwrap();
        assert!(html.contains("latest"));

        release_tx.send(()).unwrap();
        let stale_html = first.await.unwrap();
        assert!(!stale_html.contains(">stale<"));
        assert!(stale_html.contains("latest"));

        let html = view.render(&view.state.records.lock().await.clone().unwrap()).unwrap();
        assert!(html.contains("latest"));
    }

    #[tokio::test]
    async fn each_preview_click_calls_handler_once() {
        let gateway = ScriptedGateway::new(vec![Ok(fixture())]);
        let view = view(gateway, employee());
        view.mount().await.unwrap();

        for record in fixture() {
            let modal = view.handle_preview_requested(&record.receipt_url);
            assert_eq!(modal.receipt_url, record.receipt_url);
        }
        assert_eq!(view.state.preview_requests(), 4);
    }

    #[tokio::test]
    async fn find_bill_uses_last_shown_rows() {
        let records = fixture();
        let wanted = records[2].clone();
        let gateway = ScriptedGateway::new(vec![Ok(records), Err(GatewayError::server())]);
        let view = view(gateway, employee());
        view.mount().await.unwrap();

        assert_eq!(view.find_bill(&wanted.id).await.unwrap(), Some(wanted));
        assert_eq!(view.find_bill(&Uuid::new_v4()).await.unwrap(), None);
    }

    #[test]
    fn new_bill_button_navigates_to_form() {
        let navigator = Arc::new(RecordingNavigator::default());
        let view = BillListView::new(
            ScriptedGateway::new(vec![]),
            navigator.clone(),
            employee(),
            Arc::new(ListViewState::default()),
        );
        view.handle_click_new_bill();
        assert_eq!(*navigator.routes.lock().unwrap(), vec![Route::NewBill]);
    }

    #[tokio::test]
    async fn listing_is_scoped_to_the_user() {
        let gateway = ScriptedGateway::new(vec![]);
        view(gateway.clone(), employee()).mount().await.unwrap();
        let admin = SessionUser {
            role: Role::Admin,
            email: Some("admin@a".to_string()),
        };
        view(gateway.clone(), admin).mount().await.unwrap();

        assert_eq!(
            *gateway.scopes.lock().unwrap(),
            vec![BillScope::Owner("a@a".to_string()), BillScope::All]
        );
    }

    #[tokio::test]
    async fn idle_views_are_evicted() {
        let views = BillViews::default();
        let start = Utc::now();
        let a = views.for_user_at(&employee(), start).await;
        let other = SessionUser {
            role: Role::Employee,
            email: Some("b@b".to_string()),
        };

        let later = start + VIEW_MAX_IDLE + Duration::seconds(1);
        views.for_user_at(&other, later).await;
        assert_eq!(views.0.lock().await.len(), 1);
        assert!(!Arc::ptr_eq(&a, &views.for_user_at(&employee(), later).await));

        views.forget("b@b").await;
        assert!(!views.0.lock().await.contains_key("b@b"));
    }

    #[tokio::test]
    async fn views_are_kept_per_user() {
        let views = BillViews::default();
        let a = views.for_user(&employee()).await;
        let again = views.for_user(&employee()).await;
        let other = views
            .for_user(&SessionUser {
                role: Role::Employee,
                email: Some("b@b".to_string()),
            })
            .await;
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
