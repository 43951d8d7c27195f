//! Entry point used by the HTTP layer: one gateway, every read operation.
//!
//! Each operation takes the table configuration as `Option`; `None` means no
//! table is selected and yields an inert empty result instead of an error.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::analytics::{AnalyticsRange, AnalyticsReport, DEFAULT_WINDOW_DAYS};
use crate::config::HistorialConfig;
use crate::error::Result;
use crate::export::{ExportAssembler, ExportOutcome};
use crate::filters::{FilterContext, FilterSet};
use crate::gateway::{DataGateway, GatewayError};
use crate::models::{PositiveNegative, TableConfig};
use crate::paginator::{SessionPage, SessionPaginator};
use crate::resolver::{ResolvedSessions, SessionResolver};
use crate::stats::DashboardStats;
use crate::view::HistoryView;

#[derive(Clone)]
pub struct HistoryService {
    gateway: Arc<dyn DataGateway>,
    ctx: FilterContext,
    chunk_size: usize,
}

impl HistoryService {
    pub fn new(gateway: Arc<dyn DataGateway>, ctx: FilterContext, chunk_size: usize) -> Self {
        Self {
            gateway,
            ctx,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(gateway: Arc<dyn DataGateway>, config: &HistorialConfig) -> Result<Self> {
        let ctx = config.history.filter_context()?;
        Ok(Self::new(gateway, ctx, config.gateway.in_chunk_size))
    }

    pub fn context(&self) -> &FilterContext {
        &self.ctx
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub async fn ping(&self) -> std::result::Result<String, GatewayError> {
        self.gateway.ping().await
    }

    pub async fn resolve(&self, table: Option<&TableConfig>, filters: &FilterSet) -> Result<ResolvedSessions> {
        let Some(table) = table else {
            return Ok(ResolvedSessions::default());
        };
        SessionResolver::new(self.gateway.as_ref(), table, self.ctx)
            .resolve(filters)
            .await
    }

    /// Resolve, then load the requested page of grouped sessions.
    pub async fn history(&self, table: Option<&TableConfig>, filters: &FilterSet) -> Result<SessionPage> {
        let Some(table) = table else {
            return Ok(SessionPage::empty(filters.page()));
        };
        let resolved = self.resolve(Some(table), filters).await?;
        SessionPaginator::new(self.gateway.as_ref(), &table.table_name)
            .page(&resolved, filters.page())
            .await
    }

    /// Load a page into `view` under a fresh ticket. Returns `false` when a
    /// newer request was issued on the same view before this one finished.
    pub async fn refresh(&self, view: &HistoryView, table: Option<&TableConfig>, filters: FilterSet) -> bool {
        let ticket = view.begin(filters.clone());
        let result = self.history(table, &filters).await;
        view.complete(ticket, result)
    }

    pub async fn export(&self, table: Option<&TableConfig>, filters: &FilterSet) -> Result<ExportOutcome> {
        self.export_on(table, filters, self.ctx.today()).await
    }

    /// Export with an explicit date for the file name.
    pub async fn export_on(
        &self,
        table: Option<&TableConfig>,
        filters: &FilterSet,
        today: NaiveDate,
    ) -> Result<ExportOutcome> {
        let Some(table) = table else {
            return Ok(ExportOutcome::Empty);
        };
        ExportAssembler::new(self.gateway.as_ref(), table, self.ctx, self.chunk_size)
            .assemble(&filters.without_page(), today)
            .await
    }

    pub async fn stats(&self, table: Option<&TableConfig>) -> Result<DashboardStats> {
        let Some(table) = table else {
            return Ok(DashboardStats::default());
        };
        DashboardStats::load(self.gateway.as_ref(), table, &self.ctx).await
    }

    /// Analytics over `range`; the last 30 days when `None`.
    pub async fn analytics(&self, table: Option<&TableConfig>, range: Option<AnalyticsRange>) -> Result<AnalyticsReport> {
        let range = range.unwrap_or_else(|| AnalyticsRange::last_days(DEFAULT_WINDOW_DAYS, self.ctx.today()));
        let Some(table) = table else {
            return Ok(AnalyticsReport::empty(
                range,
                PositiveNegative::default(),
                PositiveNegative::default(),
            ));
        };
        AnalyticsReport::load(self.gateway.as_ref(), table, &self.ctx, range).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::registry::n8n_historial;
    use serde_json::json;

    fn service() -> (Arc<MemoryGateway>, HistoryService) {
        let rows = (0..20)
            .map(|i| {
                let text = if i % 4 == 0 { "radiografía" } else { "hola" };
                json!({
                    "id": i,
                    "session_id": format!("s{:02}", i),
                    "created_at": format!("2024-01-{:02}T10:00:00Z", i + 1),
                    "message": {"type": "human", "text": text}
                })
            })
            .collect();
        let gw = Arc::new(MemoryGateway::with_rows("n8n_historial", rows));
        let service = HistoryService::new(gw.clone(), FilterContext::utc(), 200);
        (gw, service)
    }

    #[tokio::test]
    async fn test_missing_table_is_inert() {
        let (gw, service) = service();
        let filters = FilterSet::new().with_page(2);

        let page = service.history(None, &filters).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(page.page, 2);
        assert_eq!(service.export(None, &filters).await.unwrap(), ExportOutcome::Empty);
        assert!(service.stats(None).await.unwrap().cards.is_empty());
        assert_eq!(service.analytics(None, None).await.unwrap().total_sessions, 0);
        assert_eq!(gw.call_count(), 0);
    }

    #[tokio::test]
    async fn test_history_pages_newest_first() {
        let (_, service) = service();
        let table = n8n_historial();
        let page = service
            .history(Some(&table), &FilterSet::new().with_page(2))
            .await
            .unwrap();
        assert_eq!(page.total_count, 20);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.session_order, vec!["s04", "s03", "s02", "s01", "s00"]);

        let sessions = page.sessions(&table.analytics);
        assert!(sessions[0].positive);
        assert!(!sessions[1].positive);
    }

    /// Holds the first fetch until released; later fetches go straight through.
    struct HeldGateway {
        inner: MemoryGateway,
        held: std::sync::atomic::AtomicBool,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl DataGateway for HeldGateway {
        async fn fetch(&self, query: &crate::gateway::Query) -> std::result::Result<Vec<serde_json::Value>, GatewayError> {
            if !self.held.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.release.notified().await;
            }
            self.inner.fetch(query).await
        }

        async fn ping(&self) -> std::result::Result<String, GatewayError> {
            self.inner.ping().await
        }

        fn name(&self) -> &str {
            "held"
        }
    }

    #[tokio::test]
    async fn test_refresh_applies_latest_and_keeps_page_on_error() {
        let (_, service) = service();
        let table = n8n_historial();
        let view = HistoryView::new();

        assert!(service.refresh(&view, Some(&table), FilterSet::new().with_page(2)).await);
        let state = view.snapshot();
        assert_eq!(state.page.as_ref().unwrap().session_order.len(), 5);
        assert!(!state.loading);

        let bad = FilterSet::new().with("from", "ayer");
        assert!(service.refresh(&view, Some(&table), bad).await);
        let state = view.snapshot();
        assert_eq!(state.page.unwrap().session_order.len(), 5);
        assert!(state.error.unwrap().contains("from"));
    }

    #[tokio::test]
    async fn test_refresh_overtaken_by_newer_request_is_dropped() {
        let held = Arc::new(HeldGateway {
            inner: MemoryGateway::with_rows(
                "n8n_historial",
                vec![json!({"id": 1, "session_id": "s1", "created_at": "2024-01-01T10:00:00Z", "message": {"text": "hola"}})],
            ),
            held: std::sync::atomic::AtomicBool::new(false),
            release: tokio::sync::Notify::new(),
        });
        let service = HistoryService::new(held.clone(), FilterContext::utc(), 200);
        let table = n8n_historial();
        let view = HistoryView::new();

        let slow = service.refresh(&view, Some(&table), FilterSet::new().with("q", "ho"));
        let fast = async {
            let applied = service.refresh(&view, Some(&table), FilterSet::new().with("q", "hola")).await;
            held.release.notify_one();
            applied
        };
        let (slow_applied, fast_applied) = tokio::join!(slow, fast);

        assert!(fast_applied);
        assert!(!slow_applied);
        assert_eq!(view.snapshot().filters.get("q"), Some("hola"));
    }

    #[tokio::test]
    async fn test_export_ignores_page() {
        let (_, service) = service();
        let table = n8n_historial();
        let filters = FilterSet::new().with("special_request", "requested").with_page(9);
        let outcome = service
            .export_on(Some(&table), &filters, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
            .await
            .unwrap();
        match outcome {
            ExportOutcome::Ready(export) => {
                assert_eq!(export.session_count, 5);
                assert_eq!(export.filename, "historial_chat_2024-02-01.csv");
            }
            ExportOutcome::Empty => panic!("Expected rows to export"),
        }
    }
}
