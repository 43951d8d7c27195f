use std::collections::HashMap;

use serde::Serialize;

use crate::error::Result;
use crate::filters::{CREATED_AT_COLUMN, SESSION_ID_COLUMN};
use crate::gateway::{decode_rows, DataGateway, Query};
use crate::models::{group_by_session, AnalyticsConfig, Message, Session};
use crate::resolver::ResolvedSessions;

pub const PAGE_SIZE: usize = 15;

pub fn total_pages(total: usize) -> usize {
    total.div_ceil(PAGE_SIZE)
}

/// Ids on the 1-based `page`. Page 0 and out-of-range pages yield an empty
/// slice; no clamping happens here.
pub fn page_slice(ids: &[String], page: u32) -> &[String] {
    if page == 0 {
        return &[];
    }
    let start = (page as usize - 1).saturating_mul(PAGE_SIZE);
    if start >= ids.len() {
        return &[];
    }
    let end = (start + PAGE_SIZE).min(ids.len());
    &ids[start..end]
}

/// Every column of every row in `ids`, oldest first.
pub fn detail_query(table_name: &str, ids: &[String]) -> Query {
    Query::select_all(table_name)
        .in_list(SESSION_ID_COLUMN, ids)
        .order(CREATED_AT_COLUMN, true)
}

/// One page of grouped sessions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionPage {
    pub page: u32,
    pub page_size: usize,
    pub total_count: usize,
    pub total_pages: usize,
    /// Iteration order for `groups`
    pub session_order: Vec<String>,
    #[serde(skip)]
    pub groups: HashMap<String, Vec<Message>>,
}

impl SessionPage {
    pub fn empty(page: u32) -> Self {
        Self {
            page,
            page_size: PAGE_SIZE,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.session_order.is_empty()
    }

    /// Sessions in page order with their derived fields.
    pub fn sessions(&self, classifier: &AnalyticsConfig) -> Vec<Session> {
        self.session_order
            .iter()
            .map(|id| {
                let messages = self.groups.get(id).cloned().unwrap_or_default();
                Session::new(id.clone(), messages, classifier)
            })
            .collect()
    }
}

pub struct SessionPaginator<'a> {
    gateway: &'a dyn DataGateway,
    table_name: &'a str,
}

impl<'a> SessionPaginator<'a> {
    pub fn new(gateway: &'a dyn DataGateway, table_name: &'a str) -> Self {
        Self { gateway, table_name }
    }

    pub async fn page(&self, resolved: &ResolvedSessions, page: u32) -> Result<SessionPage> {
        let total_count = resolved.total_count();
        let slice = page_slice(resolved.ids(), page);

        let mut out = SessionPage {
            page,
            page_size: PAGE_SIZE,
            total_count,
            total_pages: total_pages(total_count),
            session_order: slice.to_vec(),
            groups: HashMap::new(),
        };
        if slice.is_empty() {
            tracing::debug!(page, total_count, "Page out of range; no detail fetch");
            return Ok(out);
        }

        let rows: Vec<Message> = decode_rows(
            self.gateway
                .fetch(&detail_query(self.table_name, slice))
                .await?,
        )?;
        tracing::debug!(page, sessions = slice.len(), rows = rows.len(), "Page loaded");
        out.groups = group_by_session(rows);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FilterContext, FilterSet};
    use crate::gateway::MemoryGateway;
    use crate::registry::n8n_historial;
    use crate::resolver::SessionResolver;
    use serde_json::json;

    /// `n` sessions, two messages each, session `s00` newest.
    fn gateway_with_sessions(n: usize) -> MemoryGateway {
        let mut rows = Vec::new();
        for i in 0..n {
            let day = 28 - (i % 28);
            let hour = 23 - (i / 28);
            rows.push(json!({
                "id": i * 2,
                "session_id": format!("s{:02}", i),
                "created_at": format!("2024-02-{:02}T{:02}:00:00Z", day, hour),
                "message": {"type": "ai", "text": format!("respuesta {}", i)}
            }));
            rows.push(json!({
                "id": i * 2 + 1,
                "session_id": format!("s{:02}", i),
                "created_at": format!("2024-02-{:02}T{:02}:00:00Z", day, hour - 1),
                "message": {"type": "human", "text": format!("pregunta {}", i)}
            }));
        }
        MemoryGateway::with_rows("n8n_historial", rows)
    }

    async fn resolved(gw: &MemoryGateway) -> ResolvedSessions {
        let table = n8n_historial();
        SessionResolver::new(gw, &table, FilterContext::utc())
            .resolve(&FilterSet::new())
            .await
            .unwrap()
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0), 0);
        assert_eq!(total_pages(1), 1);
        assert_eq!(total_pages(15), 1);
        assert_eq!(total_pages(16), 2);
        assert_eq!(total_pages(23), 2);
    }

    #[test]
    fn test_page_slice_bounds() {
        let ids: Vec<String> = (0..23).map(|i| i.to_string()).collect();
        assert_eq!(page_slice(&ids, 1).len(), 15);
        assert_eq!(page_slice(&ids, 2).len(), 8);
        assert!(page_slice(&ids, 3).is_empty());
        assert!(page_slice(&ids, u32::MAX).is_empty());
        assert!(page_slice(&ids, 0).is_empty());
    }

    #[tokio::test]
    async fn test_page_zero_is_empty_without_fetch() {
        let gw = gateway_with_sessions(5);
        let resolved = resolved(&gw).await;
        gw.reset_calls();

        let page = SessionPaginator::new(&gw, "n8n_historial")
            .page(&resolved, 0)
            .await
            .unwrap();
        assert!(page.is_empty());
        assert_eq!(page.page, 0);
        assert_eq!(page.total_count, 5);
        assert_eq!(gw.call_count(), 0);
    }

    #[tokio::test]
    async fn test_twenty_three_sessions() {
        let gw = gateway_with_sessions(23);
        let resolved = resolved(&gw).await;
        let paginator = SessionPaginator::new(&gw, "n8n_historial");

        gw.reset_calls();
        let first = paginator.page(&resolved, 1).await.unwrap();
        assert_eq!(first.session_order.len(), 15);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.total_count, 23);
        assert_eq!(gw.call_count(), 1);

        let second = paginator.page(&resolved, 2).await.unwrap();
        assert_eq!(second.session_order.len(), 8);

        gw.reset_calls();
        let third = paginator.page(&resolved, 3).await.unwrap();
        assert!(third.is_empty());
        assert!(third.groups.is_empty());
        assert_eq!(gw.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pages_concatenate_to_resolved_order() {
        let gw = gateway_with_sessions(40);
        let resolved = resolved(&gw).await;
        let paginator = SessionPaginator::new(&gw, "n8n_historial");

        let mut all = Vec::new();
        for page in 1..=total_pages(resolved.total_count()) as u32 {
            all.extend(paginator.page(&resolved, page).await.unwrap().session_order);
        }
        assert_eq!(all, resolved.ids());
    }

    #[tokio::test]
    async fn test_detail_rows_grouped_oldest_first() {
        let gw = gateway_with_sessions(3);
        let resolved = resolved(&gw).await;
        let page = SessionPaginator::new(&gw, "n8n_historial")
            .page(&resolved, 1)
            .await
            .unwrap();

        let detail = gw.calls().last().cloned().unwrap();
        assert_eq!(detail, detail_query("n8n_historial", resolved.ids()));

        let texts: Vec<String> = page.groups["s00"].iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["pregunta 0", "respuesta 0"]);

        let sessions = page.sessions(&n8n_historial().analytics);
        let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s00", "s01", "s02"]);
    }

    #[tokio::test]
    async fn test_detail_failure_propagates() {
        let gw = gateway_with_sessions(3);
        let resolved = resolved(&gw).await;
        gw.fail_with("timeout");
        assert!(SessionPaginator::new(&gw, "n8n_historial")
            .page(&resolved, 1)
            .await
            .is_err());
    }
}
