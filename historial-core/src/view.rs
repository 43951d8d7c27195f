//! Last-request-wins view state.
//!
//! Every filter change issues a ticket; a completed fetch is applied only if
//! its ticket is still the newest one issued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

use crate::error::Result;
use crate::filters::FilterSet;
use crate::paginator::SessionPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RequestTicket(u64);

impl RequestTicket {
    pub fn sequence(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> RequestTicket {
        RequestTicket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewState {
    pub filters: FilterSet,
    pub page: Option<SessionPage>,
    pub error: Option<String>,
    pub loading: bool,
}

/// History view state shared between concurrent fetches.
#[derive(Debug, Default)]
pub struct HistoryView {
    sequencer: RequestSequencer,
    state: Mutex<ViewState>,
}

impl HistoryView {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record new filters and hand out the ticket for the fetch they trigger.
    pub fn begin(&self, filters: FilterSet) -> RequestTicket {
        let mut state = self.state();
        let ticket = self.sequencer.issue();
        state.filters = filters;
        state.loading = true;
        ticket
    }

    /// Apply a completed fetch. Returns `false` when a newer request has
    /// been issued since, in which case the result is dropped.
    pub fn complete(&self, ticket: RequestTicket, result: Result<SessionPage>) -> bool {
        let mut state = self.state();
        if !self.sequencer.is_current(ticket) {
            tracing::debug!(ticket = ticket.sequence(), "Dropping stale result");
            return false;
        }
        state.loading = false;
        match result {
            Ok(page) => {
                state.page = Some(page);
                state.error = None;
            }
            Err(e) => {
                tracing::warn!(ticket = ticket.sequence(), error = %e, "History fetch failed");
                state.error = Some(e.to_string());
            }
        }
        true
    }

    pub fn snapshot(&self) -> ViewState {
        self.state().clone()
    }
}
