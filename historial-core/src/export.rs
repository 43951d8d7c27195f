//! CSV export of every message in the filtered session population.

use chrono::NaiveDate;
use futures::future::try_join_all;

use crate::error::Result;
use crate::filters::{FilterContext, FilterSet};
use crate::gateway::{decode_rows, DataGateway};
use crate::models::{Message, TableConfig};
use crate::paginator::detail_query;
use crate::resolver::SessionResolver;

pub const CSV_HEADER: &str = "session_id,created_at,message_content";

/// One flattened CSV line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub session_id: String,
    pub created_at: String,
    pub message_content: String,
}

impl ExportRecord {
    pub fn from_message(message: &Message) -> Self {
        Self {
            session_id: message.session_id.clone(),
            created_at: message.created_at_raw.clone(),
            message_content: flatten_newlines(&message.text()),
        }
    }
}

fn flatten_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Quote a field when it contains a comma, quote or line break.
pub fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn to_csv(records: &[ExportRecord]) -> String {
    let mut lines = Vec::with_capacity(records.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for record in records {
        lines.push(format!(
            "{},{},{}",
            csv_escape(&record.session_id),
            csv_escape(&record.created_at),
            csv_escape(&record.message_content)
        ));
    }
    lines.join("\n")
}

pub fn export_filename(date: NaiveDate) -> String {
    format!("historial_chat_{}.csv", date.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExport {
    pub filename: String,
    pub session_count: usize,
    pub row_count: usize,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Filters matched no session; nothing was fetched beyond resolution.
    Empty,
    Ready(CsvExport),
}

pub struct ExportAssembler<'a> {
    gateway: &'a dyn DataGateway,
    table: &'a TableConfig,
    ctx: FilterContext,
    chunk_size: usize,
}

impl<'a> ExportAssembler<'a> {
    pub fn new(gateway: &'a dyn DataGateway, table: &'a TableConfig, ctx: FilterContext, chunk_size: usize) -> Self {
        Self {
            gateway,
            table,
            ctx,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Resolve without paging, then fetch and flatten every row of every session.
    pub async fn assemble(&self, filters: &FilterSet, today: NaiveDate) -> Result<ExportOutcome> {
        let resolved = SessionResolver::new(self.gateway, self.table, self.ctx)
            .resolve(filters)
            .await?;
        if resolved.is_empty() {
            tracing::info!(table = %self.table.table_name, "Nothing to export");
            return Ok(ExportOutcome::Empty);
        }

        let messages = self.fetch_messages(resolved.ids()).await?;
        let records: Vec<ExportRecord> = messages.iter().map(ExportRecord::from_message).collect();

        let export = CsvExport {
            filename: export_filename(today),
            session_count: resolved.total_count(),
            row_count: records.len(),
            content: to_csv(&records),
        };
        tracing::info!(
            table = %self.table.table_name,
            sessions = export.session_count,
            rows = export.row_count,
            filename = %export.filename,
            "Export assembled"
        );
        Ok(ExportOutcome::Ready(export))
    }

    /// Rows for `ids` in chunks of `chunk_size`, merged oldest first.
    async fn fetch_messages(&self, ids: &[String]) -> Result<Vec<Message>> {
        let batches = try_join_all(ids.chunks(self.chunk_size).map(|chunk| {
            let query = detail_query(&self.table.table_name, chunk);
            async move { self.gateway.fetch(&query).await }
        }))
        .await?;
        tracing::debug!(chunks = batches.len(), "Export rows fetched");

        let mut messages: Vec<Message> = Vec::new();
        for batch in batches {
            messages.extend(decode_rows::<Message>(batch)?);
        }
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::registry::n8n_historial;
    use crate::resolver::SessionResolver;
    use crate::HistorialError;
    use serde_json::json;

    /// Minimal RFC 4180 reader for asserting on generated files.
    fn parse_csv(input: &str) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        let mut row = Vec::new();
        let mut field = String::new();
        let mut quoted = false;
        let mut chars = input.chars().peekable();
        while let Some(c) = chars.next() {
            match (quoted, c) {
                (true, '"') if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                (true, '"') => quoted = false,
                (true, c) => field.push(c),
                (false, '"') => quoted = true,
                (false, ',') => row.push(std::mem::take(&mut field)),
                (false, '\n') => {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                (false, c) => field.push(c),
            }
        }
        row.push(field);
        rows.push(row);
        rows
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    fn fixture() -> MemoryGateway {
        MemoryGateway::with_rows(
            "n8n_historial",
            vec![
                json!({"id": 1, "session_id": "alpha", "created_at": "2024-01-10T10:00:00Z",
                       "message": {"type": "human", "text": "Hola, \"doctor\"\nnecesito una radiografía"}}),
                json!({"id": 2, "session_id": "beta", "created_at": "2024-01-10T09:00:00Z",
                       "message": "texto, con coma"}),
                json!({"id": 3, "session_id": "alpha", "created_at": "2024-01-10T11:00:00Z",
                       "message": {"type": "ai", "text": "Claro\r\nle agendamos"}}),
                json!({"id": 4, "session_id": "gamma", "created_at": "2024-01-11T08:00:00Z",
                       "message": null}),
            ],
        )
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_filename() {
        assert_eq!(export_filename(today()), "historial_chat_2024-02-01.csv");
    }

    #[tokio::test]
    async fn test_export_parses_back_to_source_rows() {
        let gw = fixture();
        let table = n8n_historial();
        let outcome = ExportAssembler::new(&gw, &table, FilterContext::utc(), 200)
            .assemble(&FilterSet::new(), today())
            .await
            .unwrap();
        let ExportOutcome::Ready(export) = outcome else {
            panic!("Expected a CSV export");
        };
        assert_eq!(export.session_count, 3);
        assert_eq!(export.row_count, 4);

        let rows = parse_csv(&export.content);
        assert_eq!(rows[0], vec!["session_id", "created_at", "message_content"]);
        assert_eq!(
            rows[1..].to_vec(),
            vec![
                vec!["beta", "2024-01-10T09:00:00Z", "texto, con coma"],
                vec!["alpha", "2024-01-10T10:00:00Z", "Hola, \"doctor\" necesito una radiografía"],
                vec!["alpha", "2024-01-10T11:00:00Z", "Claro le agendamos"],
                vec!["gamma", "2024-01-11T08:00:00Z", ""],
            ]
        );
    }

    #[tokio::test]
    async fn test_export_writes_backend_timestamps_verbatim() {
        let gw = MemoryGateway::with_rows(
            "n8n_historial",
            vec![
                json!({"id": 1, "session_id": "s1", "created_at": "2024-01-10T08:30:00.123456+00:00",
                       "message": {"text": "hola"}}),
                json!({"id": 2, "session_id": "s1", "created_at": "2024-01-10 09:00:00",
                       "message": {"text": "adiós"}}),
            ],
        );
        let table = n8n_historial();
        let ExportOutcome::Ready(export) = ExportAssembler::new(&gw, &table, FilterContext::utc(), 200)
            .assemble(&FilterSet::new(), today())
            .await
            .unwrap()
        else {
            panic!("Expected a CSV export");
        };
        let rows = parse_csv(&export.content);
        assert_eq!(rows[1], vec!["s1", "2024-01-10T08:30:00.123456+00:00", "hola"]);
        assert_eq!(rows[2], vec!["s1", "2024-01-10 09:00:00", "adiós"]);
    }

    #[tokio::test]
    async fn test_export_population_equals_resolved_sessions() {
        let gw = fixture();
        let table = n8n_historial();
        let filters = FilterSet::new().with("special_request", "requested");

        let resolved = SessionResolver::new(&gw, &table, FilterContext::utc())
            .resolve(&filters)
            .await
            .unwrap();

        let ExportOutcome::Ready(export) = ExportAssembler::new(&gw, &table, FilterContext::utc(), 200)
            .assemble(&filters, today())
            .await
            .unwrap()
        else {
            panic!("Expected a CSV export");
        };

        let mut exported: Vec<String> = parse_csv(&export.content)[1..]
            .iter()
            .map(|r| r[0].clone())
            .collect();
        let mut expected = resolved.into_ids();
        expected.sort();
        exported.sort();
        exported.dedup();
        assert_eq!(exported, expected);
    }

    #[tokio::test]
    async fn test_empty_population_fetches_nothing_more() {
        let gw = fixture();
        let table = n8n_historial();
        let outcome = ExportAssembler::new(&gw, &table, FilterContext::utc(), 200)
            .assemble(&FilterSet::new().with("q", "sin coincidencias"), today())
            .await
            .unwrap();
        assert_eq!(outcome, ExportOutcome::Empty);
        assert_eq!(gw.call_count(), 1);
    }

    #[tokio::test]
    async fn test_chunked_fetch_merges_in_time_order() {
        let gw = fixture();
        let table = n8n_historial();
        let ExportOutcome::Ready(export) = ExportAssembler::new(&gw, &table, FilterContext::utc(), 1)
            .assemble(&FilterSet::new(), today())
            .await
            .unwrap()
        else {
            panic!("Expected a CSV export");
        };
        // one candidate query plus one detail query per session
        assert_eq!(gw.call_count(), 4);
        let stamps: Vec<String> = parse_csv(&export.content)[1..]
            .iter()
            .map(|r| r[1].clone())
            .collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }

    #[tokio::test]
    async fn test_gateway_error_yields_no_output() {
        let gw = fixture();
        let table = n8n_historial();
        gw.fail_with("permission denied for table n8n_historial");
        let result = ExportAssembler::new(&gw, &table, FilterContext::utc(), 200)
            .assemble(&FilterSet::new(), today())
            .await;
        assert!(matches!(result, Err(HistorialError::Gateway(_))));
    }
}
