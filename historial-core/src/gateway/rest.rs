use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::{ColumnPath, Constraint, DataGateway, GatewayError, Query};
use crate::config::GatewayConfig;

/// PostgREST error body (`{code, details, hint, message}`)
#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: Option<String>,
    code: Option<String>,
    hint: Option<String>,
}

/// Gateway speaking the PostgREST dialect served by Supabase at `/rest/v1`.
#[derive(Debug, Clone)]
pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: String,
    schema: String,
    page_rows: usize,
    paging_key: String,
}

impl RestGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let api_key = config
            .resolved_api_key()
            .ok_or(GatewayError::MissingApiKey)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key,
            schema: config.schema.clone(),
            page_rows: config.page_rows,
            paging_key: config.paging_key.clone(),
        })
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Translate a query into PostgREST query-string pairs (without paging).
    pub fn query_params(query: &Query) -> Result<Vec<(String, String)>, GatewayError> {
        let mut params = Vec::with_capacity(query.constraints.len() + 2);

        let select = query
            .columns
            .iter()
            .map(|c| {
                if c == "*" {
                    Ok(c.clone())
                } else {
                    ColumnPath::parse(c).map(|p| p.as_str().to_string())
                }
            })
            .collect::<Result<Vec<_>, _>>()?
            .join(",");
        params.push(("select".to_string(), select));

        for constraint in &query.constraints {
            let column = ColumnPath::parse(constraint.column())?.as_str().to_string();
            let value = match constraint {
                Constraint::ILike { pattern, .. } => format!("ilike.{}", pattern),
                Constraint::Eq { value, .. } => format!("eq.{}", literal(value)),
                Constraint::Gte { value, .. } => {
                    format!("gte.{}", value.to_rfc3339_opts(SecondsFormat::Millis, true))
                }
                Constraint::Lte { value, .. } => {
                    format!("lte.{}", value.to_rfc3339_opts(SecondsFormat::Millis, true))
                }
                Constraint::In { values, .. } => {
                    let quoted: Vec<String> = values.iter().map(|v| quote_list_item(v)).collect();
                    format!("in.({})", quoted.join(","))
                }
            };
            params.push((column, value));
        }

        if let Some(order) = &query.order {
            let column = ColumnPath::parse(&order.column)?;
            let dir = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", column, dir)));
        }

        Ok(params)
    }

    /// `order` value for paged reads: the query's own order, then the
    /// paging key, so offsets address a stable row sequence.
    pub fn paged_order(query: &Query, paging_key: &str) -> Result<String, GatewayError> {
        let key = ColumnPath::parse(paging_key)?;
        Ok(match &query.order {
            Some(order) => {
                let column = ColumnPath::parse(&order.column)?;
                let dir = if order.ascending { "asc" } else { "desc" };
                if column.as_str() == key.as_str() {
                    format!("{}.{}", column, dir)
                } else {
                    format!("{}.{},{}.asc", column, dir, key)
                }
            }
            None => format!("{}.asc", key),
        })
    }

    /// Returns the rows plus the total from `Content-Range`, when the server reports one.
    async fn fetch_page(
        &self,
        query: &Query,
        params: &[(String, String)],
        offset: usize,
    ) -> Result<(Vec<Value>, Option<usize>), GatewayError> {
        let mut request = self
            .client
            .get(self.endpoint(&query.table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(params);

        if self.page_rows > 0 {
            request = request.query(&[
                ("limit", self.page_rows.to_string()),
                ("offset", offset.to_string()),
            ]);
            if offset == 0 {
                request = request.header("Prefer", "count=exact");
            }
        }
        if self.schema != "public" {
            request = request.header("Accept-Profile", &self.schema);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<PostgrestError>(&error_body)
                .ok()
                .and_then(|e| {
                    let code = e.code.map(|c| format!(" [{}]", c)).unwrap_or_default();
                    let hint = e.hint.map(|h| format!(" ({})", h)).unwrap_or_default();
                    e.message.map(|m| format!("{}{}{}", m, code, hint))
                })
                .unwrap_or(error_body);

            tracing::error!(
                code = status.as_u16(),
                table = %query.table,
                message = %message,
                "PostgREST request failed"
            );

            return Err(GatewayError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total);

        let body: Value = response.json().await?;
        match body {
            Value::Array(rows) => Ok((rows, total)),
            other => Err(GatewayError::decode(format!(
                "expected a JSON array of rows, got {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl DataGateway for RestGateway {
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        let mut params = Self::query_params(query)?;
        if self.page_rows > 0 {
            params.retain(|(k, _)| k != "order");
            params.push(("order".to_string(), Self::paged_order(query, &self.paging_key)?));
        }

        let mut rows = Vec::new();
        let mut offset = 0;
        let mut total = None;

        // A short batch is not the end: the server may cap rows below `limit`
        loop {
            let (batch, batch_total) = self.fetch_page(query, &params, offset).await?;
            total = total.or(batch_total);
            let received = batch.len();
            rows.extend(batch);
            if self.page_rows == 0 || received == 0 {
                break;
            }
            offset += received;
            if total.is_some_and(|t| offset >= t) {
                break;
            }
        }

        tracing::debug!(table = %query.table, rows = rows.len(), "PostgREST fetch complete");
        Ok(rows)
    }

    async fn ping(&self) -> Result<String, GatewayError> {
        let response = self
            .client
            .get(format!("{}/rest/v1/", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Api {
                code: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(format!("PostgREST at {} ({})", self.base_url, status))
    }

    fn name(&self) -> &str {
        "rest"
    }
}

/// Total out of `Content-Range: 0-499/1200`; `None` for `*`.
fn content_range_total(value: &str) -> Option<usize> {
    value.rsplit_once('/').and_then(|(_, total)| total.parse().ok())
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Items of an `in.(...)` list are always double-quoted so commas and
/// parentheses inside session ids survive.
fn quote_list_item(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
