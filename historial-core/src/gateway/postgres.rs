use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{quote_ident, validate_ident, ColumnPath, Constraint, DataGateway, GatewayError, Query};
use crate::config::GatewayConfig;

const ALIAS: &str = "t";

pub async fn create_pool(config: &GatewayConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.timeout_seconds.max(1)))
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Gateway reading the message tables straight from Postgres.
///
/// Each row comes back as one JSONB value so the rest of the pipeline sees
/// exactly what PostgREST would have returned.
#[derive(Debug, Clone)]
pub struct PgGateway {
    pool: PgPool,
    schema: String,
}

impl PgGateway {
    pub async fn connect(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let schema = validate_ident(&config.schema)?.to_string();
        let pool = create_pool(config).await?;
        Ok(Self { pool, schema })
    }

    pub fn from_pool(pool: PgPool, schema: &str) -> Result<Self, GatewayError> {
        Ok(Self {
            pool,
            schema: validate_ident(schema)?.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Render `query` as a parameterised statement returning one `jsonb` per row.
    pub fn build_sql(&self, query: &Query) -> Result<QueryBuilder<'static, Postgres>, GatewayError> {
        let table = validate_ident(&query.table)?;
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");

        if query.selects_all() {
            qb.push(format!("to_jsonb({})", ALIAS));
        } else {
            qb.push("jsonb_build_object(");
            for (i, raw) in query.columns.iter().enumerate() {
                let path = ColumnPath::parse(raw)?;
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(format!("'{}', {}", path.output_key(), path.to_sql(ALIAS)));
            }
            qb.push(")");
        }

        qb.push(format!(
            " AS row FROM {}.{} AS {}",
            quote_ident(&self.schema),
            quote_ident(table),
            ALIAS
        ));

        for (i, constraint) in query.constraints.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            let expr = ColumnPath::parse(constraint.column())?.to_sql(ALIAS);
            match constraint {
                Constraint::ILike { pattern, .. } => {
                    qb.push(format!("({})::text ILIKE ", expr));
                    qb.push_bind(pattern.clone());
                }
                Constraint::Eq { value, .. } => match value {
                    Value::Bool(b) => {
                        qb.push(format!("({})::boolean = ", expr));
                        qb.push_bind(*b);
                    }
                    Value::String(s) => {
                        qb.push(format!("({})::text = ", expr));
                        qb.push_bind(s.clone());
                    }
                    other => {
                        qb.push(format!("({})::text = ", expr));
                        qb.push_bind(other.to_string());
                    }
                },
                Constraint::Gte { value, .. } => {
                    qb.push(format!("{} >= ", expr));
                    qb.push_bind(*value);
                }
                Constraint::Lte { value, .. } => {
                    qb.push(format!("{} <= ", expr));
                    qb.push_bind(*value);
                }
                Constraint::In { values, .. } => {
                    qb.push(format!("({})::text = ANY(", expr));
                    qb.push_bind(values.clone());
                    qb.push(")");
                }
            }
        }

        if let Some(order) = &query.order {
            let expr = ColumnPath::parse(&order.column)?.to_sql(ALIAS);
            qb.push(format!(
                " ORDER BY {} {}",
                expr,
                if order.ascending { "ASC" } else { "DESC" }
            ));
        }

        Ok(qb)
    }
}

#[async_trait]
impl DataGateway for PgGateway {
    async fn fetch(&self, query: &Query) -> Result<Vec<Value>, GatewayError> {
        let mut qb = self.build_sql(query)?;
        let rows: Vec<Value> = qb.build_query_scalar().fetch_all(&self.pool).await?;
        tracing::debug!(table = %query.table, rows = rows.len(), "Postgres fetch complete");
        Ok(rows)
    }

    async fn ping(&self) -> Result<String, GatewayError> {
        Ok(health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
