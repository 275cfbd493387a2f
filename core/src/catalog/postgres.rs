//! Postgres catalog bridge

use std::sync::Arc;

use sqlx::{PgPool, Row};

use super::WorkCatalog;
use crate::config::CatalogConfig;
use crate::error::LeaseResult;
use crate::types::{BacklogStats, ItemId};

/// SQL rendered once from the configured table and column names
struct Queries {
    outstanding: String,
    free: String,
    stats: String,
}

impl Queries {
    fn render(config: &CatalogConfig) -> Self {
        let CatalogConfig {
            table,
            id_column: id,
            payload_column: payload,
            text_column: text,
            loaded_column: loaded,
        } = config;

        Self {
            outstanding: format!(
                r#"
                SELECT {id}::bigint FROM {table}
                WHERE {id} = ANY($1)
                  AND {payload} IS NOT NULL
                  AND {text} IS NULL
                ORDER BY {id}
                "#
            ),
            free: format!(
                r#"
                SELECT {id}::bigint FROM {table}
                WHERE NOT ({id} = ANY($1))
                  AND {payload} IS NOT NULL
                  AND {text} IS NULL
                ORDER BY {id}
                LIMIT $2
                "#
            ),
            stats: format!(
                r#"
                SELECT
                    COUNT(*) AS total,
                    COUNT({payload}) AS with_payload,
                    COUNT({text}) AS with_text,
                    COUNT(*) FILTER (WHERE {loaded}) AS loaded
                FROM {table}
                "#
            ),
        }
    }
}

#[derive(Clone)]
pub struct PgWorkCatalog {
    pool: PgPool,
    queries: Arc<Queries>,
}

impl PgWorkCatalog {
    /// Table and column names must already be validated (see `Config::validate`)
    pub fn new(pool: PgPool, config: &CatalogConfig) -> Self {
        Self {
            pool,
            queries: Arc::new(Queries::render(config)),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl WorkCatalog for PgWorkCatalog {
    async fn outstanding_among(&self, ids: &[ItemId]) -> LeaseResult<Vec<ItemId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let outstanding: Vec<i64> = sqlx::query_scalar(&self.queries.outstanding)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(outstanding)
    }

    async fn free_items(&self, reserved: &[ItemId], limit: u32) -> LeaseResult<Vec<ItemId>> {
        let free: Vec<i64> = sqlx::query_scalar(&self.queries.free)
            .bind(reserved)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(free)
    }

    async fn backlog_stats(&self) -> LeaseResult<BacklogStats> {
        let row = sqlx::query(&self.queries.stats)
            .fetch_one(&self.pool)
            .await?;

        Ok(BacklogStats {
            total: row.try_get("total")?,
            with_payload: row.try_get("with_payload")?,
            with_text: row.try_get("with_text")?,
            loaded: row.try_get("loaded")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_use_configured_names() {
        let config = CatalogConfig {
            table: "docs".to_string(),
            id_column: "doc_id".to_string(),
            payload_column: "pdf".to_string(),
            text_column: "body".to_string(),
            loaded_column: "exported".to_string(),
        };
        let queries = Queries::render(&config);

        assert!(queries.outstanding.contains("FROM docs"));
        assert!(queries.outstanding.contains("doc_id = ANY($1)"));
        assert!(queries.free.contains("NOT (doc_id = ANY($1))"));
        assert!(queries.free.contains("pdf IS NOT NULL"));
        assert!(queries.stats.contains("FILTER (WHERE exported)"));
    }

    #[tokio::test]
    #[ignore] // Requires database to be running
    async fn test_catalog_queries_against_postgres() {
        let url = std::env::var("SLUICE_DATABASE_URL").unwrap();
        // One connection so the temp table stays visible
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .unwrap();

        sqlx::query(
            r#"
            CREATE TEMP TABLE sluice_items (
                id INTEGER PRIMARY KEY,
                binary_pdf BYTEA,
                text TEXT,
                loaded BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            INSERT INTO sluice_items (id, binary_pdf, text, loaded) VALUES
                (1, 'a', NULL, FALSE),
                (2, 'b', 'done', FALSE),
                (3, NULL, NULL, FALSE),
                (4, 'd', NULL, FALSE),
                (5, NULL, NULL, TRUE)
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let config = CatalogConfig {
            table: "sluice_items".to_string(),
            ..CatalogConfig::default()
        };
        let catalog = PgWorkCatalog::new(pool, &config);

        assert!(catalog.outstanding_among(&[]).await.unwrap().is_empty());
        assert_eq!(
            catalog.outstanding_among(&[1, 2, 3, 4]).await.unwrap(),
            vec![1, 4]
        );
        assert_eq!(catalog.free_items(&[1], 10).await.unwrap(), vec![4]);
        assert_eq!(catalog.free_items(&[], 1).await.unwrap(), vec![1]);

        let stats = catalog.backlog_stats().await.unwrap();
        assert_eq!(
            stats,
            BacklogStats {
                total: 5,
                with_payload: 3,
                with_text: 1,
                loaded: 1,
            }
        );
    }
}
