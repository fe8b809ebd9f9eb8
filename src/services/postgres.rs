use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::config::DatabaseSettings;
use crate::models::BusinessRecord;
use crate::services::catalog::{CatalogError, CatalogSource};

const ACTIVE_BUSINESSES: &str = r#"
    SELECT id::text AS id, name, description, industry_type, slug, status, location
    FROM businesses
    WHERE lower(status) = 'active'
    ORDER BY created_at, id
"#;

/// Read-only PostgreSQL view of the business directory
///
/// The directory schema and its migrations belong to the platform; this
/// client only ever selects.
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(idle_timeout)
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn from_settings(settings: &DatabaseSettings) -> Result<Self, CatalogError> {
        tracing::info!("Connecting to business catalog database");

        Self::new(
            &settings.url,
            settings.max_connections.unwrap_or(5),
            settings.min_connections.unwrap_or(1),
            Duration::from_secs(settings.acquire_timeout_secs.unwrap_or(5)),
            Duration::from_secs(settings.idle_timeout_secs.unwrap_or(600)),
        )
        .await
    }
}

#[async_trait]
impl CatalogSource for PostgresCatalog {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn fetch_active(&self) -> Result<Vec<BusinessRecord>, CatalogError> {
        let rows = sqlx::query(ACTIVE_BUSINESSES).fetch_all(&self.pool).await?;

        let records = rows
            .iter()
            .map(|row| {
                Ok(BusinessRecord {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    description: row.try_get::<Option<String>, _>("description")?.unwrap_or_default(),
                    industry_type: row.try_get::<Option<String>, _>("industry_type")?.unwrap_or_default(),
                    slug: row.try_get::<Option<String>, _>("slug")?.unwrap_or_default(),
                    status: row.try_get("status")?,
                    location: row.try_get("location")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        tracing::debug!("Loaded {} active businesses from PostgreSQL", records.len());

        Ok(records)
    }
}
