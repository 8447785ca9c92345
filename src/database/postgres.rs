use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{CollectionSpec, DatabaseError, Document, DocumentStore};
use crate::config::DatabaseConfig;
use crate::filter::filter_where::FilterWhere;
use crate::filter::{Aggregation, Filter, QuerySpec, SqlResult};

/// One table per collection: `(id uuid, created_at timestamptz, version int,
/// data jsonb)`. Unique keys become unique expression indexes over `data`.
pub struct PgStore {
    pool: PgPool,
    log_queries: bool,
    unique_keys: UniqueKeys,
}

/// Unique index name -> the field list it covers, so duplicate-key errors
/// name fields instead of indexes.
#[derive(Default)]
struct UniqueKeys(RwLock<HashMap<String, String>>);

impl UniqueKeys {
    fn index_name(collection: &str, key: &[&str]) -> String {
        format!("{}_{}_key", collection, key.join("_").replace('.', "_"))
    }

    fn register(&self, collection: &str, key: &[&str]) -> String {
        let name = Self::index_name(collection, key);
        let mut map = self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.insert(name.clone(), key.join(", "));
        name
    }

    fn fields_for(&self, constraint: Option<&str>) -> String {
        let Some(constraint) = constraint else {
            return "unique key".to_string();
        };
        let map = self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        map.get(constraint).cloned().unwrap_or_else(|| constraint.to_string())
    }
}

#[derive(FromRow)]
struct DocumentRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    version: i32,
    data: Json<Map<String, Value>>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            created_at: row.created_at,
            version: row.version,
            data: row.data.0,
        }
    }
}

const RETURNING: &str = "RETURNING id, created_at, version, data";

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config.url.as_deref().ok_or(DatabaseError::ConfigMissing("DATABASE_URL"))?;
        url::Url::parse(url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;

        info!("Created database pool (max {} connections)", config.max_connections);
        Ok(Self {
            pool,
            log_queries: config.enable_query_logging,
            unique_keys: UniqueKeys::default(),
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool, log_queries: false, unique_keys: UniqueKeys::default() }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed database pool");
    }

    fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn index_expr(field: &str) -> Result<String, DatabaseError> {
        FilterWhere::validate_column(field)?;
        let segments: Vec<&str> = field.split('.').collect();
        Ok(if segments.len() == 1 {
            format!("(data -> '{}')", field)
        } else {
            format!("(data #> '{{{}}}')", segments.join(","))
        })
    }

    fn map_write_error(&self, collection: &str, err: sqlx::Error) -> DatabaseError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505") {
                return DatabaseError::UniqueViolation {
                    collection: collection.to_string(),
                    fields: self.unique_keys.fields_for(db.constraint()),
                };
            }
        }
        DatabaseError::Sqlx(err)
    }

    fn log(&self, sql: &SqlResult) {
        if self.log_queries {
            debug!(query = %sql.query, params = sql.params.len(), "executing query");
        }
    }
}

fn bind_params<'q>(
    mut q: sqlx::query::QueryAs<'q, Postgres, DocumentRow, PgArguments>,
    params: &[Value],
) -> sqlx::query::QueryAs<'q, Postgres, DocumentRow, PgArguments> {
    for p in params {
        q = q.bind(Json(p.clone()));
    }
    q
}


#[async_trait]
impl DocumentStore for PgStore {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<(), DatabaseError> {
        Filter::validate_table_name(spec.name)?;
        let table = Self::quote_identifier(spec.name);
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id UUID PRIMARY KEY, \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
             version INTEGER NOT NULL DEFAULT 0, \
             data JSONB NOT NULL DEFAULT '{{}}'::jsonb)",
            table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        for key in spec.unique_keys {
            let exprs = key.iter().map(|f| Self::index_expr(f)).collect::<Result<Vec<_>, _>>()?;
            let index = Self::quote_identifier(&self.unique_keys.register(spec.name, key));
            let ddl = format!("CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})", index, table, exprs.join(", "));
            sqlx::query(&ddl).execute(&self.pool).await?;
        }

        info!("Collection ready: {}", spec.name);
        Ok(())
    }

    async fn find(&self, collection: &str, spec: &QuerySpec) -> Result<Vec<Document>, DatabaseError> {
        let sql = Filter::to_sql(collection, spec)?;
        self.log(&sql);
        let rows = bind_params(sqlx::query_as::<_, DocumentRow>(&sql.query), &sql.params)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Document::from).collect())
    }

    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        Filter::validate_table_name(collection)?;
        let query = format!(
            "SELECT id, created_at, version, data FROM {} WHERE id = $1",
            Self::quote_identifier(collection)
        );
        let row = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Document::from))
    }

    async fn insert(&self, collection: &str, data: Map<String, Value>) -> Result<Document, DatabaseError> {
        Filter::validate_table_name(collection)?;
        let query = format!(
            "INSERT INTO {} (id, data) VALUES ($1, $2) {}",
            Self::quote_identifier(collection),
            RETURNING
        );
        let row = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(Uuid::new_v4())
            .bind(Json(data))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_write_error(collection, e))?;
        Ok(row.into())
    }

    async fn replace(
        &self,
        collection: &str,
        id: Uuid,
        version: i32,
        data: Map<String, Value>,
    ) -> Result<Option<Document>, DatabaseError> {
        Filter::validate_table_name(collection)?;
        let query = format!(
            "UPDATE {} SET data = $2, version = version + 1 WHERE id = $1 AND version = $3 {}",
            Self::quote_identifier(collection),
            RETURNING
        );
        let row = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(id)
            .bind(Json(data))
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_write_error(collection, e))?;
        match row {
            Some(row) => Ok(Some(row.into())),
            None if self.find_by_id(collection, id).await?.is_some() => {
                Err(DatabaseError::Conflict { collection: collection.to_string(), id })
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        Filter::validate_table_name(collection)?;
        let query = format!("DELETE FROM {} WHERE id = $1 {}", Self::quote_identifier(collection), RETURNING);
        let row = sqlx::query_as::<_, DocumentRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Document::from))
    }

    async fn aggregate(&self, collection: &str, aggregation: &Aggregation) -> Result<Vec<Value>, DatabaseError> {
        let sql = aggregation.to_sql(collection)?;
        self.log(&sql);
        let mut q = sqlx::query_scalar::<_, Json<Value>>(&sql.query);
        for p in &sql.params {
            q = q.bind(Json(p.clone()));
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| row.0).collect())
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
