//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `EntityStore` port from the `core` crate. Every collection lives in one
//! PostgreSQL table of JSONB documents, accessed through `sqlx`.

use async_trait::async_trait;
use mentorship_core::ports::{
    ChangeEvent, ChangeKind, Collection, DocumentPage, EntityStore, Filter, PageRequest,
    PortError, PortResult,
};
use serde_json::{Map, Value};
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_FEED_CAPACITY: usize = 1024;
const UNIQUE_VIOLATION: &str = "23505";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A document store adapter that implements the `EntityStore` port.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { pool, changes }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is not an error.
        let _ = self.changes.send(event);
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn map_sqlx(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PortError::Transient(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn not_found(collection: Collection, id: &str) -> PortError {
    PortError::NotFound(format!("{} {}", collection, id))
}

fn encode_cursor(seq: i64) -> String {
    format!("c{:016x}", seq)
}

fn decode_cursor(cursor: &str) -> PortResult<i64> {
    cursor
        .strip_prefix('c')
        .and_then(|hex| i64::from_str_radix(hex, 16).ok())
        .ok_or_else(|| PortError::Validation(format!("invalid cursor '{}'", cursor)))
}

/// Appends `AND body->'field' = value` for every filter. A null filter also
/// matches documents without the field.
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &[Filter]) {
    for filter in filters {
        if filter.value.is_null() {
            builder.push(" AND (body -> ");
            builder.push_bind(filter.field.clone());
            builder.push(" IS NULL OR body -> ");
            builder.push_bind(filter.field.clone());
            builder.push(" = 'null'::jsonb)");
        } else {
            builder.push(" AND body -> ");
            builder.push_bind(filter.field.clone());
            builder.push(" = ");
            builder.push_bind(Json(filter.value.clone()));
        }
    }
}

/// `UPDATE ... WHERE <conditions> RETURNING body`. The conditions sit in the
/// UPDATE itself, so the check and the write happen under one row lock.
fn conditional_patch(
    collection: Collection,
    id: &str,
    expected: &[Filter],
    fields: Map<String, Value>,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("UPDATE documents SET body = body || ");
    builder.push_bind(Json(Value::Object(fields)));
    builder.push(" WHERE collection = ");
    builder.push_bind(collection.as_str());
    builder.push(" AND id = ");
    builder.push_bind(id.to_string());
    push_filters(&mut builder, expected);
    builder.push(" RETURNING body");
    builder
}

//=========================================================================================
// `EntityStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl EntityStore for PgDocumentStore {
    async fn insert(&self, collection: Collection, id: &str, document: Value) -> PortResult<()> {
        if !document.is_object() {
            return Err(PortError::Validation("documents must be JSON objects".to_string()));
        }
        let event = ChangeEvent::for_document(collection, id, &document, ChangeKind::Created);
        sqlx::query(
            "INSERT INTO documents (collection, id, organization_id, body) VALUES ($1, $2, $3, $4)",
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(event.organization_id.clone())
        .bind(Json(document))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = e
                .as_database_error()
                .and_then(|d| d.code())
                .is_some_and(|code| code == UNIQUE_VIOLATION);
            if duplicate {
                PortError::Validation(format!("{} {} already exists", collection, id))
            } else {
                map_sqlx(e)
            }
        })?;
        debug!(collection = %collection, id, "document inserted");
        self.publish(event);
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> PortResult<Option<Value>> {
        let body = sqlx::query_scalar::<_, Json<Value>>(
            "SELECT body FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(body.map(|Json(body)| body))
    }

    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> PortResult<()> {
        let Json(body) = sqlx::query_scalar::<_, Json<Value>>(
            "UPDATE documents SET body = body || $3 WHERE collection = $1 AND id = $2 RETURNING body",
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(Json(Value::Object(fields)))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| not_found(collection, id))?;
        self.publish(ChangeEvent::for_document(collection, id, &body, ChangeKind::Updated));
        Ok(())
    }

    async fn patch_if(
        &self,
        collection: Collection,
        id: &str,
        expected: &[Filter],
        fields: Map<String, Value>,
    ) -> PortResult<bool> {
        let mut builder = conditional_patch(collection, id, expected, fields);
        let updated = builder
            .build_query_scalar::<Json<Value>>()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        match updated {
            Some(Json(body)) => {
                self.publish(ChangeEvent::for_document(collection, id, &body, ChangeKind::Updated));
                Ok(true)
            }
            None if self.get(collection, id).await?.is_some() => {
                debug!(collection = %collection, id, "conditional patch skipped");
                Ok(false)
            }
            None => Err(not_found(collection, id)),
        }
    }

    async fn delete(&self, collection: Collection, id: &str) -> PortResult<()> {
        let Json(body) = sqlx::query_scalar::<_, Json<Value>>(
            "DELETE FROM documents WHERE collection = $1 AND id = $2 RETURNING body",
        )
        .bind(collection.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| not_found(collection, id))?;
        self.publish(ChangeEvent::for_document(collection, id, &body, ChangeKind::Deleted));
        Ok(())
    }

    async fn query(&self, collection: Collection, filters: &[Filter]) -> PortResult<Vec<Value>> {
        let mut builder = QueryBuilder::new("SELECT body FROM documents WHERE collection = ");
        builder.push_bind(collection.as_str());
        push_filters(&mut builder, filters);
        builder.push(" ORDER BY seq");

        let rows = builder
            .build_query_scalar::<Json<Value>>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(|Json(body)| body).collect())
    }

    async fn page(
        &self,
        collection: Collection,
        filters: &[Filter],
        request: &PageRequest,
    ) -> PortResult<DocumentPage> {
        let after = request.cursor.as_deref().map(decode_cursor).transpose()?;
        let limit = i64::try_from(request.page_size)
            .map_err(|_| PortError::Validation("page size is too large".to_string()))?;

        let mut builder = QueryBuilder::new("SELECT seq, body FROM documents WHERE collection = ");
        builder.push_bind(collection.as_str());
        push_filters(&mut builder, filters);
        if let Some(seq) = after {
            builder.push(" AND seq > ");
            builder.push_bind(seq);
        }
        builder.push(" ORDER BY seq LIMIT ");
        // One extra row tells whether another page exists.
        builder.push_bind(limit + 1);

        let mut rows = builder
            .build_query_as::<(i64, Json<Value>)>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        let has_more = rows.len() > request.page_size;
        rows.truncate(request.page_size);
        let next_cursor = rows.last().map(|(seq, _)| encode_cursor(*seq));
        Ok(DocumentPage {
            documents: rows.into_iter().map(|(_, Json(body))| body).collect(),
            next_cursor,
            has_more,
        })
    }

    async fn increment(
        &self,
        collection: Collection,
        id: &str,
        field: &str,
        delta: i64,
    ) -> PortResult<()> {
        // Single statement, so concurrent increments serialize on the row lock.
        let Json(body) = sqlx::query_scalar::<_, Json<Value>>(
            "UPDATE documents \
             SET body = jsonb_set(body, ARRAY[$3::text], \
                 to_jsonb(COALESCE((body ->> $3::text)::bigint, 0) + $4::bigint)) \
             WHERE collection = $1 AND id = $2 \
             RETURNING body",
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(field)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or_else(|| not_found(collection, id))?;
        self.publish(ChangeEvent::for_document(collection, id, &body, ChangeKind::Updated));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
