use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::Location;

/// Parameters for inserting a new location record.
pub struct InsertLocationParams {
    pub name: String,
    pub location_type: String,
    pub attributes: serde_json::Value,
}

/// Parameters for updating an existing location. `None` leaves a column as-is.
pub struct UpdateLocationParams {
    pub name: Option<String>,
    pub attributes: Option<serde_json::Value>,
}

/// List all locations, oldest first.
pub async fn list_locations(pool: &PgPool) -> Result<Vec<Location>, sqlx::Error> {
    sqlx::query_as::<_, Location>(
        "SELECT id, name, type, attributes, created_at, updated_at
         FROM weather_locations
         ORDER BY created_at, name",
    )
    .fetch_all(pool)
    .await
}

/// Get a single location by ID.
pub async fn get_location(pool: &PgPool, id: Uuid) -> Result<Option<Location>, sqlx::Error> {
    sqlx::query_as::<_, Location>(
        "SELECT id, name, type, attributes, created_at, updated_at
         FROM weather_locations WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Insert a location and return the stored row.
pub async fn insert_location(
    pool: &PgPool,
    params: InsertLocationParams,
) -> Result<Location, sqlx::Error> {
    sqlx::query_as::<_, Location>(
        "INSERT INTO weather_locations (id, name, type, attributes, created_at)
         VALUES ($1, $2, $3, $4, now())
         RETURNING id, name, type, attributes, created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(&params.name)
    .bind(&params.location_type)
    .bind(&params.attributes)
    .fetch_one(pool)
    .await
}

/// Update a location in place. Returns `None` if the row does not exist.
///
/// Attributes are merged (`||`) so a partial update keeps untouched fields.
pub async fn update_location(
    pool: &PgPool,
    id: Uuid,
    params: UpdateLocationParams,
) -> Result<Option<Location>, sqlx::Error> {
    sqlx::query_as::<_, Location>(
        "UPDATE weather_locations
         SET name = COALESCE($2, name),
             attributes = CASE WHEN $3::jsonb IS NULL THEN attributes ELSE attributes || $3::jsonb END,
             updated_at = now()
         WHERE id = $1
         RETURNING id, name, type, attributes, created_at, updated_at",
    )
    .bind(id)
    .bind(params.name)
    .bind(params.attributes)
    .fetch_optional(pool)
    .await
}

/// Delete a location. Returns whether a row was removed.
pub async fn delete_location(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM weather_locations WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Location persistence as seen by the services.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn find_all(&self) -> Result<Vec<Location>, sqlx::Error>;
    async fn find_one(&self, id: Uuid) -> Result<Option<Location>, sqlx::Error>;
    async fn insert(&self, params: InsertLocationParams) -> Result<Location, sqlx::Error>;
    async fn update(
        &self,
        id: Uuid,
        params: UpdateLocationParams,
    ) -> Result<Option<Location>, sqlx::Error>;
    async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error>;
}

/// Postgres-backed [`LocationStore`].
#[derive(Debug, Clone)]
pub struct PgLocationStore {
    pool: PgPool,
}

impl PgLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn find_all(&self) -> Result<Vec<Location>, sqlx::Error> {
        list_locations(&self.pool).await
    }

    async fn find_one(&self, id: Uuid) -> Result<Option<Location>, sqlx::Error> {
        get_location(&self.pool, id).await
    }

    async fn insert(&self, params: InsertLocationParams) -> Result<Location, sqlx::Error> {
        insert_location(&self.pool, params).await
    }

    async fn update(
        &self,
        id: Uuid,
        params: UpdateLocationParams,
    ) -> Result<Option<Location>, sqlx::Error> {
        update_location(&self.pool, id, params).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        delete_location(&self.pool, id).await
    }
}

/// In-memory [`LocationStore`] used by service tests.
#[cfg(test)]
pub mod memory {
    use super::*;
    use chrono::Utc;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryLocationStore {
        rows: RwLock<Vec<Location>>,
    }

    impl MemoryLocationStore {
        pub fn with(rows: Vec<Location>) -> Self {
            Self {
                rows: RwLock::new(rows),
            }
        }
    }

    #[async_trait]
    impl LocationStore for MemoryLocationStore {
        async fn find_all(&self) -> Result<Vec<Location>, sqlx::Error> {
            Ok(self.rows.read().await.clone())
        }

        async fn find_one(&self, id: Uuid) -> Result<Option<Location>, sqlx::Error> {
            Ok(self.rows.read().await.iter().find(|l| l.id == id).cloned())
        }

        async fn insert(&self, params: InsertLocationParams) -> Result<Location, sqlx::Error> {
            let location = Location {
                id: Uuid::new_v4(),
                name: params.name,
                location_type: params.location_type,
                attributes: params.attributes,
                created_at: Utc::now(),
                updated_at: None,
            };
            self.rows.write().await.push(location.clone());
            Ok(location)
        }

        async fn update(
            &self,
            id: Uuid,
            params: UpdateLocationParams,
        ) -> Result<Option<Location>, sqlx::Error> {
            let mut rows = self.rows.write().await;
            let Some(row) = rows.iter_mut().find(|l| l.id == id) else {
                return Ok(None);
            };
            if let Some(name) = params.name {
                row.name = name;
            }
            if let Some(serde_json::Value::Object(patch)) = params.attributes {
                if let serde_json::Value::Object(existing) = &mut row.attributes {
                    existing.extend(patch);
                }
            }
            row.updated_at = Some(Utc::now());
            Ok(Some(row.clone()))
        }

        async fn delete(&self, id: Uuid) -> Result<bool, sqlx::Error> {
            let mut rows = self.rows.write().await;
            let before = rows.len();
            rows.retain(|l| l.id != id);
            Ok(rows.len() != before)
        }
    }
}
