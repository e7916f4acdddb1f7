use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use super::{
    CatalogError,
    CatalogStore,
    Device,
    ImageObject,
    ImageType,
    NewImageObject,
    ObjectStatus,
};

/// Schema revision applied when a catalog is opened.
pub const CATALOG_SCHEMA_VERSION: i64 = 1;

const IMAGE_COLUMNS: &str = "id, device_id, recorded_at, bucket, object_name, object_version, \
                             checksum, image_type, status, metadata_json, created_at";

/// [`CatalogStore`] backed by a single SQLite connection.
///
/// Statements run on the blocking thread pool; the connection is guarded by
/// a mutex so calls from concurrent tasks are serialised.
#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCatalog").finish_non_exhaustive()
    }
}

impl SqliteCatalog {
    /// Open (creating if needed) the catalog database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CatalogError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Schema revision recorded in the database.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the pragma cannot be read.
    pub async fn schema_version(&self) -> Result<i64, CatalogError> {
        self.with_conn(|conn| Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?))
            .await
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, CatalogError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CatalogError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CatalogError::Unavailable("catalog connection poisoned".into()))?;
            op(&guard)
        })
        .await
        .map_err(|e| CatalogError::Unavailable(e.to_string()))?
    }
}

fn migrate(conn: &Connection) -> Result<(), CatalogError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > CATALOG_SCHEMA_VERSION {
        return Err(CatalogError::Corrupt(format!(
            "schema version {current} is newer than supported {CATALOG_SCHEMA_VERSION}"
        )));
    }
    if current < 1 {
        conn.execute_batch(include_str!("../../migrations/0001_catalog.sql"))?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    Ok(())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == ErrorCode::ConstraintViolation
                && inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, CatalogError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| CatalogError::Corrupt(format!("timestamp {raw:?}: {e}")))
}

fn select_device(conn: &Connection, device_uid: &str) -> Result<Option<Device>, CatalogError> {
    let row = conn
        .query_row(
            "SELECT id, device_uid, name, device_type, created_at FROM devices WHERE device_uid = ?1",
            params![device_uid],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    row.map(|(id, device_uid, name, device_type, created_at)| {
        Ok(Device {
            id,
            device_uid,
            name,
            device_type,
            created_at: parse_time(&created_at)?,
        })
    })
    .transpose()
}

struct RawImage {
    id: i64,
    device_id: i64,
    recorded_at: String,
    bucket: String,
    object_name: String,
    object_version: Option<String>,
    checksum: String,
    image_type: String,
    status: String,
    metadata_json: String,
    created_at: String,
}

impl RawImage {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            device_id: row.get(1)?,
            recorded_at: row.get(2)?,
            bucket: row.get(3)?,
            object_name: row.get(4)?,
            object_version: row.get(5)?,
            checksum: row.get(6)?,
            image_type: row.get(7)?,
            status: row.get(8)?,
            metadata_json: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn decode(self) -> Result<ImageObject, CatalogError> {
        let image_type = ImageType::parse(&self.image_type)
            .ok_or_else(|| CatalogError::Corrupt(format!("image type {:?}", self.image_type)))?;
        let status = ObjectStatus::parse(&self.status)
            .ok_or_else(|| CatalogError::Corrupt(format!("status {:?}", self.status)))?;
        let metadata = serde_json::from_str(&self.metadata_json)
            .map_err(|e| CatalogError::Corrupt(format!("metadata: {e}")))?;
        Ok(ImageObject {
            id: self.id,
            fields: NewImageObject {
                device_id: self.device_id,
                recorded_at: parse_time(&self.recorded_at)?,
                bucket: self.bucket,
                object_name: self.object_name,
                object_version: self.object_version,
                checksum: self.checksum,
                image_type,
                status,
                metadata,
            },
            created_at: parse_time(&self.created_at)?,
        })
    }
}

fn select_image(
    conn: &Connection,
    bucket: &str,
    object_name: &str,
) -> Result<Option<ImageObject>, CatalogError> {
    conn.query_row(
        &format!("SELECT {IMAGE_COLUMNS} FROM image_objects WHERE bucket = ?1 AND object_name = ?2"),
        params![bucket, object_name],
        RawImage::from_row,
    )
    .optional()?
    .map(RawImage::decode)
    .transpose()
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn get_or_create_device(&self, device_uid: &str) -> Result<Device, CatalogError> {
        let device_uid = device_uid.to_owned();
        self.with_conn(move |conn| {
            if let Some(device) = select_device(conn, &device_uid)? {
                return Ok(device);
            }
            let inserted = conn.execute(
                "INSERT INTO devices (device_uid, name, created_at) VALUES (?1, ?1, ?2)",
                params![device_uid, Utc::now().to_rfc3339()],
            );
            match inserted {
                Ok(_) => debug!("device created: device_uid={device_uid}"),
                // Another writer created it between our read and insert.
                Err(e) if is_unique_violation(&e) => {
                    debug!("device created concurrently: device_uid={device_uid}");
                }
                Err(e) => return Err(e.into()),
            }
            select_device(conn, &device_uid)?.ok_or_else(|| {
                CatalogError::Corrupt(format!("device {device_uid} vanished after insert"))
            })
        })
        .await
    }

    async fn insert_image(&self, image: NewImageObject) -> Result<ImageObject, CatalogError> {
        self.with_conn(move |conn| {
            let metadata_json = serde_json::to_string(&image.metadata)
                .map_err(|e| CatalogError::Corrupt(format!("metadata: {e}")))?;
            let inserted = conn.execute(
                "INSERT INTO image_objects (device_id, recorded_at, bucket, object_name, \
                 object_version, checksum, image_type, status, metadata_json, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    image.device_id,
                    image.recorded_at.to_rfc3339(),
                    image.bucket,
                    image.object_name,
                    image.object_version,
                    image.checksum,
                    image.image_type.as_str(),
                    image.status.as_str(),
                    metadata_json,
                    Utc::now().to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(CatalogError::Duplicate {
                        bucket: image.bucket,
                        object_name: image.object_name,
                    });
                }
                Err(e) => return Err(e.into()),
            }
            select_image(conn, &image.bucket, &image.object_name)?.ok_or_else(|| {
                CatalogError::Corrupt(format!(
                    "image {}/{} vanished after insert",
                    image.bucket, image.object_name
                ))
            })
        })
        .await
    }

    async fn find_image(
        &self,
        bucket: &str,
        object_name: &str,
    ) -> Result<Option<ImageObject>, CatalogError> {
        let bucket = bucket.to_owned();
        let object_name = object_name.to_owned();
        self.with_conn(move |conn| select_image(conn, &bucket, &object_name))
            .await
    }

    async fn ping(&self) -> Result<(), CatalogError> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |_| Ok(()))?))
            .await
    }
}
