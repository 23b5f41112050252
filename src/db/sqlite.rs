use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension};
use tokio_rusqlite::Connection;

use super::backend::{BannerStore, FeatureValidator, StoreError, TagValidator};
use super::sanitize::{normalize_tag_ids, to_sql_bound, validate_limit, validate_offset};
use crate::types::{
  Banner, BannerFilter, BannerId, BannerPatch, Content, FeatureId, NewBanner, Patch, TagId,
};

const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;
PRAGMA foreign_keys = ON;
"#;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS features (
    id INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS banners (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feature_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (id, feature_id)
);
CREATE INDEX IF NOT EXISTS idx_banners_feature ON banners(feature_id);

CREATE TABLE IF NOT EXISTS banner_tags (
    banner_id INTEGER NOT NULL,
    feature_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    PRIMARY KEY (banner_id, tag_id),
    UNIQUE (feature_id, tag_id),
    FOREIGN KEY (banner_id, feature_id) REFERENCES banners (id, feature_id)
        ON UPDATE CASCADE ON DELETE CASCADE
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_banner_tags_tag ON banner_tags(tag_id);
"#;

// Tags come back as a JSON array and are sorted on decode
const BANNER_COLUMNS: &str = "b.id, \
  (SELECT json_group_array(t.tag_id) FROM banner_tags t WHERE t.banner_id = b.id), \
  b.feature_id, b.content, b.is_active, b.created_at, b.updated_at";

type RawBanner = (i64, String, i64, String, bool, String, String);

pub struct SqliteBackend {
  conn: Connection,
}

impl SqliteBackend {
  pub async fn new(path: &str) -> Result<Self, anyhow::Error> {
    let conn = if path == ":memory:" {
      Connection::open_in_memory().await?
    } else {
      Connection::open(path).await?
    };

    conn
      .call(|conn| conn.execute_batch(PRAGMAS).map_err(|e| e.into()))
      .await?;

    Ok(Self { conn })
  }

  pub async fn in_memory() -> Result<Self, anyhow::Error> {
    Self::new(":memory:").await
  }

  /// Seed the `features` reference table. Idempotent.
  pub async fn register_feature(&self, id: FeatureId) -> Result<(), StoreError> {
    self
      .conn
      .call(move |conn| {
        conn.execute("INSERT OR IGNORE INTO features (id) VALUES (?1)", params![id])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Seed the `tags` reference table. Idempotent.
  pub async fn register_tag(&self, id: TagId) -> Result<(), StoreError> {
    self
      .conn
      .call(move |conn| {
        conn.execute("INSERT OR IGNORE INTO tags (id) VALUES (?1)", params![id])?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

fn now() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn read_raw(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawBanner> {
  Ok((
    r.get(0)?,
    r.get(1)?,
    r.get(2)?,
    r.get(3)?,
    r.get(4)?,
    r.get(5)?,
    r.get(6)?,
  ))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
  DateTime::parse_from_rfc3339(s)
    .map(|t| t.with_timezone(&Utc))
    .map_err(|e| StoreError::Decode(format!("timestamp {s:?}: {e}")))
}

fn decode(raw: RawBanner) -> Result<Banner, StoreError> {
  let (id, tags, feature_id, content, is_active, created_at, updated_at) = raw;
  let mut tag_ids: Vec<TagId> = serde_json::from_str(&tags)?;
  tag_ids.sort_unstable();
  let content: Content = serde_json::from_str(&content)?;
  Ok(Banner {
    id,
    tag_ids,
    feature_id,
    content,
    is_active,
    created_at: parse_timestamp(&created_at)?,
    updated_at: parse_timestamp(&updated_at)?,
  })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
  match e {
    rusqlite::Error::SqliteFailure(err, _) => {
      err.code == ErrorCode::ConstraintViolation
        && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
          || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    }
    _ => false,
  }
}

fn insert_tags(
  tx: &rusqlite::Transaction<'_>,
  banner_id: BannerId,
  feature_id: FeatureId,
  tag_ids: &[TagId],
) -> rusqlite::Result<()> {
  let mut stmt = tx.prepare_cached(
    "INSERT INTO banner_tags (banner_id, feature_id, tag_id) VALUES (?1, ?2, ?3)",
  )?;
  for tag_id in tag_ids {
    stmt.execute(params![banner_id, feature_id, tag_id])?;
  }
  Ok(())
}

#[async_trait]
impl BannerStore for SqliteBackend {
  async fn init_schema(&self) -> Result<(), StoreError> {
    self
      .conn
      .call(|conn| conn.execute_batch(SCHEMA).map_err(|e| e.into()))
      .await?;
    tracing::info!("SQLite schema initialized");
    Ok(())
  }

  async fn ping(&self) -> Result<(), StoreError> {
    self
      .conn
      .call(|conn| {
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn exists_by_id(&self, id: BannerId) -> Result<bool, StoreError> {
    let exists = self
      .conn
      .call(move |conn| {
        conn
          .query_row(
            "SELECT EXISTS(SELECT 1 FROM banners WHERE id = ?1)",
            params![id],
            |r| r.get(0),
          )
          .map_err(|e| e.into())
      })
      .await?;
    Ok(exists)
  }

  async fn exists_by_feature_tag(
    &self,
    feature_id: FeatureId,
    tag_id: TagId,
  ) -> Result<bool, StoreError> {
    let exists = self
      .conn
      .call(move |conn| {
        conn
          .query_row(
            "SELECT EXISTS(SELECT 1 FROM banner_tags WHERE feature_id = ?1 AND tag_id = ?2)",
            params![feature_id, tag_id],
            |r| r.get(0),
          )
          .map_err(|e| e.into())
      })
      .await?;
    Ok(exists)
  }

  async fn list(&self, filter: &BannerFilter) -> Result<Vec<Banner>, StoreError> {
    if let Some(l) = filter.limit {
      validate_limit(l)?;
    }
    let offset = filter.offset.unwrap_or(0);
    validate_offset(offset)?;

    // LIMIT -1 is "no limit" in SQLite
    let limit = filter.limit.map(to_sql_bound).unwrap_or(-1);
    let offset = to_sql_bound(offset);
    let feature_id = filter.feature_id;
    let tag_id = filter.tag_id;

    let sql = format!(
      "SELECT {BANNER_COLUMNS} FROM banners b \
       WHERE (?1 IS NULL OR b.feature_id = ?1) \
       AND (?2 IS NULL OR EXISTS \
         (SELECT 1 FROM banner_tags t WHERE t.banner_id = b.id AND t.tag_id = ?2)) \
       ORDER BY b.id LIMIT ?3 OFFSET ?4"
    );

    let rows: Vec<RawBanner> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![feature_id, tag_id, limit, offset], read_raw)?
          .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(decode).collect()
  }

  async fn get_by_id(&self, id: BannerId) -> Result<Banner, StoreError> {
    let sql = format!("SELECT {BANNER_COLUMNS} FROM banners b WHERE b.id = ?1");
    let raw = self
      .conn
      .call(move |conn| {
        conn
          .query_row(&sql, params![id], read_raw)
          .optional()
          .map_err(|e| e.into())
      })
      .await?;
    raw.map(decode).unwrap_or(Err(StoreError::NotFound))
  }

  async fn create(&self, banner: &NewBanner) -> Result<BannerId, StoreError> {
    let tag_ids = normalize_tag_ids(&banner.tag_ids)?;
    let content = serde_json::to_string(&banner.content)?;
    let feature_id = banner.feature_id;
    let is_active = banner.is_active;

    let id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let ts = now();
        tx.execute(
          "INSERT INTO banners (feature_id, content, is_active, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?4)",
          params![feature_id, content, is_active, ts],
        )?;
        let id = tx.last_insert_rowid();

        match insert_tags(&tx, id, feature_id, &tag_ids) {
          Ok(()) => {}
          Err(e) if is_unique_violation(&e) => return Ok(Err(StoreError::AlreadyExists)),
          Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        Ok(Ok(id))
      })
      .await??;

    tracing::debug!(banner_id = id, feature_id, "banner created");
    Ok(id)
  }

  async fn update(&self, id: BannerId, patch: &BannerPatch) -> Result<(), StoreError> {
    let new_tags = match &patch.tag_ids {
      Patch::Set(tags) => Some(normalize_tag_ids(tags)?),
      Patch::Unchanged => None,
    };
    let content = patch
      .content
      .as_set()
      .map(serde_json::to_string)
      .transpose()?;
    let new_feature = patch.feature_id;
    let is_active = patch.is_active;

    // Returning before commit drops the transaction, which rolls back
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let old_feature: Option<FeatureId> = tx
          .query_row(
            "SELECT feature_id FROM banners WHERE id = ?1",
            params![id],
            |r| r.get(0),
          )
          .optional()?;
        let Some(old_feature) = old_feature else {
          return Ok(Err(StoreError::NotFound));
        };
        let feature_id = new_feature.resolve(old_feature);

        let candidates: Vec<TagId> = match &new_tags {
          Some(tags) => {
            tx.execute("DELETE FROM banner_tags WHERE banner_id = ?1", params![id])?;
            tags.clone()
          }
          None if feature_id != old_feature => {
            let mut stmt = tx.prepare("SELECT tag_id FROM banner_tags WHERE banner_id = ?1")?;
            let tags = stmt
              .query_map(params![id], |r| r.get(0))?
              .collect::<Result<Vec<_>, _>>()?;
            tags
          }
          None => Vec::new(),
        };

        for tag_id in &candidates {
          let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM banner_tags
             WHERE feature_id = ?1 AND tag_id = ?2 AND banner_id <> ?3)",
            params![feature_id, tag_id, id],
            |r| r.get(0),
          )?;
          if taken {
            return Ok(Err(StoreError::AlreadyExists));
          }
        }

        if let Patch::Set(f) = new_feature {
          match tx.execute(
            "UPDATE banners SET feature_id = ?1 WHERE id = ?2",
            params![f, id],
          ) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Ok(Err(StoreError::AlreadyExists)),
            Err(e) => return Err(e.into()),
          }
        }
        if let Some(content) = &content {
          tx.execute(
            "UPDATE banners SET content = ?1 WHERE id = ?2",
            params![content, id],
          )?;
        }
        if let Patch::Set(active) = is_active {
          tx.execute(
            "UPDATE banners SET is_active = ?1 WHERE id = ?2",
            params![active, id],
          )?;
        }
        tx.execute(
          "UPDATE banners SET updated_at = ?1 WHERE id = ?2",
          params![now(), id],
        )?;

        if let Some(tags) = &new_tags {
          match insert_tags(&tx, id, feature_id, tags) {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => return Ok(Err(StoreError::AlreadyExists)),
            Err(e) => return Err(e.into()),
          }
        }

        tx.commit()?;
        Ok(Ok(()))
      })
      .await??;

    tracing::debug!(banner_id = id, "banner updated");
    Ok(())
  }

  async fn delete_by_id(&self, id: BannerId) -> Result<(), StoreError> {
    let affected = self
      .conn
      .call(move |conn| {
        conn
          .execute("DELETE FROM banners WHERE id = ?1", params![id])
          .map_err(|e| e.into())
      })
      .await?;
    if affected == 0 {
      return Err(StoreError::NotFound);
    }
    Ok(())
  }
}

#[async_trait]
impl FeatureValidator for SqliteBackend {
  async fn feature_exists(&self, id: FeatureId) -> Result<bool, StoreError> {
    let exists = self
      .conn
      .call(move |conn| {
        conn
          .query_row(
            "SELECT EXISTS(SELECT 1 FROM features WHERE id = ?1)",
            params![id],
            |r| r.get(0),
          )
          .map_err(|e| e.into())
      })
      .await?;
    Ok(exists)
  }
}

#[async_trait]
impl TagValidator for SqliteBackend {
  async fn tag_exists(&self, id: TagId) -> Result<bool, StoreError> {
    let exists = self
      .conn
      .call(move |conn| {
        conn
          .query_row(
            "SELECT EXISTS(SELECT 1 FROM tags WHERE id = ?1)",
            params![id],
            |r| r.get(0),
          )
          .map_err(|e| e.into())
      })
      .await?;
    Ok(exists)
  }
}
