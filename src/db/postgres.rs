use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Transaction};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Json;
use tokio_postgres::{NoTls, Row};

use super::backend::{BannerStore, FeatureValidator, StoreError, TagValidator};
use super::sanitize::{normalize_tag_ids, to_sql_bound, validate_limit, validate_offset};
use crate::types::{
  Banner, BannerFilter, BannerId, BannerPatch, Content, FeatureId, NewBanner, Patch, TagId,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS features (
    id BIGINT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS tags (
    id BIGINT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS banners (
    id BIGSERIAL PRIMARY KEY,
    feature_id BIGINT NOT NULL,
    content JSONB NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (id, feature_id)
);
CREATE INDEX IF NOT EXISTS idx_banners_feature ON banners(feature_id);

-- feature_id is carried here so the (feature, tag) uniqueness is a real
-- constraint; it follows banners.feature_id through ON UPDATE CASCADE.
CREATE TABLE IF NOT EXISTS banner_tags (
    banner_id BIGINT NOT NULL,
    feature_id BIGINT NOT NULL,
    tag_id BIGINT NOT NULL,
    PRIMARY KEY (banner_id, tag_id),
    UNIQUE (feature_id, tag_id),
    FOREIGN KEY (banner_id, feature_id) REFERENCES banners (id, feature_id)
        ON UPDATE CASCADE ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_banner_tags_tag ON banner_tags(tag_id);
"#;

const BANNER_COLUMNS: &str = "b.id, \
  ARRAY(SELECT t.tag_id FROM banner_tags t WHERE t.banner_id = b.id ORDER BY t.tag_id), \
  b.feature_id, b.content, b.is_active, b.created_at, b.updated_at";

pub struct PostgresBackend {
  pool: Pool,
}

impl PostgresBackend {
  pub fn new(url: &str, max_connections: usize) -> Result<Self, anyhow::Error> {
    let mut cfg = Config::new();
    cfg.url = Some(url.into());
    cfg.manager = Some(ManagerConfig {
      recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(max_connections.max(1)));
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    Ok(Self { pool })
  }

  /// Seed the `features` reference table. Idempotent.
  pub async fn register_feature(&self, id: FeatureId) -> Result<(), StoreError> {
    self
      .pool
      .get()
      .await?
      .execute(
        "INSERT INTO features (id) VALUES ($1) ON CONFLICT DO NOTHING",
        &[&id],
      )
      .await?;
    Ok(())
  }

  /// Seed the `tags` reference table. Idempotent.
  pub async fn register_tag(&self, id: TagId) -> Result<(), StoreError> {
    self
      .pool
      .get()
      .await?
      .execute(
        "INSERT INTO tags (id) VALUES ($1) ON CONFLICT DO NOTHING",
        &[&id],
      )
      .await?;
    Ok(())
  }
}

fn row_to_banner(r: &Row) -> Banner {
  Banner {
    id: r.get(0),
    tag_ids: r.get(1),
    feature_id: r.get(2),
    content: r.get::<_, Json<Content>>(3).0,
    is_active: r.get(4),
    created_at: r.get(5),
    updated_at: r.get(6),
  }
}

/// Unique violations are the authoritative conflict signal
fn map_pg_error(e: tokio_postgres::Error) -> StoreError {
  if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
    StoreError::AlreadyExists
  } else {
    StoreError::Postgres(e)
  }
}

async fn insert_tags(
  tx: &Transaction<'_>,
  banner_id: BannerId,
  feature_id: FeatureId,
  tag_ids: &[TagId],
) -> Result<(), StoreError> {
  tx.execute(
    "INSERT INTO banner_tags (banner_id, feature_id, tag_id) SELECT $1, $2, UNNEST($3::BIGINT[])",
    &[&banner_id, &feature_id, &tag_ids],
  )
  .await
  .map_err(map_pg_error)?;
  Ok(())
}

#[async_trait]
impl BannerStore for PostgresBackend {
  async fn init_schema(&self) -> Result<(), StoreError> {
    self.pool.get().await?.batch_execute(SCHEMA).await?;
    tracing::info!("PostgreSQL schema initialized");
    Ok(())
  }

  async fn ping(&self) -> Result<(), StoreError> {
    self.pool.get().await?.execute("SELECT 1", &[]).await?;
    Ok(())
  }

  async fn exists_by_id(&self, id: BannerId) -> Result<bool, StoreError> {
    let row = self
      .pool
      .get()
      .await?
      .query_one("SELECT EXISTS(SELECT 1 FROM banners WHERE id = $1)", &[&id])
      .await?;
    Ok(row.get(0))
  }

  async fn exists_by_feature_tag(
    &self,
    feature_id: FeatureId,
    tag_id: TagId,
  ) -> Result<bool, StoreError> {
    let row = self
      .pool
      .get()
      .await?
      .query_one(
        "SELECT EXISTS(SELECT 1 FROM banner_tags WHERE feature_id = $1 AND tag_id = $2)",
        &[&feature_id, &tag_id],
      )
      .await?;
    Ok(row.get(0))
  }

  async fn list(&self, filter: &BannerFilter) -> Result<Vec<Banner>, StoreError> {
    if let Some(l) = filter.limit {
      validate_limit(l)?;
    }
    let offset = filter.offset.unwrap_or(0);
    validate_offset(offset)?;

    // LIMIT NULL is "no limit" in Postgres
    let limit = filter.limit.map(to_sql_bound);
    let offset = to_sql_bound(offset);

    let sql = format!(
      "SELECT {BANNER_COLUMNS} FROM banners b \
       WHERE ($1::BIGINT IS NULL OR b.feature_id = $1) \
       AND ($2::BIGINT IS NULL OR EXISTS \
         (SELECT 1 FROM banner_tags t WHERE t.banner_id = b.id AND t.tag_id = $2)) \
       ORDER BY b.id OFFSET $3 LIMIT $4"
    );
    let rows = self
      .pool
      .get()
      .await?
      .query(
        &sql,
        &[&filter.feature_id, &filter.tag_id, &offset, &limit],
      )
      .await?;
    Ok(rows.iter().map(row_to_banner).collect())
  }

  async fn get_by_id(&self, id: BannerId) -> Result<Banner, StoreError> {
    let sql = format!("SELECT {BANNER_COLUMNS} FROM banners b WHERE b.id = $1");
    let row = self.pool.get().await?.query_opt(&sql, &[&id]).await?;
    row.as_ref().map(row_to_banner).ok_or(StoreError::NotFound)
  }

  async fn create(&self, banner: &NewBanner) -> Result<BannerId, StoreError> {
    let tag_ids = normalize_tag_ids(&banner.tag_ids)?;

    let mut client = self.pool.get().await?;
    let tx = client.transaction().await?;

    let row = tx
      .query_one(
        "INSERT INTO banners (feature_id, content, is_active) VALUES ($1, $2, $3) RETURNING id",
        &[&banner.feature_id, &Json(&banner.content), &banner.is_active],
      )
      .await?;
    let id: BannerId = row.get(0);

    insert_tags(&tx, id, banner.feature_id, &tag_ids).await?;
    tx.commit().await?;

    tracing::debug!(banner_id = id, feature_id = banner.feature_id, "banner created");
    Ok(id)
  }

  async fn update(&self, id: BannerId, patch: &BannerPatch) -> Result<(), StoreError> {
    let new_tags = match &patch.tag_ids {
      Patch::Set(tags) => Some(normalize_tag_ids(tags)?),
      Patch::Unchanged => None,
    };

    let mut client = self.pool.get().await?;
    // Dropping the transaction without commit rolls everything back
    let tx = client.transaction().await?;

    let current = tx
      .query_opt(
        "SELECT feature_id FROM banners WHERE id = $1 FOR UPDATE",
        &[&id],
      )
      .await?
      .ok_or(StoreError::NotFound)?;
    let old_feature: FeatureId = current.get(0);
    let feature_id = patch.feature_id.resolve(old_feature);

    // Pairs this banner will own after the update that must not belong to
    // anyone else. Unchanged tags are re-checked when the feature moves.
    let candidates: Vec<TagId> = match &new_tags {
      Some(tags) => {
        tx.execute("DELETE FROM banner_tags WHERE banner_id = $1", &[&id])
          .await?;
        tags.clone()
      }
      None if feature_id != old_feature => tx
        .query(
          "SELECT tag_id FROM banner_tags WHERE banner_id = $1 ORDER BY tag_id",
          &[&id],
        )
        .await?
        .iter()
        .map(|r| r.get(0))
        .collect(),
      None => Vec::new(),
    };

    for tag_id in &candidates {
      let taken: bool = tx
        .query_one(
          "SELECT EXISTS(SELECT 1 FROM banner_tags \
           WHERE feature_id = $1 AND tag_id = $2 AND banner_id <> $3)",
          &[&feature_id, tag_id, &id],
        )
        .await?
        .get(0);
      if taken {
        return Err(StoreError::AlreadyExists);
      }
    }

    if let Patch::Set(f) = patch.feature_id {
      tx.execute(
        "UPDATE banners SET feature_id = $1 WHERE id = $2",
        &[&f, &id],
      )
      .await
      .map_err(map_pg_error)?;
    }
    if let Patch::Set(content) = &patch.content {
      tx.execute(
        "UPDATE banners SET content = $1 WHERE id = $2",
        &[&Json(content), &id],
      )
      .await?;
    }
    if let Patch::Set(active) = patch.is_active {
      tx.execute(
        "UPDATE banners SET is_active = $1 WHERE id = $2",
        &[&active, &id],
      )
      .await?;
    }
    tx.execute("UPDATE banners SET updated_at = NOW() WHERE id = $1", &[&id])
      .await?;

    if let Some(tags) = &new_tags {
      insert_tags(&tx, id, feature_id, tags).await?;
    }

    tx.commit().await.map_err(map_pg_error)?;
    tracing::debug!(banner_id = id, "banner updated");
    Ok(())
  }

  async fn delete_by_id(&self, id: BannerId) -> Result<(), StoreError> {
    let affected = self
      .pool
      .get()
      .await?
      .execute("DELETE FROM banners WHERE id = $1", &[&id])
      .await?;
    if affected == 0 {
      return Err(StoreError::NotFound);
    }
    Ok(())
  }
}

#[async_trait]
impl FeatureValidator for PostgresBackend {
  async fn feature_exists(&self, id: FeatureId) -> Result<bool, StoreError> {
    let row = self
      .pool
      .get()
      .await?
      .query_one("SELECT EXISTS(SELECT 1 FROM features WHERE id = $1)", &[&id])
      .await?;
    Ok(row.get(0))
  }
}

#[async_trait]
impl TagValidator for PostgresBackend {
  async fn tag_exists(&self, id: TagId) -> Result<bool, StoreError> {
    let row = self
      .pool
      .get()
      .await?
      .query_one("SELECT EXISTS(SELECT 1 FROM tags WHERE id = $1)", &[&id])
      .await?;
    Ok(row.get(0))
  }
}
