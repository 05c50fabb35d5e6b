use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode},
    Executor, PgPool, Postgres, QueryBuilder, Row,
};
use tracing::{info, instrument, warn};

use crate::error::StoreError;
use crate::model::{CanonicalShow, ShowKey, ShowPayload, StagedShow};
use crate::query::{ShowPage, ShowQuery};
use crate::store::{CanonicalWrite, ShowStore, StoreConfig};

const MIGRATIONS_TABLE: &str = "_showtime_migrations";

const SHOW_COLUMNS: &str = "movie_id, cinema_id, screen_name, show_time, \
     title, rating, length, format, genre, is_active, image_url";

const NATURAL_KEY: &str = "(movie_id, cinema_id, screen_name, show_time)";

/// Null-safe "payload differs" guard over the bound values `$2..$8`.
const PAYLOAD_DIFFERS: &str = "title IS DISTINCT FROM $2 OR rating IS DISTINCT FROM $3 \
     OR length IS DISTINCT FROM $4 OR format IS DISTINCT FROM $5 \
     OR genre IS DISTINCT FROM $6 OR is_active IS DISTINCT FROM $7 \
     OR image_url IS DISTINCT FROM $8";

#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let database_url = config.database_url.as_str();
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        // Ensure TLS is enabled when DSN contains sslmode=require
        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        // PgBouncer txn mode safe
        connect_options = connect_options.statement_cache_capacity(0);

        let set_timeout = statement_timeout_sql(config.statement_timeout);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Duration::from_secs(600))
            .after_connect(move |conn, _meta| {
                let sql = set_timeout.clone();
                Box::pin(async move {
                    conn.execute(sql.as_str()).await?;
                    Ok(())
                })
            })
            .connect_with(connect_options)
            .await?;
        info!("connected to db");

        let store = Self { pool };
        if config.auto_migrate {
            info!("running migrations (AUTO_MIGRATE=on)");
            store.run_migrations(&config.migrations_dir).await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(store)
    }

    /// Apply pending `NNNN_description.sql` files from `dir` in version order,
    /// each inside its own transaction. Files without a numeric prefix are ignored.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self, dir: &Path) -> Result<usize, StoreError> {
        if !dir.exists() {
            warn!(dir = %dir.display(), "migrations directory missing; nothing to apply");
            return Ok(0);
        }
        sqlx::raw_sql(&format!(
            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                installed_at TIMESTAMPTZ NOT NULL DEFAULT now()
             )"
        ))
        .execute(&self.pool)
        .await?;

        let applied: HashSet<i64> =
            sqlx::query_scalar::<_, i64>(&format!("SELECT version FROM {MIGRATIONS_TABLE}"))
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        let mut candidates = list_migrations(dir)?;
        candidates.sort_by_key(|(v, _, _)| *v);

        let mut count = 0usize;
        for (version, desc, path) in candidates {
            if applied.contains(&version) {
                continue;
            }
            let sql = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Migration(format!("{}: {e}", path.display())))?;
            info!(version, file = ?path, "applying migration");

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(&sql).execute(&mut *tx).await?;
            sqlx::query(&format!(
                "INSERT INTO {MIGRATIONS_TABLE} (version, description) VALUES ($1, $2)"
            ))
            .bind(version)
            .bind(&desc)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            count += 1;
        }
        info!(applied = count, "migrations up-to-date");
        Ok(count)
    }
}

/// Per-connection `SET` issued right after a pooled connection opens.
fn statement_timeout_sql(timeout: Duration) -> String {
    format!("SET statement_timeout = {}", timeout.as_millis())
}

fn list_migrations(dir: &Path) -> Result<Vec<(i64, String, PathBuf)>, StoreError> {
    let entries =
        std::fs::read_dir(dir).map_err(|e| StoreError::Migration(format!("{}: {e}", dir.display())))?;
    let mut out = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| StoreError::Migration(e.to_string()))?
            .path();
        if !path.is_file() {
            continue;
        }
        if let Some((version, desc)) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(parse_migration_name)
        {
            out.push((version, desc, path));
        }
    }
    Ok(out)
}

/// `0001_create_show_tables.sql` -> `(1, "create_show_tables")`.
fn parse_migration_name(fname: &str) -> Option<(i64, String)> {
    let stem = fname.strip_suffix(".sql")?;
    let (num, rest) = stem.split_once('_')?;
    if num.is_empty() || !num.chars().all(|c| c.is_ascii_digit()) || rest.is_empty() {
        return None;
    }
    Some((num.parse().ok()?, rest.to_string()))
}

fn key_from_row(r: &PgRow) -> Result<ShowKey, sqlx::Error> {
    Ok(ShowKey {
        movie_id: r.try_get("movie_id")?,
        cinema_id: r.try_get("cinema_id")?,
        screen_name: r.try_get("screen_name")?,
        show_time: r.try_get("show_time")?,
    })
}

fn payload_from_row(r: &PgRow) -> Result<ShowPayload, sqlx::Error> {
    Ok(ShowPayload {
        title: r.try_get("title")?,
        rating: r.try_get("rating")?,
        length: r.try_get("length")?,
        format: r.try_get("format")?,
        genre: r.try_get("genre")?,
        is_active: r.try_get("is_active")?,
        image_url: r.try_get("image_url")?,
    })
}

fn canonical_from_row(r: &PgRow) -> Result<CanonicalShow, sqlx::Error> {
    Ok(CanonicalShow {
        id: r.try_get("id")?,
        key: key_from_row(r)?,
        payload: payload_from_row(r)?,
    })
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ShowQuery) {
    qb.push(" WHERE show_time >= ").push_bind(query.from);
    if let Some(to) = query.to {
        qb.push(" AND show_time <= ").push_bind(to);
    }
    if let Some(pattern) = query.title_pattern() {
        qb.push(" AND title ILIKE ").push_bind(pattern);
    }
}

#[async_trait]
impl ShowStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, bool>("SELECT true")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, batch), fields(rows = batch.len()))]
    async fn upsert_staged(&self, batch: &[StagedShow]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("INSERT INTO staged_shows ({SHOW_COLUMNS}) "));
        qb.push_values(batch, |mut b, s| {
            b.push_bind(&s.key.movie_id)
                .push_bind(s.key.cinema_id)
                .push_bind(&s.key.screen_name)
                .push_bind(s.key.show_time)
                .push_bind(&s.payload.title)
                .push_bind(&s.payload.rating)
                .push_bind(s.payload.length)
                .push_bind(&s.payload.format)
                .push_bind(&s.payload.genre)
                .push_bind(&s.payload.is_active)
                .push_bind(&s.payload.image_url);
        });
        qb.push(format!(
            " ON CONFLICT {NATURAL_KEY}
              DO UPDATE SET title = EXCLUDED.title,
                            rating = EXCLUDED.rating,
                            length = EXCLUDED.length,
                            format = EXCLUDED.format,
                            genre = EXCLUDED.genre,
                            is_active = EXCLUDED.is_active,
                            image_url = EXCLUDED.image_url,
                            synced_at = now()"
        ));

        let mut tx = self.pool.begin().await?;
        qb.build().persistent(false).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn staged_shows(&self) -> Result<Vec<StagedShow>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SHOW_COLUMNS} FROM staged_shows
             ORDER BY movie_id, cinema_id, screen_name, show_time"
        ))
        .persistent(false)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> Result<StagedShow, sqlx::Error> {
                Ok(StagedShow {
                    key: key_from_row(r)?,
                    payload: payload_from_row(r)?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    async fn canonical_by_keys(&self, keys: &[ShowKey]) -> Result<Vec<CanonicalShow>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "SELECT id, {SHOW_COLUMNS} FROM canonical_shows WHERE {NATURAL_KEY} IN "
        ));
        qb.push_tuples(keys, |mut b, k| {
            b.push_bind(&k.movie_id)
                .push_bind(k.cinema_id)
                .push_bind(&k.screen_name)
                .push_bind(k.show_time);
        });
        let rows = qb.build().persistent(false).fetch_all(&self.pool).await?;
        rows.iter()
            .map(canonical_from_row)
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    #[instrument(skip(self, writes), fields(writes = writes.len()))]
    async fn apply_canonical(&self, writes: &[CanonicalWrite]) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        let insert_sql = format!(
            "INSERT INTO canonical_shows ({SHOW_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT {NATURAL_KEY} DO NOTHING"
        );
        let update_sql = format!(
            "UPDATE canonical_shows
             SET title = $2, rating = $3, length = $4, format = $5, genre = $6,
                 is_active = $7, image_url = $8, updated_at = now()
             WHERE id = $1 AND ({PAYLOAD_DIFFERS})"
        );

        // Dropping the transaction on an early return rolls the whole batch back.
        let mut tx = self.pool.begin().await?;
        for write in writes {
            match write {
                CanonicalWrite::Insert(show) => {
                    let done = sqlx::query(&insert_sql)
                        .persistent(false)
                        .bind(&show.key.movie_id)
                        .bind(show.key.cinema_id)
                        .bind(&show.key.screen_name)
                        .bind(show.key.show_time)
                        .bind(&show.payload.title)
                        .bind(&show.payload.rating)
                        .bind(show.payload.length)
                        .bind(&show.payload.format)
                        .bind(&show.payload.genre)
                        .bind(&show.payload.is_active)
                        .bind(&show.payload.image_url)
                        .execute(&mut *tx)
                        .await?;
                    if done.rows_affected() == 0 {
                        return Err(StoreError::Conflict(format!(
                            "canonical row appeared concurrently for movie {} cinema {} screen {} at {}",
                            show.key.movie_id,
                            show.key.cinema_id,
                            show.key.screen_name,
                            show.key.show_time
                        )));
                    }
                }
                CanonicalWrite::Update { id, payload } => {
                    sqlx::query(&update_sql)
                        .persistent(false)
                        .bind(id)
                        .bind(&payload.title)
                        .bind(&payload.rating)
                        .bind(payload.length)
                        .bind(&payload.format)
                        .bind(&payload.genre)
                        .bind(&payload.is_active)
                        .bind(&payload.image_url)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_canonical(&self, query: &ShowQuery) -> Result<ShowPage, StoreError> {
        let mut count_qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM canonical_shows");
        push_filters(&mut count_qb, query);

        let mut page_qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT id, {SHOW_COLUMNS} FROM canonical_shows"));
        push_filters(&mut page_qb, query);
        page_qb
            .push(" ORDER BY show_time ASC, movie_id, cinema_id, screen_name LIMIT ")
            .push_bind(i64::from(query.limit))
            .push(" OFFSET ")
            .push_bind(query.offset());

        let count_query = count_qb.build_query_scalar::<i64>().persistent(false);
        let page_query = page_qb.build().persistent(false);
        let (total, rows) = futures::try_join!(
            count_query.fetch_one(&self.pool),
            page_query.fetch_all(&self.pool)
        )?;

        let rows: Vec<CanonicalShow> = rows
            .iter()
            .map(canonical_from_row)
            .collect::<Result<_, sqlx::Error>>()?;
        Ok(ShowPage { total, rows })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
