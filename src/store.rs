//! Persistence layer over a local SQLite database (libsql).
//!
//! Every operation opens its own short-lived connection so a logical unit of
//! work (including the cascade delete transaction) never shares state with a
//! concurrent request. Timestamps are stored as RFC 3339 UTC text.

use std::{path::Path, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database, Row, params};

use crate::error::{Error, Result};
use crate::handlers::Handler;
use crate::models::{OrderedBy, Source, SourceUpdate, User, Video, VideoUpdate};

/// Runs a pragma that answers with a row, which `execute_batch` rejects.
async fn query_pragma(conn: &Connection, pragma: &str) -> Result<()> {
    let mut rows = conn.query(pragma, params![]).await?;
    while rows.next().await?.is_some() {}
    Ok(())
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=ON;").await?;
    query_pragma(conn, "PRAGMA busy_timeout=5000").await
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    query_pragma(conn, "PRAGMA journal_mode=WAL").await?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT,
            added_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            name TEXT NOT NULL,
            author TEXT,
            logo TEXT,
            description TEXT,
            ordered_by TEXT NOT NULL DEFAULT 'release',
            feed_url TEXT NOT NULL,
            extractor TEXT,
            handler TEXT NOT NULL,
            created_by TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            added_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            handler TEXT NOT NULL,
            uploader TEXT,
            uploader_id TEXT,
            title TEXT,
            description TEXT,
            duration INTEGER,
            thumbnail TEXT,
            url TEXT NOT NULL,
            media_url TEXT,
            feed_media_url TEXT NOT NULL,
            media_filesize INTEGER,
            released_at TEXT,
            added_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_videos_source ON videos(source_id);
        "#,
    )
    .await?;
    Ok(())
}

const SOURCE_COLUMNS: &str = "id, url, name, author, logo, description, ordered_by, feed_url, \
     extractor, handler, created_by, added_at, updated_at";

const VIDEO_COLUMNS: &str = "id, source_id, handler, uploader, uploader_id, title, description, \
     duration, thumbnail, url, media_url, feed_media_url, media_filesize, released_at, added_at, \
     updated_at";

#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Opens (and if necessary creates) the SQLite DB and ensures the expected
    /// schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Builder::new_local(path).build().await?;
        let store = Self { db: Arc::new(db) };
        let conn = store.connect().await?;
        ensure_schema(&conn).await?;
        Ok(store)
    }

    async fn connect(&self) -> Result<Connection> {
        let conn = self.db.connect()?;
        configure_connection(&conn).await?;
        Ok(conn)
    }

    // ---- users -------------------------------------------------------------

    pub async fn create_user(&self, user: &User) -> Result<User> {
        let conn = self.connect().await?;
        let inserted = conn
            .execute(
                "INSERT INTO users (id, username, email, added_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT DO NOTHING",
                params![
                    user.id.as_str(),
                    user.username.as_str(),
                    user.email.as_deref(),
                    format_timestamp(&user.added_at),
                ],
            )
            .await?;
        if inserted == 0 {
            return Err(Error::AlreadyExists(format!(
                "User '{}' already exists",
                user.username
            )));
        }
        self.get_user(&user.id).await
    }

    pub async fn get_user_or_none(&self, id: &str) -> Result<Option<User>> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT id, username, email, added_at FROM users WHERE id = ?1",
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(User {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                added_at: parse_timestamp(&row.get::<String>(3)?)?,
            })),
            None => Ok(None),
        }
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        self.get_user_or_none(id)
            .await?
            .ok_or_else(|| Error::not_found("User not found"))
    }

    /// Returns the user for `username`, creating it on first use.
    pub async fn ensure_user(&self, username: &str) -> Result<User> {
        let user = User::new(username, None);
        if let Some(existing) = self.get_user_or_none(&user.id).await? {
            return Ok(existing);
        }
        match self.create_user(&user).await {
            Err(Error::AlreadyExists(_)) => self.get_user(&user.id).await,
            other => other,
        }
    }

    // ---- sources -----------------------------------------------------------

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY added_at ASC"),
                params![],
            )
            .await?;
        let mut sources = Vec::new();
        while let Some(row) = rows.next().await? {
            sources.push(row_to_source(&row)?);
        }
        Ok(sources)
    }

    pub async fn get_source_or_none(&self, id: &str) -> Result<Option<Source>> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"),
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_source(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_source(&self, id: &str) -> Result<Source> {
        self.get_source_or_none(id)
            .await?
            .ok_or_else(|| Error::not_found("Source not found"))
    }

    pub async fn create_source(&self, source: &Source) -> Result<Source> {
        let conn = self.connect().await?;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO sources ({SOURCE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                     ON CONFLICT DO NOTHING"
                ),
                params![
                    source.id.as_str(),
                    source.url.as_str(),
                    source.name.as_str(),
                    source.author.as_deref(),
                    source.logo.as_deref(),
                    source.description.as_deref(),
                    source.ordered_by.as_str(),
                    source.feed_url.as_str(),
                    source.extractor.as_deref(),
                    source.handler.name(),
                    source.created_by.as_str(),
                    format_timestamp(&source.added_at),
                    format_timestamp(&source.updated_at),
                ],
            )
            .await?;
        if inserted == 0 {
            return Err(Error::AlreadyExists("Source already exists".into()));
        }
        self.get_source(&source.id).await
    }

    /// Applies the `Some` fields of `update` and bumps `updated_at`.
    pub async fn update_source(&self, id: &str, update: &SourceUpdate) -> Result<Source> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                r#"
                UPDATE sources SET
                    name = COALESCE(?2, name),
                    author = COALESCE(?3, author),
                    logo = COALESCE(?4, logo),
                    description = COALESCE(?5, description),
                    ordered_by = COALESCE(?6, ordered_by),
                    extractor = COALESCE(?7, extractor),
                    updated_at = ?8
                WHERE id = ?1
                "#,
                params![
                    id,
                    update.name.as_deref(),
                    update.author.as_deref(),
                    update.logo.as_deref(),
                    update.description.as_deref(),
                    update.ordered_by.map(OrderedBy::as_str),
                    update.extractor.as_deref(),
                    format_timestamp(&Utc::now()),
                ],
            )
            .await?;
        if changed == 0 {
            return Err(Error::not_found("Source not found"));
        }
        self.get_source(id).await
    }

    /// Removes a source and all of its videos in one transaction.
    pub async fn delete_source(&self, id: &str) -> Result<()> {
        self.get_source(id).await?;
        let conn = self.connect().await?;
        let tx = conn.transaction().await?;
        let outcome = async {
            tx.execute("DELETE FROM videos WHERE source_id = ?1", [id])
                .await?;
            tx.execute("DELETE FROM sources WHERE id = ?1", [id]).await
        }
        .await;
        match outcome {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(err) => {
                tx.rollback().await?;
                Err(Error::DeleteError(format!(
                    "Failed to delete source '{id}': {err}"
                )))
            }
        }
    }

    // ---- videos ------------------------------------------------------------

    pub async fn list_videos(&self) -> Result<Vec<Video>> {
        self.query_videos(
            &format!("SELECT {VIDEO_COLUMNS} FROM videos ORDER BY added_at ASC"),
            None,
        )
        .await
    }

    /// Videos of a source, newest release first (unknown release dates last).
    pub async fn list_videos_for_source(&self, source_id: &str) -> Result<Vec<Video>> {
        self.query_videos(
            &format!(
                "SELECT {VIDEO_COLUMNS} FROM videos WHERE source_id = ?1
                 ORDER BY released_at IS NULL, released_at DESC, added_at DESC"
            ),
            Some(source_id),
        )
        .await
    }

    async fn query_videos(&self, sql: &str, source_id: Option<&str>) -> Result<Vec<Video>> {
        let conn = self.connect().await?;
        let mut rows = match source_id {
            Some(source_id) => conn.query(sql, [source_id]).await?,
            None => conn.query(sql, params![]).await?,
        };
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        Ok(videos)
    }

    pub async fn get_video_or_none(&self, id: &str) -> Result<Option<Video>> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"),
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_video(&self, id: &str) -> Result<Video> {
        self.get_video_or_none(id)
            .await?
            .ok_or_else(|| Error::not_found("Video not found"))
    }

    pub async fn create_video(&self, video: &Video) -> Result<Video> {
        if self.insert_video_if_absent(video).await? {
            self.get_video(&video.id).await
        } else {
            Err(Error::AlreadyExists("Video already exists".into()))
        }
    }

    /// Inserts `video` unless a row with the same id exists. Returns whether a
    /// row was written; existing rows are never touched.
    pub async fn insert_video_if_absent(&self, video: &Video) -> Result<bool> {
        let conn = self.connect().await?;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO videos ({VIDEO_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                     ON CONFLICT DO NOTHING"
                ),
                params![
                    video.id.as_str(),
                    video.source_id.as_str(),
                    video.handler.name(),
                    video.uploader.as_deref(),
                    video.uploader_id.as_deref(),
                    video.title.as_deref(),
                    video.description.as_deref(),
                    video.duration,
                    video.thumbnail.as_deref(),
                    video.url.as_str(),
                    video.media_url.as_deref(),
                    video.feed_media_url.as_str(),
                    video.media_filesize,
                    video.released_at.as_ref().map(format_timestamp),
                    format_timestamp(&video.added_at),
                    format_timestamp(&video.updated_at),
                ],
            )
            .await?;
        Ok(inserted > 0)
    }

    /// Applies the `Some` fields of `update` and bumps `updated_at`.
    pub async fn update_video(&self, id: &str, update: &VideoUpdate) -> Result<Video> {
        let conn = self.connect().await?;
        let changed = conn
            .execute(
                r#"
                UPDATE videos SET
                    uploader = COALESCE(?2, uploader),
                    uploader_id = COALESCE(?3, uploader_id),
                    title = COALESCE(?4, title),
                    description = COALESCE(?5, description),
                    duration = COALESCE(?6, duration),
                    thumbnail = COALESCE(?7, thumbnail),
                    media_url = COALESCE(?8, media_url),
                    media_filesize = COALESCE(?9, media_filesize),
                    released_at = COALESCE(?10, released_at),
                    updated_at = ?11
                WHERE id = ?1
                "#,
                params![
                    id,
                    update.uploader.as_deref(),
                    update.uploader_id.as_deref(),
                    update.title.as_deref(),
                    update.description.as_deref(),
                    update.duration,
                    update.thumbnail.as_deref(),
                    update.media_url.as_deref(),
                    update.media_filesize,
                    update.released_at.as_ref().map(format_timestamp),
                    format_timestamp(&Utc::now()),
                ],
            )
            .await?;
        if changed == 0 {
            return Err(Error::not_found("Video not found"));
        }
        self.get_video(id).await
    }

    pub async fn delete_video(&self, id: &str) -> Result<()> {
        self.get_video(id).await?;
        let conn = self.connect().await?;
        conn.execute("DELETE FROM videos WHERE id = ?1", [id])
            .await
            .map_err(|err| Error::DeleteError(format!("Failed to delete video '{id}': {err}")))?;
        Ok(())
    }
}

/// Fixed-width UTC text so lexical order in SQL matches chronological order.
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| Error::invalid(format!("stored timestamp '{raw}' is invalid: {err}")))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

/// Column order must match `SOURCE_COLUMNS`.
fn row_to_source(row: &Row) -> Result<Source> {
    let ordered_by: String = row.get(6)?;
    let handler: String = row.get(9)?;
    Ok(Source {
        id: row.get(0)?,
        url: row.get(1)?,
        name: row.get(2)?,
        author: row.get(3)?,
        logo: row.get(4)?,
        description: row.get(5)?,
        ordered_by: OrderedBy::parse(&ordered_by).unwrap_or_default(),
        feed_url: row.get(7)?,
        extractor: row.get(8)?,
        handler: Handler::from_name(&handler)?,
        created_by: row.get(10)?,
        added_at: parse_timestamp(&row.get::<String>(11)?)?,
        updated_at: parse_timestamp(&row.get::<String>(12)?)?,
    })
}

/// Column order must match `VIDEO_COLUMNS`.
fn row_to_video(row: &Row) -> Result<Video> {
    let handler: String = row.get(2)?;
    Ok(Video {
        id: row.get(0)?,
        source_id: row.get(1)?,
        handler: Handler::from_name(&handler)?,
        uploader: row.get(3)?,
        uploader_id: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        duration: row.get(7)?,
        thumbnail: row.get(8)?,
        url: row.get(9)?,
        media_url: row.get(10)?,
        feed_media_url: row.get(11)?,
        media_filesize: row.get(12)?,
        released_at: parse_optional_timestamp(row.get(13)?)?,
        added_at: parse_timestamp(&row.get::<String>(14)?)?,
        updated_at: parse_timestamp(&row.get::<String>(15)?)?,
    })
}
