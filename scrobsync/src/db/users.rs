//! User accounts as seen by the scrobbling engine

use super::watermarks;
use scrobsync_common::db::{ScrobblerKind, UserId};
use scrobsync_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// A user and the listen-history service they scrobble to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub login_name: String,
    pub scrobbler: ScrobblerKind,
    /// ListenBrainz user token; absent until the user provides one
    pub listenbrainz_token: Option<String>,
}

impl User {
    /// Token to use for remote calls, ignoring blank values
    pub fn token(&self) -> Option<&str> {
        self.listenbrainz_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: UserId(row.get("id")),
        login_name: row.get("login_name"),
        scrobbler: ScrobblerKind::try_from(row.get::<i64, _>("scrobbler"))?,
        listenbrainz_token: row.get("listenbrainz_token"),
    })
}

pub async fn create_user(pool: &SqlitePool, login_name: &str, scrobbler: ScrobblerKind) -> Result<UserId> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO users (login_name, scrobbler) VALUES (?, ?) RETURNING id",
    )
    .bind(login_name)
    .bind(scrobbler.as_i64())
    .fetch_one(pool)
    .await?;

    tracing::info!(user_id = id, login = login_name, scrobbler = %scrobbler, "User created");
    Ok(UserId(id))
}

pub async fn find_user(pool: &SqlitePool, user_id: UserId) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, login_name, scrobbler, listenbrainz_token FROM users WHERE id = ?",
    )
    .bind(user_id.as_i64())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn find_user_by_login(pool: &SqlitePool, login_name: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, login_name, scrobbler, listenbrainz_token FROM users WHERE login_name = ?",
    )
    .bind(login_name)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub async fn set_scrobbler(pool: &SqlitePool, user_id: UserId, scrobbler: ScrobblerKind) -> Result<bool> {
    let result = sqlx::query("UPDATE users SET scrobbler = ? WHERE id = ?")
        .bind(scrobbler.as_i64())
        .bind(user_id.as_i64())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Store the user's ListenBrainz token
///
/// A different token may belong to a different remote account, so the
/// ListenBrainz sync watermark is cleared and the next import starts over.
pub async fn set_listenbrainz_token(pool: &SqlitePool, user_id: UserId, token: Option<&str>) -> Result<bool> {
    let Some(user) = find_user(pool, user_id).await? else {
        return Ok(false);
    };

    let result = sqlx::query("UPDATE users SET listenbrainz_token = ? WHERE id = ?")
        .bind(token)
        .bind(user_id.as_i64())
        .execute(pool)
        .await?;

    if user.listenbrainz_token.as_deref() != token {
        watermarks::clear_watermark(pool, user_id, ScrobblerKind::ListenBrainz).await?;
        tracing::debug!(user_id = %user_id, "ListenBrainz token changed, sync restarts from scratch");
    }

    Ok(result.rows_affected() > 0)
}

/// Delete a user together with their listens and sync state
pub async fn delete_user(pool: &SqlitePool, user_id: UserId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id.as_i64())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Users scrobbling to `kind`; for ListenBrainz only those with a token
pub async fn users_with_scrobbler(pool: &SqlitePool, kind: ScrobblerKind) -> Result<Vec<User>> {
    let rows = sqlx::query(
        r#"
        SELECT id, login_name, scrobbler, listenbrainz_token
        FROM users
        WHERE scrobbler = ?
        ORDER BY id
        "#,
    )
    .bind(kind.as_i64())
    .fetch_all(pool)
    .await?;

    let users = rows.iter().map(user_from_row).collect::<Result<Vec<_>>>()?;

    Ok(match kind {
        ScrobblerKind::ListenBrainz => users.into_iter().filter(|u| u.token().is_some()).collect(),
        ScrobblerKind::Internal => users,
    })
}
