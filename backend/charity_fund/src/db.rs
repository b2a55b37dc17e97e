//! Database layer — migrations, ledger queries, and funding saves.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::errors::{FundError, Result};
use crate::models::{CharityProject, ClosedProjectSpeed, Donation, FundKind, FundableRecord};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Make sure the file is created if it doesn't exist yet.
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Allocation reads and saves
// ─────────────────────────────────────────────────────────

/// Open records of `kind` in allocation order: oldest first, ties broken by id.
pub async fn fetch_open(conn: &mut SqliteConnection, kind: FundKind) -> Result<Vec<FundableRecord>> {
    let sql = format!(
        r#"
        SELECT id, full_amount, invested_amount, fully_invested, create_date, close_date
        FROM   {}
        WHERE  fully_invested = 0
        ORDER  BY create_date ASC, id ASC
        "#,
        kind.table()
    );
    let rows = sqlx::query_as::<_, FundableRecord>(&sql)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}

/// Write the funding columns of `record`, provided the stored
/// `invested_amount` still equals `expected_invested`.
///
/// A row that moved underneath us is reported as [`FundError::Conflict`] so
/// the caller's transaction rolls back instead of overwriting it.
pub async fn save_funding(
    conn: &mut SqliteConnection,
    kind: FundKind,
    expected_invested: i64,
    record: &FundableRecord,
) -> Result<()> {
    let sql = format!(
        r#"
        UPDATE {}
        SET    invested_amount = ?1, fully_invested = ?2, close_date = ?3
        WHERE  id = ?4 AND invested_amount = ?5
        "#,
        kind.table()
    );
    let rows_affected = sqlx::query(&sql)
        .bind(record.invested_amount)
        .bind(record.fully_invested)
        .bind(record.close_date)
        .bind(record.id)
        .bind(expected_invested)
        .execute(conn)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        return Err(FundError::Conflict(format!(
            "{} {} changed during allocation",
            kind.table(),
            record.id
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Project writes
// ─────────────────────────────────────────────────────────

/// Insert an open project and return its id.
pub async fn insert_project(
    conn: &mut SqliteConnection,
    name: &str,
    description: &str,
    full_amount: i64,
    create_date: i64,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO charity_project
            (name, description, full_amount, invested_amount, fully_invested, create_date)
        VALUES (?1, ?2, ?3, 0, 0, ?4)
        "#,
    )
    .bind(name)
    .bind(description)
    .bind(full_amount)
    .bind(create_date)
    .execute(conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Overwrite every editable column of a project.
pub async fn update_project(conn: &mut SqliteConnection, project: &CharityProject) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE charity_project
        SET    name = ?1, description = ?2, full_amount = ?3,
               invested_amount = ?4, fully_invested = ?5, close_date = ?6
        WHERE  id = ?7
        "#,
    )
    .bind(&project.name)
    .bind(&project.description)
    .bind(project.funding.full_amount)
    .bind(project.funding.invested_amount)
    .bind(project.funding.fully_invested)
    .bind(project.funding.close_date)
    .bind(project.funding.id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Delete a project that has not received any funds.
///
/// Returns `false` when no such row exists or funds were already invested.
pub async fn delete_unfunded_project(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let rows_affected =
        sqlx::query("DELETE FROM charity_project WHERE id = ?1 AND invested_amount = 0")
            .bind(id)
            .execute(conn)
            .await?
            .rows_affected();
    Ok(rows_affected > 0)
}

// ─────────────────────────────────────────────────────────
// Project reads
// ─────────────────────────────────────────────────────────

pub async fn get_project(conn: &mut SqliteConnection, id: i64) -> Result<Option<CharityProject>> {
    let row = sqlx::query_as::<_, CharityProject>(
        r#"
        SELECT id, name, description, full_amount, invested_amount, fully_invested,
               create_date, close_date
        FROM   charity_project
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Whether another project already uses `name`.
pub async fn project_name_taken(
    conn: &mut SqliteConnection,
    name: &str,
    except_id: Option<i64>,
) -> Result<bool> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM charity_project WHERE name = ?1 AND id != ?2")
            .bind(name)
            .bind(except_id.unwrap_or(-1))
            .fetch_optional(conn)
            .await?;
    Ok(row.is_some())
}

/// All projects in creation order.
pub async fn list_projects(conn: &mut SqliteConnection) -> Result<Vec<CharityProject>> {
    let rows = sqlx::query_as::<_, CharityProject>(
        r#"
        SELECT id, name, description, full_amount, invested_amount, fully_invested,
               create_date, close_date
        FROM   charity_project
        ORDER  BY create_date ASC, id ASC
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Closed projects, fastest-funded first.
pub async fn closed_projects_by_speed(
    conn: &mut SqliteConnection,
) -> Result<Vec<ClosedProjectSpeed>> {
    let rows = sqlx::query_as::<_, ClosedProjectSpeed>(
        r#"
        SELECT id, name, description, (close_date - create_date) AS collection_millis
        FROM   charity_project
        WHERE  fully_invested = 1
        ORDER  BY collection_millis ASC, id ASC
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Donations
// ─────────────────────────────────────────────────────────

/// Insert an open donation and return its id.
pub async fn insert_donation(
    conn: &mut SqliteConnection,
    full_amount: i64,
    comment: Option<&str>,
    create_date: i64,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO donation
            (comment, full_amount, invested_amount, fully_invested, create_date)
        VALUES (?1, ?2, 0, 0, ?3)
        "#,
    )
    .bind(comment)
    .bind(full_amount)
    .bind(create_date)
    .execute(conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn get_donation(conn: &mut SqliteConnection, id: i64) -> Result<Option<Donation>> {
    let row = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, comment, full_amount, invested_amount, fully_invested,
               create_date, close_date
        FROM   donation
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// All donations in creation order.
pub async fn list_donations(conn: &mut SqliteConnection) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, comment, full_amount, invested_amount, fully_invested,
               create_date, close_date
        FROM   donation
        ORDER  BY create_date ASC, id ASC
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
