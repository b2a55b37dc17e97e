//! Creation handlers and project lifecycle rules.
//!
//! Creating a donation or a project runs an allocation against the open
//! records of the other ledger.  The insert, the allocation and every save
//! it produces share one transaction, so a failed save leaves no partial
//! batch behind.  Runs inside this process are serialized by
//! `allocation_lock`; saves are compare-and-set, which turns a writer from
//! another process into a [`FundError::Conflict`] rather than a lost update.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::db;
use crate::errors::{FundError, Result};
use crate::invest::{self, AllocationOutcome};
use crate::models::{
    CharityProject, CharityProjectUpdate, ClosedProjectSpeed, Donation, FundKind,
    FundableRecord, NewCharityProject, NewDonation,
};

const MAX_PROJECT_NAME_CHARS: usize = 100;

pub struct FundService {
    pool: SqlitePool,
    allocation_lock: Mutex<()>,
}

impl FundService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            allocation_lock: Mutex::new(()),
        }
    }

    // ─── Creation handlers ───────────────────────────────

    /// Persist a new donation and hand its money to the oldest open projects.
    pub async fn create_donation(&self, new: NewDonation) -> Result<Donation> {
        validate_amount(new.full_amount)?;
        let comment = new.comment.as_deref();

        let _guard = self.allocation_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let now = now_millis();
        let id = db::insert_donation(&mut tx, new.full_amount, comment, now).await?;
        let record = FundableRecord::open(id, new.full_amount, now);
        run_allocation(&mut tx, FundKind::Donation, record).await?;

        let donation = db::get_donation(&mut tx, id)
            .await?
            .ok_or_else(|| FundError::NotFound(format!("donation {id}")))?;
        tx.commit().await?;

        info!(
            "Donation {id} created: {}/{} invested",
            donation.funding.invested_amount, donation.funding.full_amount
        );
        Ok(donation)
    }

    /// Persist a new project and fill it from the oldest open donations.
    pub async fn create_project(&self, new: NewCharityProject) -> Result<CharityProject> {
        let name = normalize_name(&new.name)?;
        validate_description(&new.description)?;
        validate_amount(new.full_amount)?;

        let _guard = self.allocation_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if db::project_name_taken(&mut tx, &name, None).await? {
            return Err(duplicate_name(&name));
        }

        let now = now_millis();
        let id =
            db::insert_project(&mut tx, &name, &new.description, new.full_amount, now).await?;
        let record = FundableRecord::open(id, new.full_amount, now);
        run_allocation(&mut tx, FundKind::CharityProject, record).await?;

        let project = db::get_project(&mut tx, id)
            .await?
            .ok_or_else(|| project_not_found(id))?;
        tx.commit().await?;

        info!(
            "Project {id} ({}) created: {}/{} invested",
            project.name, project.funding.invested_amount, project.funding.full_amount
        );
        Ok(project)
    }

    // ─── Project lifecycle ───────────────────────────────

    /// Apply a partial update to an open project.
    ///
    /// Lowering `full_amount` below what is already invested is rejected;
    /// lowering it to exactly that amount closes the project.
    pub async fn update_project(
        &self,
        id: i64,
        patch: CharityProjectUpdate,
    ) -> Result<CharityProject> {
        let _guard = self.allocation_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut project = db::get_project(&mut tx, id)
            .await?
            .ok_or_else(|| project_not_found(id))?;
        if project.funding.fully_invested {
            return Err(FundError::Validation(
                "A closed project cannot be edited".to_string(),
            ));
        }

        if let Some(name) = patch.name {
            let name = normalize_name(&name)?;
            if db::project_name_taken(&mut tx, &name, Some(id)).await? {
                return Err(duplicate_name(&name));
            }
            project.name = name;
        }
        if let Some(description) = patch.description {
            validate_description(&description)?;
            project.description = description;
        }
        if let Some(full_amount) = patch.full_amount {
            validate_amount(full_amount)?;
            apply_full_amount(&mut project.funding, full_amount, now_millis())?;
        }

        db::update_project(&mut tx, &project).await?;
        tx.commit().await?;
        Ok(project)
    }

    /// Delete a project that has not received any money yet.
    pub async fn delete_project(&self, id: i64) -> Result<CharityProject> {
        let _guard = self.allocation_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let project = db::get_project(&mut tx, id)
            .await?
            .ok_or_else(|| project_not_found(id))?;
        if project.funding.invested_amount > 0 {
            return Err(FundError::Validation(
                "Funds have already been invested in this project; it cannot be deleted"
                    .to_string(),
            ));
        }
        if !db::delete_unfunded_project(&mut tx, id).await? {
            return Err(FundError::Conflict(format!(
                "charity_project {id} changed during deletion"
            )));
        }
        tx.commit().await?;

        info!("Project {id} ({}) deleted", project.name);
        Ok(project)
    }

    // ─── Reads ───────────────────────────────────────────

    pub async fn get_project(&self, id: i64) -> Result<CharityProject> {
        let mut conn = self.pool.acquire().await?;
        db::get_project(&mut conn, id)
            .await?
            .ok_or_else(|| project_not_found(id))
    }

    pub async fn list_projects(&self) -> Result<Vec<CharityProject>> {
        let mut conn = self.pool.acquire().await?;
        db::list_projects(&mut conn).await
    }

    pub async fn list_donations(&self) -> Result<Vec<Donation>> {
        let mut conn = self.pool.acquire().await?;
        db::list_donations(&mut conn).await
    }

    /// Closed projects ranked by how quickly they were funded.
    pub async fn closing_speed_report(&self) -> Result<Vec<ClosedProjectSpeed>> {
        let mut conn = self.pool.acquire().await?;
        db::closed_projects_by_speed(&mut conn).await
    }
}

/// Match `record` (already inserted, of `kind`) against the open records of
/// the opposite ledger and save everything the run touched.
///
/// Must be called inside the transaction that inserted `record`.
pub async fn run_allocation(
    conn: &mut SqliteConnection,
    kind: FundKind,
    record: FundableRecord,
) -> Result<AllocationOutcome> {
    let counterpart_kind = kind.counterpart();
    let counterparts = db::fetch_open(conn, counterpart_kind).await?;
    let prior: Vec<(i64, i64)> = counterparts
        .iter()
        .map(|c| (c.id, c.invested_amount))
        .collect();
    let record_prior = record.invested_amount;

    let outcome = invest::allocate(record, kind.initiator_role(), counterparts, now_millis())?;

    for (touched, (id, before)) in outcome.touched.iter().zip(prior.iter()) {
        debug_assert_eq!(touched.id, *id);
        db::save_funding(conn, counterpart_kind, *before, touched).await?;
    }
    db::save_funding(conn, kind, record_prior, &outcome.record).await?;

    if outcome.touched.is_empty() {
        debug!(
            "No open {} to match {} {} against",
            counterpart_kind.table(),
            kind.table(),
            outcome.record.id
        );
    } else {
        info!(
            "Allocated {} {} across {} {} record(s)",
            kind.table(),
            outcome.record.id,
            outcome.touched.len(),
            counterpart_kind.table()
        );
    }
    Ok(outcome)
}

/// Change a project's target, closing it when the new target equals what
/// is already invested.
fn apply_full_amount(funding: &mut FundableRecord, full_amount: i64, now: i64) -> Result<()> {
    if full_amount < funding.invested_amount {
        return Err(FundError::Validation(format!(
            "full_amount {full_amount} is less than the {} already invested",
            funding.invested_amount
        )));
    }
    funding.full_amount = full_amount;
    if full_amount == funding.invested_amount {
        funding.close(now);
    }
    Ok(())
}

fn validate_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(FundError::Validation(
            "full_amount must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

/// Trim surrounding whitespace and check the length of what remains; the
/// trimmed form is what gets compared and stored.
fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_PROJECT_NAME_CHARS {
        return Err(FundError::Validation(format!(
            "name must be between 1 and {MAX_PROJECT_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_description(description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(FundError::Validation(
            "description must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn duplicate_name(name: &str) -> FundError {
    FundError::Validation(format!("A project named {name:?} already exists"))
}

fn project_not_found(id: i64) -> FundError {
    FundError::NotFound(format!("charity project {id}"))
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
