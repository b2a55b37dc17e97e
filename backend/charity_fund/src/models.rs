//! Fundable records: the shape shared by donations and charity projects.
//!
//! Both ledgers carry the same five funding columns.  Only the allocation
//! engine moves `invested_amount` forward; everything else treats the
//! funding block as read-only once a record exists.

use serde::{Deserialize, Serialize};

use crate::errors::{FundError, Result};

/// Which ledger a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundKind {
    Donation,
    CharityProject,
}

impl FundKind {
    /// The ledger an allocation run started by this kind draws from.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Donation => Self::CharityProject,
            Self::CharityProject => Self::Donation,
        }
    }

    /// A new donation gives capacity away; a new project receives it.
    pub fn initiator_role(self) -> Role {
        match self {
            Self::Donation => Role::Giver,
            Self::CharityProject => Role::Receiver,
        }
    }

    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            Self::Donation => "donation",
            Self::CharityProject => "charity_project",
        }
    }
}

/// Role of the initiating record inside one allocation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Giver,
    Receiver,
}

/// The funding columns common to both ledgers.
///
/// Timestamps are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FundableRecord {
    pub id: i64,
    pub full_amount: i64,
    pub invested_amount: i64,
    pub fully_invested: bool,
    pub create_date: i64,
    pub close_date: Option<i64>,
}

impl FundableRecord {
    /// A freshly created, fully open record.
    pub fn open(id: i64, full_amount: i64, create_date: i64) -> Self {
        Self {
            id,
            full_amount,
            invested_amount: 0,
            fully_invested: false,
            create_date,
            close_date: None,
        }
    }

    /// Capacity not yet allocated (what a giver can hand out, or what a
    /// receiver still needs).
    pub fn remaining(&self) -> i64 {
        self.full_amount - self.invested_amount
    }

    /// Mark the record fully invested.
    pub fn close(&mut self, now: i64) {
        self.invested_amount = self.full_amount;
        self.fully_invested = true;
        self.close_date = Some(now);
    }

    /// Add `amount` to the invested total without closing the record.
    pub fn invest(&mut self, amount: i64) {
        self.invested_amount += amount;
    }

    pub fn check_invariants(&self) -> Result<()> {
        if self.full_amount <= 0 {
            return Err(FundError::InvariantViolation(format!(
                "record {} has non-positive full_amount ({})",
                self.id, self.full_amount
            )));
        }
        if self.invested_amount < 0 || self.invested_amount > self.full_amount {
            return Err(FundError::InvariantViolation(format!(
                "record {} has invested_amount {} outside 0..={}",
                self.id, self.invested_amount, self.full_amount
            )));
        }
        let saturated = self.invested_amount == self.full_amount;
        if saturated != self.fully_invested || self.fully_invested != self.close_date.is_some() {
            return Err(FundError::InvariantViolation(format!(
                "record {} has inconsistent closed state (invested {}/{}, fully_invested={}, close_date={:?})",
                self.id,
                self.invested_amount,
                self.full_amount,
                self.fully_invested,
                self.close_date
            )));
        }
        Ok(())
    }
}

/// A charity project as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CharityProject {
    pub name: String,
    pub description: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub funding: FundableRecord,
}

/// A donation as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub comment: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub funding: FundableRecord,
}

/// Request body for creating a project.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewCharityProject {
    pub name: String,
    pub description: String,
    pub full_amount: i64,
}

/// Request body for creating a donation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewDonation {
    pub full_amount: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Partial update of a project; absent fields stay unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CharityProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub full_amount: Option<i64>,
}

/// One row of the closing-speed report.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClosedProjectSpeed {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// `close_date - create_date`, in milliseconds.
    pub collection_millis: i64,
}
