//! Allocation engine: first-in-first-out matching between the donation and
//! project ledgers.
//!
//! A newly created record is matched against the open records of the
//! opposite kind, oldest first.  Each step moves as much capacity as both
//! sides allow; the run ends as soon as the new record is saturated or the
//! counterparts run out.
//!
//! This module is pure: it never touches the database.  Loading the open
//! counterparts and saving the results as one batch is done by
//! [`crate::service`].

use tracing::debug;

use crate::errors::Result;
use crate::models::{FundableRecord, Role};

/// Result of one allocation run.
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    /// The initiating record after the run.
    pub record: FundableRecord,
    /// Counterparts that were touched, in the order they were matched.
    pub touched: Vec<FundableRecord>,
}

/// Move capacity from `giver` to `receiver`.
///
/// The side with less room left is closed; the other advances by the same
/// amount.  When both have exactly the same room left, both close.
pub fn transfer_capacity(giver: &mut FundableRecord, receiver: &mut FundableRecord, now: i64) {
    let available = giver.remaining();
    let needed = receiver.remaining();

    if available == needed {
        giver.close(now);
        receiver.close(now);
    } else if available > needed {
        giver.invest(needed);
        receiver.close(now);
    } else {
        receiver.invest(available);
        giver.close(now);
    }
}

/// Run one allocation for `record` against `counterparts`.
///
/// `counterparts` must already be the open records of the opposite kind in
/// allocation order.  Every input is checked against the funding invariants
/// before anything moves.  Matching stops before the next counterpart once
/// `record` is fully invested, so a closed record touches nothing.
pub fn allocate(
    record: FundableRecord,
    role: Role,
    counterparts: Vec<FundableRecord>,
    now: i64,
) -> Result<AllocationOutcome> {
    record.check_invariants()?;
    for counterpart in &counterparts {
        counterpart.check_invariants()?;
    }

    let mut record = record;
    let mut touched = Vec::new();

    for mut counterpart in counterparts {
        if record.fully_invested {
            break;
        }
        match role {
            Role::Giver => transfer_capacity(&mut record, &mut counterpart, now),
            Role::Receiver => transfer_capacity(&mut counterpart, &mut record, now),
        }
        debug!(
            record = record.id,
            counterpart = counterpart.id,
            invested = record.invested_amount,
            "matched counterpart"
        );
        touched.push(counterpart);
    }

    Ok(AllocationOutcome { record, touched })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FundError;

    const NOW: i64 = 1_704_067_200_000;

    fn open(id: i64, full_amount: i64) -> FundableRecord {
        FundableRecord::open(id, full_amount, id * 1_000)
    }

    #[test]
    fn exact_match_closes_both() {
        let mut giver = open(1, 100);
        let mut receiver = open(2, 100);
        transfer_capacity(&mut giver, &mut receiver, NOW);

        for rec in [&giver, &receiver] {
            assert!(rec.fully_invested);
            assert_eq!(rec.invested_amount, 100);
            assert_eq!(rec.close_date, Some(NOW));
        }
    }

    #[test]
    fn giver_surplus_closes_receiver_only() {
        let mut giver = open(1, 150);
        let mut receiver = open(2, 100);
        transfer_capacity(&mut giver, &mut receiver, NOW);

        assert!(receiver.fully_invested);
        assert_eq!(receiver.invested_amount, 100);
        assert!(!giver.fully_invested);
        assert_eq!(giver.invested_amount, 50);
        assert_eq!(giver.close_date, None);
    }

    #[test]
    fn receiver_surplus_closes_giver_only() {
        let mut giver = open(1, 50);
        let mut receiver = open(2, 100);
        transfer_capacity(&mut giver, &mut receiver, NOW);

        assert!(giver.fully_invested);
        assert_eq!(giver.invested_amount, 50);
        assert!(!receiver.fully_invested);
        assert_eq!(receiver.invested_amount, 50);
        assert_eq!(receiver.close_date, None);
    }

    #[test]
    fn partially_invested_sides_use_remaining_capacity() {
        let mut giver = open(1, 100);
        giver.invest(70);
        let mut receiver = open(2, 200);
        receiver.invest(180);
        transfer_capacity(&mut giver, &mut receiver, NOW);

        assert!(receiver.fully_invested);
        assert_eq!(giver.invested_amount, 90);
        assert!(!giver.fully_invested);
    }

    #[test]
    fn no_counterparts_leaves_record_untouched() {
        let record = open(1, 500);
        let outcome = allocate(record.clone(), Role::Giver, Vec::new(), NOW).unwrap();
        assert_eq!(outcome.record, record);
        assert!(outcome.touched.is_empty());
    }

    #[test]
    fn donation_fills_projects_in_order_and_stops() {
        let projects = vec![open(10, 100), open(11, 100), open(12, 100), open(13, 100)];
        let outcome = allocate(open(1, 300), Role::Giver, projects, NOW).unwrap();

        assert!(outcome.record.fully_invested);
        assert_eq!(outcome.record.invested_amount, 300);
        let ids: Vec<i64> = outcome.touched.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert!(outcome.touched.iter().all(|r| r.fully_invested));
    }

    #[test]
    fn project_draws_from_several_donations() {
        let donations = vec![open(1, 30), open(2, 50), open(3, 100)];
        let outcome = allocate(open(20, 120), Role::Receiver, donations, NOW).unwrap();

        assert!(outcome.record.fully_invested);
        assert_eq!(outcome.touched.len(), 3);
        assert!(outcome.touched[0].fully_invested);
        assert!(outcome.touched[1].fully_invested);
        assert!(!outcome.touched[2].fully_invested);
        assert_eq!(outcome.touched[2].invested_amount, 40);
    }

    #[test]
    fn receiver_stays_open_when_donations_run_out() {
        let donations = vec![open(1, 10), open(2, 15)];
        let outcome = allocate(open(20, 100), Role::Receiver, donations, NOW).unwrap();

        assert!(!outcome.record.fully_invested);
        assert_eq!(outcome.record.invested_amount, 25);
        assert!(outcome.touched.iter().all(|r| r.fully_invested));
    }

    #[test]
    fn closed_record_is_a_no_op() {
        let mut record = open(1, 100);
        record.close(NOW - 1);
        let outcome = allocate(record.clone(), Role::Giver, vec![open(10, 100)], NOW).unwrap();

        assert_eq!(outcome.record, record);
        assert!(outcome.touched.is_empty());
    }

    #[test]
    fn amounts_never_decrease_or_overshoot() {
        let donations: Vec<FundableRecord> = (1..=6).map(|i| open(i, i * 17)).collect();
        let before = donations.clone();
        let outcome = allocate(open(50, 200), Role::Receiver, donations, NOW).unwrap();

        for after in &outcome.touched {
            let prior = before.iter().find(|r| r.id == after.id).unwrap();
            assert!(after.invested_amount >= prior.invested_amount);
            assert!(after.invested_amount <= after.full_amount);
            assert!(after.check_invariants().is_ok());
        }
        assert!(outcome.record.check_invariants().is_ok());
    }

    #[test]
    fn broken_counterpart_is_rejected_before_any_transfer() {
        let mut bad = open(10, 100);
        bad.invested_amount = 120;
        let err = allocate(open(1, 50), Role::Giver, vec![bad], NOW).unwrap_err();
        assert!(matches!(err, FundError::InvariantViolation(_)));
    }
}
