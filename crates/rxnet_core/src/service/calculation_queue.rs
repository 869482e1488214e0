//! Calculation queue for compute workers.
//!
//! # Responsibility
//! - Hand out `new` calculations to exactly one worker each.
//! - Record completion or failure of a claimed calculation.
//!
//! # Invariants
//! - Every state transition is one `fetch_and_update_one` or one update;
//!   there is no read-then-write window between workers.
//! - A claim picks the lowest priority number first, then the oldest.

use crate::entity::calculation::{Calculation, Results};
use crate::entity::object::{access, write};
use crate::entity::Entity;
use crate::error::EntityResult;
use crate::model::layout::CalculationStatus;
use crate::repo::CollectionHandle;
use crate::store::{Filter, ReturnDocument, Sort, Update, CREATED_FIELD};
use log::{debug, info};

const STATUS: &str = "status";
const EXECUTOR: &str = "executor";
const RUNTIME: &str = "runtime";

/// Queue view of a calculations collection for one named executor.
pub struct CalculationQueue {
    calculations: CollectionHandle,
    executor: String,
}

impl CalculationQueue {
    pub fn new(calculations: CollectionHandle, executor: impl Into<String>) -> Self {
        Self {
            calculations,
            executor: executor.into(),
        }
    }

    pub fn executor(&self) -> &str {
        &self.executor
    }

    /// Moves a calculation out of `construction` so workers can claim it.
    pub fn submit(&self, calculation: &Calculation) -> EntityResult<()> {
        calculation.set_status(CalculationStatus::New)
    }

    /// Number of calculations waiting to be claimed.
    pub fn pending_count(&self, order_filter: Option<&Filter>) -> EntityResult<u64> {
        self.calculations.count(&claimable(order_filter))
    }

    /// Claims the next `new` calculation, flipping it to `pending`.
    ///
    /// # Contract
    /// - Returns `None` when nothing is claimable.
    /// - Concurrent callers never receive the same calculation.
    /// - `order_filter` narrows candidates, e.g. to one job order.
    pub fn claim_next(&self, order_filter: Option<&Filter>) -> EntityResult<Option<Calculation>> {
        let update = Update::new()
            .set(STATUS, CalculationStatus::Pending)
            .set(EXECUTOR, self.executor.as_str());
        let sort = Sort::ascending("priority").then_ascending(CREATED_FIELD);
        let claimed = self.calculations.fetch_and_update_one::<Calculation>(
            &claimable(order_filter),
            &update,
            Some(&sort),
            ReturnDocument::After,
        )?;
        match &claimed {
            Some(calculation) => info!(
                "event=calculation_claim module=service status=ok executor={} id={}",
                self.executor,
                calculation.id()?
            ),
            None => debug!(
                "event=calculation_claim module=service status=empty executor={}",
                self.executor
            ),
        }
        Ok(claimed)
    }

    /// Returns a claimed calculation to `new` if this executor still holds it.
    ///
    /// # Contract
    /// - Returns `false` when the calculation is no longer pending under
    ///   this executor.
    pub fn release(&self, calculation: &Calculation) -> EntityResult<bool> {
        let (id, _) = access(calculation)?;
        let filter = Filter::and([
            Filter::by_id(id),
            Filter::eq(STATUS, CalculationStatus::Pending),
            Filter::eq(EXECUTOR, self.executor.as_str()),
        ]);
        let update = Update::new()
            .set(STATUS, CalculationStatus::New)
            .unset(EXECUTOR);
        let released = self
            .calculations
            .fetch_and_update_one::<Calculation>(&filter, &update, None, ReturnDocument::After)?
            .is_some();
        info!(
            "event=calculation_release module=service status={} executor={} id={id}",
            if released { "ok" } else { "not_held" },
            self.executor
        );
        Ok(released)
    }

    /// Marks `calculation` complete and appends `results`.
    pub fn complete(
        &self,
        calculation: &Calculation,
        results: &Results,
        runtime: f64,
    ) -> EntityResult<()> {
        let update = self
            .finish(CalculationStatus::Complete, runtime)
            .push_all("results.structures", results.structures.iter().copied())
            .push_all("results.properties", results.properties.iter().copied())
            .push_all("results.elementary_steps", results.elementary_steps.iter().copied());
        write(calculation, &update)?;
        info!(
            "event=calculation_complete module=service status=ok executor={} id={}",
            self.executor,
            calculation.id()?
        );
        Ok(())
    }

    /// Marks `calculation` failed, keeping `comment` when given.
    pub fn fail(
        &self,
        calculation: &Calculation,
        runtime: f64,
        comment: Option<&str>,
    ) -> EntityResult<()> {
        let mut update = self.finish(CalculationStatus::Failed, runtime);
        if let Some(comment) = comment {
            update = update.set("comment", comment);
        }
        write(calculation, &update)?;
        info!(
            "event=calculation_fail module=service status=ok executor={} id={}",
            self.executor,
            calculation.id()?
        );
        Ok(())
    }

    fn finish(&self, status: CalculationStatus, runtime: f64) -> Update {
        Update::new()
            .set(STATUS, status)
            .set(EXECUTOR, self.executor.as_str())
            .set(RUNTIME, runtime)
    }
}

fn claimable(order_filter: Option<&Filter>) -> Filter {
    let status = Filter::eq(STATUS, CalculationStatus::New);
    match order_filter {
        Some(filter) => Filter::and([status, filter.clone()]),
        None => status,
    }
}
