use tracing::{info, warn};

use crate::enrich::{Profile, TailoringService};
use crate::models::{JobRecord, RunMetrics};
use crate::outreach::{Artifacts, OutreachService};
use crate::retry::{CallOutcome, RetryExecutor};
use crate::salary::meets_minimum;
use crate::state::LifecycleState;
use crate::store::PersistenceStore;
use crate::error::PersistenceError;

/// Drives one record through tailor, persist, and outreach. Every
/// collaborator call goes through the retry executor; every successful
/// stage is committed immediately so a partially enriched job resumes
/// where it stopped instead of redoing finished work. Job-scoped failures
/// are recorded here and never abort the caller's loop.
pub struct EnrichmentDispatcher<'a> {
    tailor: &'a dyn TailoringService,
    outreach: &'a dyn OutreachService,
    profile: &'a Profile,
    min_salary_aed: Option<i64>,
}

impl<'a> EnrichmentDispatcher<'a> {
    pub fn new(
        tailor: &'a dyn TailoringService,
        outreach: &'a dyn OutreachService,
        profile: &'a Profile,
        min_salary_aed: Option<i64>,
    ) -> Self {
        Self {
            tailor,
            outreach,
            profile,
            min_salary_aed,
        }
    }

    /// Tailor a record that still needs it, then attempt outreach when the
    /// criteria are met. Records already past tailoring are left alone, so
    /// re-running enrichment never generates duplicate artifacts.
    pub fn enrich_one(
        &self,
        record: &mut JobRecord,
        executor: &mut RetryExecutor,
        store: &dyn PersistenceStore,
        metrics: &mut RunMetrics,
    ) -> Result<(), PersistenceError> {
        if !record.state.needs_tailoring() {
            return Ok(());
        }

        match executor.call("tailoring", || self.tailor.tailor(record, self.profile)) {
            CallOutcome::Ok(output) => {
                record.resume_path = Some(output.resume_path);
                record.cover_letter_path = Some(output.cover_letter_path);
                if record.recruiter_email.is_none() {
                    record.recruiter_email = output.recruiter_email;
                }
                record.advance(LifecycleState::Tailored);
                metrics.tailored += 1;

                if self.outreach_eligible(record) {
                    record.advance(LifecycleState::OutreachPending);
                }
                store.upsert(record)?;
            }
            CallOutcome::Err(err) => {
                warn!(job = %record.posting.title, error = %err, "tailoring failed");
                record.advance(LifecycleState::TailoringFailed);
                metrics.tailoring_failed += 1;
                metrics.record_error(format!(
                    "tailoring failed for '{}': {err}",
                    record.posting.title
                ));
                store.upsert(record)?;
                return Ok(());
            }
            CallOutcome::Skipped => {
                // Circuit open: leave the record untouched for the next run
                return Ok(());
            }
        }

        if record.state == LifecycleState::OutreachPending {
            self.send_one(record, executor, store, metrics)?;
        }
        Ok(())
    }

    /// Attempt the cold email for an OutreachPending record. Sent is only
    /// recorded after the collaborator reports success; failures leave the
    /// record pending for a later run.
    pub fn send_one(
        &self,
        record: &mut JobRecord,
        executor: &mut RetryExecutor,
        store: &dyn PersistenceStore,
        metrics: &mut RunMetrics,
    ) -> Result<(), PersistenceError> {
        if record.state != LifecycleState::OutreachPending {
            return Ok(());
        }

        let artifacts = Artifacts::from_record(record);
        match executor.call("outreach", || self.outreach.send(record, &artifacts)) {
            CallOutcome::Ok(()) => {
                record.advance(LifecycleState::OutreachSent);
                metrics.outreach_sent += 1;
                store.upsert(record)?;
                info!(job = %record.posting.title, "outreach sent");
            }
            CallOutcome::Err(err) => {
                metrics.outreach_failed += 1;
                metrics.record_error(format!(
                    "outreach failed for '{}': {err}",
                    record.posting.title
                ));
            }
            CallOutcome::Skipped => {}
        }
        Ok(())
    }

    /// Outreach needs a contact and a salary at or above the floor.
    /// Unknown salaries pass; jobs without a contact stay Tailored and are
    /// surfaced for manual handling.
    fn outreach_eligible(&self, record: &JobRecord) -> bool {
        record.recruiter_email.is_some() && meets_minimum(record.salary_aed, self.min_salary_aed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    use crate::enrich::TailorOutput;
    use crate::error::{EnrichmentError, OutreachError};
    use crate::models::JobPosting;
    use crate::retry::RetryPolicy;
    use crate::store::SqliteStore;

    struct FakeTailor {
        calls: Cell<usize>,
        fail: Cell<bool>,
        recruiter: Option<String>,
    }

    impl FakeTailor {
        fn succeeding(recruiter: Option<&str>) -> Self {
            Self {
                calls: Cell::new(0),
                fail: Cell::new(false),
                recruiter: recruiter.map(String::from),
            }
        }

        fn failing() -> Self {
            let t = Self::succeeding(Some("r@acme.com"));
            t.fail.set(true);
            t
        }
    }

    impl TailoringService for FakeTailor {
        fn tailor(
            &self,
            _record: &JobRecord,
            _profile: &Profile,
        ) -> Result<TailorOutput, EnrichmentError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail.get() {
                return Err(EnrichmentError::ContentPolicy("refused".into()));
            }
            Ok(TailorOutput {
                resume_path: "artifacts/resume.md".to_string(),
                cover_letter_path: "artifacts/letter.md".to_string(),
                recruiter_email: self.recruiter.clone(),
            })
        }
    }

    struct FakeOutreach {
        calls: Cell<usize>,
        outcomes: RefCell<Vec<Result<(), OutreachError>>>,
    }

    impl FakeOutreach {
        fn with(outcomes: Vec<Result<(), OutreachError>>) -> Self {
            Self {
                calls: Cell::new(0),
                outcomes: RefCell::new(outcomes),
            }
        }
    }

    impl OutreachService for FakeOutreach {
        fn send(&self, _record: &JobRecord, _artifacts: &Artifacts) -> Result<(), OutreachError> {
            self.calls.set(self.calls.get() + 1);
            let mut outcomes = self.outcomes.borrow_mut();
            if outcomes.is_empty() {
                Ok(())
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn record(salary_aed: Option<i64>) -> JobRecord {
        let mut posting = JobPosting::new("Platform Engineer", "indeed");
        posting.company = Some("Acme".to_string());
        JobRecord::new("fp-dispatch".to_string(), posting, salary_aed)
    }

    fn executor() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::immediate(3), 3, Duration::ZERO)
    }

    fn profile() -> Profile {
        Profile {
            content: "profile".to_string(),
        }
    }

    #[test]
    fn full_path_tailors_and_sends() {
        let tailor = FakeTailor::succeeding(Some("r@acme.com"));
        let outreach = FakeOutreach::with(vec![Ok(())]);
        let profile = profile();
        let dispatcher = EnrichmentDispatcher::new(&tailor, &outreach, &profile, Some(10_000));
        let store = SqliteStore::open_in_memory().unwrap();
        let mut metrics = RunMetrics::default();
        let mut rec = record(Some(20_000));

        dispatcher
            .enrich_one(&mut rec, &mut executor(), &store, &mut metrics)
            .unwrap();

        assert_eq!(rec.state, LifecycleState::OutreachSent);
        assert!(rec.outreach_sent);
        assert_eq!(tailor.calls.get(), 1);
        assert_eq!(outreach.calls.get(), 1);
        assert_eq!(metrics.tailored, 1);
        assert_eq!(metrics.outreach_sent, 1);

        let stored = store.load_index().unwrap();
        assert_eq!(stored[0].state, LifecycleState::OutreachSent);
    }

    #[test]
    fn tailoring_failure_persists_failed_state() {
        let tailor = FakeTailor::failing();
        let outreach = FakeOutreach::with(vec![]);
        let profile = profile();
        let dispatcher = EnrichmentDispatcher::new(&tailor, &outreach, &profile, None);
        let store = SqliteStore::open_in_memory().unwrap();
        let mut metrics = RunMetrics::default();
        let mut rec = record(None);

        dispatcher
            .enrich_one(&mut rec, &mut executor(), &store, &mut metrics)
            .unwrap();

        assert_eq!(rec.state, LifecycleState::TailoringFailed);
        assert_eq!(metrics.tailoring_failed, 1);
        assert_eq!(outreach.calls.get(), 0);
        assert!(!metrics.errors.is_empty());
        assert_eq!(
            store.load_index().unwrap()[0].state,
            LifecycleState::TailoringFailed
        );
    }

    #[test]
    fn failed_record_retries_and_succeeds_with_one_new_call() {
        let store = SqliteStore::open_in_memory().unwrap();
        let profile = profile();

        // Run N: tailoring fails
        let mut rec = record(Some(20_000));
        {
            let tailor = FakeTailor::failing();
            let outreach = FakeOutreach::with(vec![]);
            let dispatcher = EnrichmentDispatcher::new(&tailor, &outreach, &profile, None);
            let mut metrics = RunMetrics::default();
            dispatcher
                .enrich_one(&mut rec, &mut executor(), &store, &mut metrics)
                .unwrap();
            assert_eq!(tailor.calls.get(), 1);
        }

        // Run N+1: record reloaded in TailoringFailed, succeeds this time
        let mut reloaded = store.load_index().unwrap().remove(0);
        assert_eq!(reloaded.state, LifecycleState::TailoringFailed);
        let tailor = FakeTailor::succeeding(Some("r@acme.com"));
        let outreach = FakeOutreach::with(vec![Ok(())]);
        let dispatcher = EnrichmentDispatcher::new(&tailor, &outreach, &profile, None);
        let mut metrics = RunMetrics::default();
        dispatcher
            .enrich_one(&mut reloaded, &mut executor(), &store, &mut metrics)
            .unwrap();

        assert_eq!(tailor.calls.get(), 1);
        assert_eq!(reloaded.state, LifecycleState::OutreachSent);
    }

    #[test]
    fn already_tailored_records_are_never_retailored() {
        let tailor = FakeTailor::succeeding(Some("r@acme.com"));
        let outreach = FakeOutreach::with(vec![]);
        let profile = profile();
        let dispatcher = EnrichmentDispatcher::new(&tailor, &outreach, &profile, None);
        let store = SqliteStore::open_in_memory().unwrap();
        let mut metrics = RunMetrics::default();

        let mut rec = record(None);
        rec.advance(LifecycleState::Tailored);
        dispatcher
            .enrich_one(&mut rec, &mut executor(), &store, &mut metrics)
            .unwrap();
        assert_eq!(tailor.calls.get(), 0);
        assert_eq!(metrics.tailored, 0);
    }

    #[test]
    fn missing_contact_stays_tailored_for_manual_handling() {
        let tailor = FakeTailor::succeeding(None);
        let outreach = FakeOutreach::with(vec![]);
        let profile = profile();
        let dispatcher = EnrichmentDispatcher::new(&tailor, &outreach, &profile, None);
        let store = SqliteStore::open_in_memory().unwrap();
        let mut metrics = RunMetrics::default();
        let mut rec = record(Some(50_000));

        dispatcher
            .enrich_one(&mut rec, &mut executor(), &store, &mut metrics)
            .unwrap();

        assert_eq!(rec.state, LifecycleState::Tailored);
        assert_eq!(outreach.calls.get(), 0);
    }

    #[test]
    fn salary_below_minimum_blocks_outreach() {
        let tailor = FakeTailor::succeeding(Some("r@acme.com"));
        let outreach = FakeOutreach::with(vec![]);
        let profile = profile();
        let dispatcher = EnrichmentDispatcher::new(&tailor, &outreach, &profile, Some(30_000));
        let store = SqliteStore::open_in_memory().unwrap();
        let mut metrics = RunMetrics::default();
        let mut rec = record(Some(15_000));

        dispatcher
            .enrich_one(&mut rec, &mut executor(), &store, &mut metrics)
            .unwrap();

        assert_eq!(rec.state, LifecycleState::Tailored);
        assert_eq!(outreach.calls.get(), 0);
    }

    #[test]
    fn unknown_salary_passes_the_gate() {
        let tailor = FakeTailor::succeeding(Some("r@acme.com"));
        let outreach = FakeOutreach::with(vec![Ok(())]);
        let profile = profile();
        let dispatcher = EnrichmentDispatcher::new(&tailor, &outreach, &profile, Some(30_000));
        let store = SqliteStore::open_in_memory().unwrap();
        let mut metrics = RunMetrics::default();
        let mut rec = record(None);

        dispatcher
            .enrich_one(&mut rec, &mut executor(), &store, &mut metrics)
            .unwrap();
        assert_eq!(rec.state, LifecycleState::OutreachSent);
    }

    #[test]
    fn send_failure_leaves_record_pending() {
        let tailor = FakeTailor::succeeding(Some("r@acme.com"));
        let outreach =
            FakeOutreach::with(vec![Err(OutreachError::Rejected("mailbox full".into()))]);
        let profile = profile();
        let dispatcher = EnrichmentDispatcher::new(&tailor, &outreach, &profile, None);
        let store = SqliteStore::open_in_memory().unwrap();
        let mut metrics = RunMetrics::default();
        let mut rec = record(None);

        dispatcher
            .enrich_one(&mut rec, &mut executor(), &store, &mut metrics)
            .unwrap();

        assert_eq!(rec.state, LifecycleState::OutreachPending);
        assert!(!rec.outreach_sent);
        assert_eq!(metrics.outreach_failed, 1);
        // The tailored stage was committed before the send attempt
        assert_eq!(
            store.load_index().unwrap()[0].state,
            LifecycleState::OutreachPending
        );
    }
}
