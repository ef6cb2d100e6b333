use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::dedup::DedupIndex;
use crate::dispatch::EnrichmentDispatcher;
use crate::email::AlertChannelAdapter;
use crate::enrich::{Profile, TailoringService};
use crate::error::{PersistenceError, PipelineError};
use crate::fingerprint::{fingerprint, NormalizePolicy};
use crate::models::{JobPosting, JobRecord, RunMetrics, SearchQuery};
use crate::outreach::OutreachService;
use crate::retry::{CallOutcome, RetryExecutor};
use crate::salary::{normalize_salary, CurrencyConverter, FixedRates};
use crate::sources::SourceAdapter;
use crate::state::LifecycleState;
use crate::store::PersistenceStore;

/// How a run ended, for the process exit code. Fatal errors surface as
/// PipelineError instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Clean,
    PartialFailures,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Clean => 0,
            RunOutcome::PartialFailures => 1,
        }
    }
}

/// Machine-checkable summary returned by every operation.
#[derive(Debug)]
pub struct RunReport {
    pub operation: &'static str,
    pub metrics: RunMetrics,
    /// mark-applied identifiers that matched no record.
    pub unmatched_ids: Vec<i64>,
}

impl RunReport {
    fn new(operation: &'static str, metrics: RunMetrics) -> Self {
        Self {
            operation,
            metrics,
            unmatched_ids: Vec::new(),
        }
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.metrics.had_failures() || !self.unmatched_ids.is_empty() {
            RunOutcome::PartialFailures
        } else {
            RunOutcome::Clean
        }
    }
}

/// Read-only state summary.
#[derive(Debug)]
pub struct StatusReport {
    pub total: usize,
    pub counts: Vec<(LifecycleState, usize)>,
    /// Tailored records without a recruiter contact, surfaced for manual
    /// handling.
    pub needs_contact: Vec<JobRecord>,
}

/// Top-level control loop. One operation per invocation; each loads the
/// dedup index once, does a single pass, writes back state and terminates.
/// Scheduling is someone else's job.
pub struct Orchestrator {
    query: SearchQuery,
    min_salary_aed: Option<i64>,
    policy: NormalizePolicy,
    fuzzy_threshold: Option<f64>,
    converter: Box<dyn CurrencyConverter>,
    store: Box<dyn PersistenceStore>,
    sources: Vec<Box<dyn SourceAdapter>>,
    alerts: Vec<Box<dyn AlertChannelAdapter>>,
    tailor: Box<dyn TailoringService>,
    outreach: Box<dyn OutreachService>,
    profile: Profile,
    executor: RetryExecutor,
    dry_run: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &AgentConfig,
        store: Box<dyn PersistenceStore>,
        sources: Vec<Box<dyn SourceAdapter>>,
        alerts: Vec<Box<dyn AlertChannelAdapter>>,
        tailor: Box<dyn TailoringService>,
        outreach: Box<dyn OutreachService>,
        profile: Profile,
    ) -> Self {
        let executor = RetryExecutor::new(
            config.retry.policy(),
            config.retry.circuit_threshold,
            config.retry.min_call_interval(),
        );
        Self {
            query: SearchQuery {
                keywords: config.keywords.clone(),
                locations: config.locations.clone(),
            },
            min_salary_aed: config.min_salary_aed,
            policy: NormalizePolicy::with_aliases(&config.alias_pairs()),
            fuzzy_threshold: config.fuzzy_dedup_threshold,
            converter: Box::new(FixedRates::aed_default().merged(&config.currency_rates)),
            store,
            sources,
            alerts,
            tailor,
            outreach,
            profile,
            executor,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn load_index(&self) -> Result<DedupIndex, PersistenceError> {
        let records = self.store.load_index()?;
        Ok(DedupIndex::from_records(
            records,
            self.policy.clone(),
            self.fuzzy_threshold,
        ))
    }

    /// Discovery, dedup and enrichment in one pass.
    pub fn scrape(&mut self) -> Result<RunReport, PipelineError> {
        let mut metrics = RunMetrics::default();
        let mut index = self.load_index()?;
        info!(known_records = index.len(), "scrape started");

        // One guarded call per source and keyword/location pair, so a
        // degraded source circuit-breaks without touching the others.
        let mut fetched: Vec<JobPosting> = Vec::new();
        for source in &self.sources {
            'source: for keywords in &self.query.keywords {
                for location in &self.query.locations {
                    let single = SearchQuery {
                        keywords: vec![keywords.clone()],
                        locations: vec![location.clone()],
                    };
                    match self.executor.call(source.name(), || source.fetch(&single)) {
                        CallOutcome::Ok(postings) => fetched.extend(postings),
                        CallOutcome::Err(err) => {
                            metrics.record_error(format!("source {}: {err}", source.name()));
                        }
                        CallOutcome::Skipped => break 'source,
                    }
                }
            }
        }

        for posting in fetched {
            self.ingest(posting, &mut index, &mut metrics)?;
        }


        // Alert channels: ingest first, confirm consumption only after the
        // batch is committed.
        for channel in &self.alerts {
            match self.executor.call(channel.name(), || channel.fetch_new()) {
                CallOutcome::Ok(batch) => {
                    for posting in batch.postings {
                        self.ingest(posting, &mut index, &mut metrics)?;
                    }
                    // Every posting is committed, the messages may be
                    // marked consumed now.
                    if !self.dry_run {
                        let uids = batch.message_uids;
                        if let CallOutcome::Err(err) = self
                            .executor
                            .call(channel.name(), || channel.mark_consumed(&uids))
                        {
                            metrics.record_error(format!(
                                "alert channel {}: failed to mark consumed: {err}",
                                channel.name()
                            ));
                        }
                    }
                }
                CallOutcome::Err(err) => {
                    metrics.record_error(format!("alert channel {}: {err}", channel.name()));
                }
                CallOutcome::Skipped => {}
            }
        }

        // Enrichment pass over everything still waiting for tailoring,
        // including TailoringFailed leftovers from earlier runs.
        if !self.dry_run {
            let pending: Vec<String> = index
                .records()
                .filter(|r| r.state.needs_tailoring())
                .map(|r| r.fingerprint.clone())
                .collect();
            let dispatcher = EnrichmentDispatcher::new(
                self.tailor.as_ref(),
                self.outreach.as_ref(),
                &self.profile,
                self.min_salary_aed,
            );
            for fp in pending {
                if let Some(record) = index.get_mut(&fp) {
                    dispatcher.enrich_one(
                        record,
                        &mut self.executor,
                        self.store.as_ref(),
                        &mut metrics,
                    )?;
                }
            }
        }

        metrics.circuit_broken = self.executor.opened_circuits().to_vec();
        if !self.dry_run {
            self.store.append_metrics("scrape", &metrics)?;
        }
        Ok(RunReport::new("scrape", metrics))
    }

    /// Check-then-act per fingerprint. The index is owned by this single
    /// run, so first writer wins and the second sighting only annotates.
    fn ingest(
        &self,
        posting: JobPosting,
        index: &mut DedupIndex,
        metrics: &mut RunMetrics,
    ) -> Result<(), PersistenceError> {
        let fp = fingerprint(&posting, &self.policy);
        if let Some(existing_fp) = index.resolve(&posting, &fp) {
            metrics.duplicates += 1;
            if let Some(record) = index.get_mut(&existing_fp) {
                if record.note_sighting(&posting.source) && !self.dry_run {
                    self.store.upsert(record)?;
                }
            }
            return Ok(());
        }

        let salary_aed = posting
            .salary_text
            .as_deref()
            .and_then(|text| normalize_salary(text, self.converter.as_ref()));
        let mut record = JobRecord::new(fp, posting, salary_aed);
        if !self.dry_run {
            self.store.upsert(&mut record)?;
        }
        metrics.discovered += 1;
        index.insert(record);
        Ok(())
    }

    /// Re-scan OutreachPending records and attempt sends.
    pub fn send_emails(&mut self) -> Result<RunReport, PipelineError> {
        let mut metrics = RunMetrics::default();
        let mut index = self.load_index()?;

        let pending: Vec<String> = index
            .records()
            .filter(|r| r.state == LifecycleState::OutreachPending)
            .map(|r| r.fingerprint.clone())
            .collect();
        info!(pending = pending.len(), "send pass started");

        if !self.dry_run {
            let dispatcher = EnrichmentDispatcher::new(
                self.tailor.as_ref(),
                self.outreach.as_ref(),
                &self.profile,
                self.min_salary_aed,
            );
            for fp in pending {
                if let Some(record) = index.get_mut(&fp) {
                    dispatcher.send_one(
                        record,
                        &mut self.executor,
                        self.store.as_ref(),
                        &mut metrics,
                    )?;
                }
            }
        }

        metrics.circuit_broken = self.executor.opened_circuits().to_vec();
        if !self.dry_run {
            self.store.append_metrics("send_emails", &metrics)?;
        }
        Ok(RunReport::new("send_emails", metrics))
    }

    /// Transition operator-identified records to Applied. Unknown ids
    /// leave the store untouched and are reported back.
    pub fn mark_applied(&mut self, ids: &[i64]) -> Result<RunReport, PipelineError> {
        let mut metrics = RunMetrics::default();
        let records = self.store.read_by_external_ids(ids)?;

        let mut unmatched: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !records.iter().any(|r| r.id == Some(*id)))
            .collect();
        unmatched.dedup();

        for mut record in records {
            if record.state == LifecycleState::Applied {
                continue;
            }
            record.advance(LifecycleState::Applied);
            if !self.dry_run {
                self.store.upsert(&mut record)?;
            }
            metrics.applied += 1;
            info!(id = ?record.id, job = %record.posting.title, "marked applied");
        }

        for id in &unmatched {
            warn!(id, "no record with this identifier");
            metrics.record_error(format!("no record with id {id}"));
        }

        if !self.dry_run {
            self.store.append_metrics("mark_applied", &metrics)?;
        }
        let mut report = RunReport::new("mark_applied", metrics);
        report.unmatched_ids = unmatched;
        Ok(report)
    }

    /// Read-only counts per lifecycle state.
    pub fn status(&self) -> Result<StatusReport, PipelineError> {
        status_report(self.store.as_ref())
    }
}

/// Status straight off the store; needs no collaborators, so the CLI can
/// answer without credentials.
pub fn status_report(store: &dyn PersistenceStore) -> Result<StatusReport, PipelineError> {
    let records = store.load_index()?;
    let states = [
        LifecycleState::Unique,
        LifecycleState::TailoringFailed,
        LifecycleState::Tailored,
        LifecycleState::OutreachPending,
        LifecycleState::OutreachSent,
        LifecycleState::Applied,
    ];
    let counts = states
        .iter()
        .map(|s| (*s, records.iter().filter(|r| r.state == *s).count()))
        .collect();
    let needs_contact = records
        .iter()
        .filter(|r| r.state == LifecycleState::Tailored && r.recruiter_email.is_none())
        .cloned()
        .collect();
    Ok(StatusReport {
        total: records.len(),
        counts,
        needs_contact,
    })
}
