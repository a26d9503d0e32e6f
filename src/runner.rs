use feed_rs::model::Feed;
use tracing::{error, info, warn};

use crate::config::{Config, FetchPolicy};
use crate::diagnostics::DiagnosticLog;
use crate::error::{Error, FetchFailures, Result, SourceFailure};
use crate::feed::{self, FeedSnapshot};
use crate::fetcher::{FetchOutcome, Fetcher};
use crate::notifier::{build_notifier, Notifier};
use crate::reconcile::{self, ChangeEvent, Classification};
use crate::store::{open_store, StateStore};

/// Summary of one completed run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub first_seen: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// Sources left out under the `skip` fetch policy
    pub skipped_sources: Vec<String>,
    /// Sources whose title was already claimed by an earlier source
    pub duplicate_sources: Vec<String>,
    pub events: Vec<ChangeEvent>,
    /// Whether a non-empty batch reached the notifier successfully
    pub notified: bool,
}

/// Build every collaborator from `config` and run once.
///
/// Failures while opening the store or building the fetcher or notifier are
/// written to the configured diagnostic log, the same as failures of the run
/// itself.
pub async fn run_configured(config: &Config) -> Result<RunReport> {
    let diagnostics = DiagnosticLog::new(&config.error_log);

    let store = recorded(
        &diagnostics,
        "state store unavailable",
        open_store(&config.state).await,
    )
    .await?;
    let fetcher = recorded(
        &diagnostics,
        "fetcher setup failed",
        Fetcher::new(config.fetch_timeout()),
    )
    .await?;
    let notifier = recorded(
        &diagnostics,
        "notifier setup failed",
        build_notifier(config, &diagnostics),
    )
    .await?;

    Runner::new(
        config,
        &fetcher,
        store.as_ref(),
        notifier.as_ref(),
        &diagnostics,
    )
    .run()
    .await
}

async fn recorded<T>(diagnostics: &DiagnosticLog, context: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        error!("{}: {}", context, e);
        diagnostics.record(context, e).await;
    }
    result
}

/// One fetch, reconcile, commit and notify cycle.
///
/// Nothing is written before every kept source has been fetched and
/// normalized, and state is committed before the notifier is called, so an
/// aborted run leaves storage exactly as it found it.
pub struct Runner<'a> {
    config: &'a Config,
    fetcher: &'a Fetcher,
    store: &'a dyn StateStore,
    notifier: &'a dyn Notifier,
    diagnostics: &'a DiagnosticLog,
}

impl<'a> Runner<'a> {
    pub fn new(
        config: &'a Config,
        fetcher: &'a Fetcher,
        store: &'a dyn StateStore,
        notifier: &'a dyn Notifier,
        diagnostics: &'a DiagnosticLog,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
            notifier,
            diagnostics,
        }
    }

    /// Run once. Fatal errors are written to the diagnostic log (and sent
    /// through the notifier when `notify_on_error` is set) before returning.
    pub async fn run(&self) -> Result<RunReport> {
        match self.execute().await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Run aborted: {}", e);
                self.diagnostics.record("run aborted", &e).await;

                if self.config.notify_on_error {
                    if let Err(notify_err) = self.notifier.report_failure(&e.to_string()).await {
                        warn!("Failed to report run failure: {}", notify_err);
                        self.diagnostics
                            .record("failure report not delivered", &notify_err)
                            .await;
                    }
                }
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<RunReport> {
        let sources = self.config.sources();
        let outcomes = self.fetcher.fetch_all(&sources).await;
        let (documents, skipped_sources) = self.apply_fetch_policy(outcomes).await?;

        let snapshots = documents
            .iter()
            .map(|(url, document)| feed::normalize(url, document))
            .collect::<Result<Vec<FeedSnapshot>>>()?;

        let prior = self.store.load_all().await?;
        let plan = reconcile::reconcile(&snapshots, &prior);

        info!(
            "Reconciled {} feeds: {} new, {} changed, {} unchanged",
            plan.classifications.len(),
            plan.count(Classification::FirstSeen),
            plan.count(Classification::Changed),
            plan.count(Classification::Unchanged)
        );

        if !plan.upserts.is_empty() {
            self.store.upsert_all(&plan.upserts).await?;
            info!("Committed {} feed record(s)", plan.upserts.len());
        }

        let notified = if plan.events.is_empty() {
            info!("No feed updates");
            false
        } else {
            match self.notifier.notify(&plan.events).await {
                Ok(()) => true,
                Err(e) => {
                    // State has already advanced; a lost notification is not replayed.
                    warn!("Notification failed: {}", e);
                    self.diagnostics.record("notification failed", &e).await;
                    false
                }
            }
        };

        Ok(RunReport {
            first_seen: plan.count(Classification::FirstSeen),
            changed: plan.count(Classification::Changed),
            unchanged: plan.count(Classification::Unchanged),
            skipped_sources,
            duplicate_sources: plan.duplicates,
            events: plan.events,
            notified,
        })
    }

    /// Split outcomes into usable documents and failures, then either abort
    /// or drop the failed sources depending on the configured policy.
    async fn apply_fetch_policy(
        &self,
        outcomes: Vec<FetchOutcome>,
    ) -> Result<(Vec<(String, Feed)>, Vec<String>)> {
        let total = outcomes.len();
        let mut documents = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome.result {
                Ok(document) => documents.push((outcome.url, document)),
                Err(error) => failures.push(SourceFailure {
                    url: outcome.url,
                    error,
                }),
            }
        }

        if failures.is_empty() {
            return Ok((documents, Vec::new()));
        }

        match self.config.on_fetch_error {
            FetchPolicy::Abort => Err(Error::Fetch(FetchFailures { total, failures })),
            FetchPolicy::Skip => {
                let mut skipped = Vec::with_capacity(failures.len());
                for failure in failures {
                    warn!("Skipping {} this run: {}", failure.url, failure.error);
                    self.diagnostics
                        .record(&format!("fetch of {} skipped", failure.url), &failure.error)
                        .await;
                    skipped.push(failure.url);
                }
                Ok((documents, skipped))
            }
        }
    }
}
