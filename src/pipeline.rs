use crate::config::{ScraperConfig, env_parse};
use crate::extract::{extract_batch, extract_page};
use crate::fetch::{FetchError, Fetcher};
use crate::intake::parse_identifiers;
use crate::models::{DataSource, ProductRecord, RunReport};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct Pipeline {
    fetcher: Fetcher,
}

impl Pipeline {
    pub fn new(config: ScraperConfig) -> Self {
        Self {
            fetcher: Fetcher::new(config),
        }
    }

    pub fn from_env() -> Self {
        Self::new(ScraperConfig::from_env())
    }

    pub fn config(&self) -> &ScraperConfig {
        self.fetcher.config()
    }

    pub async fn run(&self, raw: &str, source: DataSource) -> Result<RunReport, PipelineError> {
        self.run_with_progress(raw, source, &Progress::default())
            .await
    }

    /// Intake → fetch → extract → aggregate for one submission.
    ///
    /// Only input validation can fail the run; upstream failures turn into
    /// failure rows so every identifier still gets exactly one row.
    pub async fn run_with_progress(
        &self,
        raw: &str,
        source: DataSource,
        progress: &Progress,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();

        let identifiers = parse_identifiers(raw, source);
        if identifiers.is_empty() {
            return Err(PipelineError::invalid_input(
                "intake",
                "no identifiers provided",
            ));
        }
        if max_identifiers_allowed().is_some_and(|limit| identifiers.len() > limit) {
            return Err(PipelineError::invalid_input(
                "intake",
                "too_many_identifiers",
            ));
        }
        progress.start(identifiers.len());
        info!(
            target = "tcin.pipeline",
            %run_id,
            source = source.as_str(),
            count = identifiers.len(),
            "run_started"
        );

        let fetch_started = Instant::now();
        let (rows, batch_error) = match source {
            DataSource::Page => (self.scrape_pages(&identifiers, progress).await, None),
            DataSource::Aggregation => self.scrape_batch(&identifiers, progress).await,
        };
        crate::metrics::stage_elapsed(source.as_str(), fetch_started.elapsed().as_millis());

        let failed = rows.iter().filter(|row| row.is_failure()).count();
        let succeeded = rows.len() - failed;
        let notice = run_notice(&rows, batch_error.as_ref());
        if let Some(notice) = &notice {
            warn!(target = "tcin.pipeline", %run_id, notice = %notice, "run_without_results");
        }
        crate::metrics::rows_emitted(source.as_str(), succeeded, failed);
        info!(
            target = "tcin.pipeline",
            %run_id,
            succeeded,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run_finished"
        );

        Ok(RunReport {
            run_id: run_id.to_string(),
            source,
            generated_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis(),
            succeeded,
            failed,
            notice,
            rows,
        })
    }

    /// One page request per identifier, at most `concurrency` in flight.
    /// `buffered` yields in submission order, so rows keep input order.
    async fn scrape_pages(&self, identifiers: &[String], progress: &Progress) -> Vec<ProductRecord> {
        let concurrency = self.config().concurrency.max(1);
        let outcomes: Vec<Result<ProductRecord, FetchError>> =
            stream::iter(identifiers.iter().cloned())
                .map(|id| {
                    let fetcher = self.fetcher.clone();
                    async move {
                        let body = fetcher.fetch_page(&id).await?;
                        Ok::<_, FetchError>(extract_page(&id, &body).record)
                    }
                })
                .buffered(concurrency)
                .inspect(|_| progress.advance())
                .collect()
                .await;
        aggregate(identifiers, outcomes)
    }

    async fn scrape_batch(
        &self,
        identifiers: &[String],
        progress: &Progress,
    ) -> (Vec<ProductRecord>, Option<FetchError>) {
        let result = self.fetcher.fetch_batch(identifiers).await;
        progress.finish();
        match result {
            Ok(body) => (extract_batch(identifiers, &body), None),
            Err(err) => {
                let outcomes = identifiers.iter().map(|_| Err(err.clone()));
                (aggregate(identifiers, outcomes), Some(err))
            }
        }
    }
}

/// Pair each identifier with its outcome; fetch errors become failure rows.
pub fn aggregate(
    identifiers: &[String],
    outcomes: impl IntoIterator<Item = Result<ProductRecord, FetchError>>,
) -> Vec<ProductRecord> {
    identifiers
        .iter()
        .zip(outcomes)
        .map(|(id, outcome)| match outcome {
            Ok(mut record) => {
                record.identifier = id.clone();
                record
            }
            Err(err) => ProductRecord::failure(id, err.to_string()),
        })
        .collect()
}

fn run_notice(rows: &[ProductRecord], batch_error: Option<&FetchError>) -> Option<String> {
    if let Some(err) = batch_error {
        return Some(format!("Aggregation endpoint request failed: {err}"));
    }
    if !rows.is_empty() && rows.iter().all(ProductRecord::is_failure) {
        return Some(format!(
            "No product data could be retrieved for any of the {} identifiers.",
            rows.len()
        ));
    }
    None
}

/// Unlimited unless `MAX_TCINS` is set.
fn max_identifiers_allowed() -> Option<usize> {
    env_parse::<usize>("MAX_TCINS").filter(|v| *v >= 1)
}

/// Shared completed/total counters for a run in flight.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    completed: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl Progress {
    fn start(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
    }

    fn advance(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.completed
            .store(self.total.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Internal,
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
