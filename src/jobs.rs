use crate::{
    config::env_parse,
    models::{ApiError, DataSource, RunReport},
    pipeline::{Pipeline, Progress},
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Background runs for lists too long to wait on in one request.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    registry: Arc<Mutex<Registry>>,
}

/// Job entries plus the order in which they finished. Only the newest
/// `retain` finished entries are kept; queued and running ones always stay.
struct Registry {
    entries: HashMap<Uuid, JobEntry>,
    finished: VecDeque<Uuid>,
    retain: usize,
}

impl Registry {
    fn new(retain: usize) -> Self {
        Self {
            entries: HashMap::new(),
            finished: VecDeque::new(),
            retain: retain.max(1),
        }
    }

    fn set_state(&mut self, id: Uuid, state: JobState) {
        let terminal = state.is_terminal();
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.state = state;
        if terminal {
            self.finished.push_back(id);
            while self.finished.len() > self.retain {
                if let Some(old) = self.finished.pop_front() {
                    self.entries.remove(&old);
                    debug!(target = "tcin.jobs", job_id = %old, "job_evicted");
                }
            }
        }
    }
}

struct Job {
    id: Uuid,
    tcins: String,
    source: DataSource,
    progress: Progress,
}

struct JobEntry {
    state: JobState,
    progress: Progress,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: RunReport },
    Failed { error: String, stage: Option<String> },
}

impl JobState {
    fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub completed: usize,
    pub total: usize,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        Self::spawn_with(pipeline, queue_capacity_from_env(), retention_from_env())
    }

    fn spawn_with(pipeline: Pipeline, capacity: usize, retain: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);
        let registry = Arc::new(Mutex::new(Registry::new(retain)));
        let registry_bg = registry.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                registry_bg.lock().await.set_state(job.id, JobState::Running);
                info!(target = "tcin.jobs", job_id = %job.id, "job_started");

                let result = pipeline
                    .run_with_progress(&job.tcins, job.source, &job.progress)
                    .await;
                let state = match result {
                    Ok(report) => JobState::Completed { result: report },
                    Err(err) => {
                        warn!(target = "tcin.jobs", job_id = %job.id, error = %err, "job_failed");
                        JobState::Failed {
                            error: err.detail().to_string(),
                            stage: Some(err.stage().to_string()),
                        }
                    }
                };
                registry_bg.lock().await.set_state(job.id, state);
            }
        });

        (Self { tx, registry }, handle)
    }

    pub async fn enqueue(&self, tcins: String, source: DataSource) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        let progress = Progress::default();
        {
            let mut guard = self.registry.lock().await;
            guard.entries.insert(
                id,
                JobEntry {
                    state: JobState::Queued,
                    progress: progress.clone(),
                },
            );
        }
        let job = Job {
            id,
            tcins,
            source,
            progress,
        };
        if self.tx.send(job).await.is_err() {
            self.registry.lock().await.entries.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.registry.lock().await;
        guard.entries.get(&id).map(|entry| JobInfo {
            id: id.to_string(),
            completed: entry.progress.completed(),
            total: entry.progress.total(),
            state: entry.state.clone(),
        })
    }
}

fn queue_capacity_from_env() -> usize {
    env_parse::<usize>("QUEUE_CAPACITY")
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

fn retention_from_env() -> usize {
    env_parse::<usize>("JOB_RETENTION")
        .filter(|v| *v > 0)
        .unwrap_or(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScraperConfig;
    use crate::fetch::testing::spawn_upstream;
    use axum::{Router, routing::get};
    use std::time::Duration;

    async fn wait_for_terminal(queue: &JobQueue, id: Uuid) -> JobInfo {
        for _ in 0..100 {
            let info = queue.get(id).await.expect("job exists");
            if matches!(
                info.state,
                JobState::Completed { .. } | JobState::Failed { .. }
            ) {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job did not finish");
    }

    #[tokio::test]
    async fn completed_job_reports_rows_and_progress() {
        let base = spawn_upstream(Router::new().route(
            "/p/-/{slug}",
            get(|| async { "<html><body></body></html>" }),
        ))
        .await;
        let mut config = ScraperConfig::default();
        config.page_base_url = format!("{base}/p/-/A-");
        let (queue, _worker) = JobQueue::spawn(Pipeline::new(config));

        let id = queue
            .enqueue("1\n2\n1".into(), DataSource::Page)
            .await
            .expect("enqueue");
        let info = wait_for_terminal(&queue, id).await;
        assert_eq!(info.total, 2);
        assert_eq!(info.completed, 2);
        match info.state {
            JobState::Completed { result } => assert_eq!(result.rows.len(), 2),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn invalid_input_fails_job_with_stage() {
        let (queue, _worker) = JobQueue::spawn(Pipeline::new(ScraperConfig::default()));
        let id = queue
            .enqueue("   ".into(), DataSource::Aggregation)
            .await
            .expect("enqueue");
        let info = wait_for_terminal(&queue, id).await;
        match info.state {
            JobState::Failed { stage, .. } => assert_eq!(stage.as_deref(), Some("intake")),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn finished_jobs_beyond_retention_are_dropped() {
        let (queue, _worker) = JobQueue::spawn_with(Pipeline::new(ScraperConfig::default()), 8, 2);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = queue
                .enqueue(" ".into(), DataSource::Page)
                .await
                .expect("enqueue");
            wait_for_terminal(&queue, id).await;
            ids.push(id);
        }
        assert!(queue.get(ids[0]).await.is_none());
        assert!(queue.get(ids[1]).await.is_some());
        assert!(queue.get(ids[2]).await.is_some());
        assert_eq!(queue.registry.lock().await.entries.len(), 2);
    }

    #[tokio::test]
    async fn unknown_job_is_none() {
        let (queue, _worker) = JobQueue::spawn(Pipeline::new(ScraperConfig::default()));
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }
}
