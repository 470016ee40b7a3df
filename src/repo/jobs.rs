/*!
Job run persistence: every operation execution writes its [Job] record to
`jobs/runs/<job_type>/<run_id>.json`, updated periodically during long
iterations and finalised on stop. Run ids are time-sortable, so the most
recent run is the lexically largest key.
*/

use bytes::Bytes;
use tracing::warn;

use crate::conventions::path;
use crate::error::Result;
use crate::model::job::Job;
use crate::storage::object::Storage;

/// Job run storage for one dataset.
#[derive(Debug, Clone)]
pub struct JobRepository {
    storage: Storage,
}

impl JobRepository {
    /// Open the repository on a dataset's storage.
    pub fn new(storage: Storage) -> Self {
        JobRepository { storage }
    }

    /// Persist a job record.
    pub async fn save(&self, job: &Job) -> Result<()> {
        let key = path::job_run(job.job_type(), &job.run_id);
        let data = serde_json::to_vec(job)?;
        self.storage.put(&key, Bytes::from(data)).await
    }

    /// Start a run: mark the job started and persist the initial record.
    pub async fn start(&self, mut job: Job) -> Result<JobRun> {
        job.start();
        self.save(&job).await?;
        Ok(JobRun {
            repo: self.clone(),
            job,
        })
    }

    /// Read one run record.
    pub async fn get(&self, job_type: &str, run_id: &str) -> Result<Job> {
        let data = self.storage.get(&path::job_run(job_type, run_id)).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// The most recent run of a job type, or `None`.
    pub async fn latest(&self, job_type: &str) -> Result<Option<Job>> {
        let prefix = format!("{}/{job_type}", path::JOB_RUNS);
        let keys = self.storage.iterate_keys(Some(&prefix), None, None).await?;
        match keys.last() {
            Some(key) => {
                let data = self.storage.get(key).await?;
                Ok(Some(serde_json::from_slice(&data)?))
            }
            None => Ok(None),
        }
    }

    /// All run ids of a job type, ascending.
    pub async fn list(&self, job_type: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/{job_type}", path::JOB_RUNS);
        let keys = self.storage.iterate_keys(Some(&prefix), None, None).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                key.rsplit('/')
                    .next()
                    .and_then(|name| name.strip_suffix(".json"))
                    .map(str::to_string)
            })
            .collect())
    }
}

/// A running job: mutate [JobRun::job] counters and call [JobRun::save]
/// on progress; [JobRun::finish] stamps the stop time and persists the
/// final record.
pub struct JobRun {
    repo: JobRepository,
    /// The live job record.
    pub job: Job,
}

impl JobRun {
    /// Persist the current job state, touching the progress timestamp.
    pub async fn save(&mut self) -> Result<()> {
        self.job.touch();
        self.repo.save(&self.job).await
    }

    /// Stop the job (recording an optional error) and persist the final
    /// record.
    pub async fn finish(&mut self, exc: Option<String>) -> Result<()> {
        if let Some(message) = &exc {
            warn!(run_id = %self.job.run_id, error = %message, "job failed");
        }
        self.job.stop(exc);
        self.repo.save(&self.job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::job::JobParams;

    fn repo() -> JobRepository {
        JobRepository::new(Storage::memory())
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let repo = repo();
        let job = Job::make("test", JobParams::ExportStatements {});
        let run_id = job.run_id.clone();
        let mut run = repo.start(job).await.unwrap();
        assert!(run.job.running);

        run.job.done = 1;
        run.save().await.unwrap();
        run.finish(None).await.unwrap();

        let stored = repo.get("export_statements", &run_id).await.unwrap();
        assert!(!stored.running);
        assert_eq!(stored.done, 1);
        assert!(stored.stopped.is_some());
    }

    #[tokio::test]
    async fn test_latest_is_most_recent() {
        let repo = repo();
        for _ in 0..3 {
            let job = Job::make("test", JobParams::ExportStatements {});
            let mut run = repo.start(job).await.unwrap();
            run.finish(None).await.unwrap();
        }
        let runs = repo.list("export_statements").await.unwrap();
        assert_eq!(runs.len(), 3);
        let latest = repo.latest("export_statements").await.unwrap().unwrap();
        assert_eq!(&latest.run_id, runs.last().unwrap());
    }

    #[tokio::test]
    async fn test_failed_run_records_error() {
        let repo = repo();
        let job = Job::make("test", JobParams::ExportStatements {});
        let mut run = repo.start(job).await.unwrap();
        run.finish(Some("boom".to_string())).await.unwrap();
        let latest = repo.latest("export_statements").await.unwrap().unwrap();
        assert_eq!(latest.exc.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_no_runs_yet() {
        let repo = repo();
        assert!(repo.latest("crawl").await.unwrap().is_none());
        assert!(repo.list("crawl").await.unwrap().is_empty());
    }
}
