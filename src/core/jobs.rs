//! Indexing jobs: submission, the recent-folders list and job focus.

use std::collections::{BTreeMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::{ApiError, Backend, IndexResponse};
use crate::auth::Credential;
use crate::utils::sync::lock;
use crate::utils::url::{drive_folder_id, normalize_folder_reference};

pub type JobId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Indexing,
    Ready,
    Failed,
}

impl JobStatus {
    /// Maps the backend's free-form status string.
    pub fn from_wire(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "ready" | "done" | "indexed" => JobStatus::Ready,
            "queued" | "pending" => JobStatus::Queued,
            "failed" | "error" => JobStatus::Failed,
            "processing" | "indexing" | "running" | "in_progress" => JobStatus::Indexing,
            other => {
                debug!(status = other, "unrecognized job status");
                JobStatus::Indexing
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Indexing => "indexing",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub folder_reference: String,
    pub display_name: String,
    pub file_count: u64,
    pub status: JobStatus,
}

impl Job {
    fn from_response(folder_reference: String, response: IndexResponse) -> Self {
        let display_name = response
            .folder_name
            .filter(|name| !name.trim().is_empty())
            .or_else(|| drive_folder_id(&folder_reference))
            .unwrap_or_else(|| folder_reference.clone());
        Job {
            id: response.job_id,
            folder_reference,
            display_name,
            file_count: response.files_count.unwrap_or(0),
            status: response
                .status
                .as_deref()
                .map(JobStatus::from_wire)
                .unwrap_or(JobStatus::Ready),
        }
    }
}

/// What the coordinator is currently focused on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    NoJob,
    Submitting { folder_reference: String },
    Ready(Job),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    NotAuthenticated,
    InvalidFolder,
    /// The same folder is already being submitted.
    AlreadyInProgress,
    UnknownJob(JobId),
    Backend(ApiError),
    /// The jobs were cleared (sign-out) while the submission was pending.
    Cancelled,
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::NotAuthenticated => write!(f, "Sign in before indexing a folder."),
            IndexError::InvalidFolder => write!(f, "Please enter a folder URL."),
            IndexError::AlreadyInProgress => {
                write!(f, "This folder is already being indexed.")
            }
            IndexError::UnknownJob(id) => write!(f, "No recent folder with job id {id}."),
            IndexError::Backend(err) => write!(f, "Failed to index folder: {err}"),
            IndexError::Cancelled => write!(f, "Indexing was cancelled by sign-out."),
        }
    }
}

impl Error for IndexError {}

#[derive(Default)]
struct JobBook {
    recent: VecDeque<Job>,
    /// Pending folder keys and the generation they were submitted in.
    in_flight: BTreeMap<String, u64>,
    active: Option<JobId>,
    /// Bumped by `clear`; results from older generations are dropped.
    generation: u64,
}

impl JobBook {
    fn record(&mut self, job: Job, capacity: usize, generation: u64) -> Result<(), IndexError> {
        if generation != self.generation {
            debug!(job_id = %job.id, "dropping indexing result from before sign-out");
            return Err(IndexError::Cancelled);
        }
        let key = normalize_folder_reference(&job.folder_reference);
        self.recent.retain(|existing| {
            existing.id != job.id && normalize_folder_reference(&existing.folder_reference) != key
        });
        self.active = Some(job.id.clone());
        self.recent.push_front(job);
        self.recent.truncate(capacity);
        Ok(())
    }
}

/// Releases the per-folder submission slot, also when the caller is dropped.
struct InFlightGuard<'a> {
    book: &'a Mutex<JobBook>,
    key: String,
    generation: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut book = lock(self.book);
        if book.in_flight.get(&self.key) == Some(&self.generation) {
            book.in_flight.remove(&self.key);
        }
    }
}

pub struct IndexingCoordinator {
    backend: Arc<dyn Backend>,
    capacity: usize,
    book: Mutex<JobBook>,
}

impl IndexingCoordinator {
    pub fn new(backend: Arc<dyn Backend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity: capacity.max(1),
            book: Mutex::new(JobBook::default()),
        }
    }

    pub async fn submit(
        &self,
        folder_reference: &str,
        credential: &Credential,
    ) -> Result<Job, IndexError> {
        let reference = folder_reference.trim();
        let key = normalize_folder_reference(reference);
        if key.is_empty() {
            return Err(IndexError::InvalidFolder);
        }

        let guard = {
            let mut book = lock(&self.book);
            if book.in_flight.contains_key(&key) {
                debug!(folder = %key, "rejecting duplicate submission");
                return Err(IndexError::AlreadyInProgress);
            }
            let generation = book.generation;
            book.in_flight.insert(key.clone(), generation);
            InFlightGuard {
                book: &self.book,
                key: key.clone(),
                generation,
            }
        };

        info!(folder = %key, "submitting folder for indexing");
        let response = self
            .backend
            .submit_index(&credential.access_token, reference)
            .await
            .map_err(IndexError::Backend)?;

        let job = Job::from_response(reference.to_string(), response);
        lock(&self.book).record(job.clone(), self.capacity, guard.generation)?;
        info!(job_id = %job.id, files = job.file_count, "folder indexed");
        Ok(job)
    }

    /// Queries the backend for a job's progress and updates its status in place.
    pub async fn refresh_status(
        &self,
        job_id: &str,
        credential: &Credential,
    ) -> Result<Job, IndexError> {
        if self.job(job_id).is_none() {
            return Err(IndexError::UnknownJob(job_id.to_string()));
        }
        let status = self
            .backend
            .index_status(&credential.access_token, job_id)
            .await
            .map_err(IndexError::Backend)?;

        let mut book = lock(&self.book);
        let job = book
            .recent
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or_else(|| IndexError::UnknownJob(job_id.to_string()))?;
        job.status = JobStatus::from_wire(&status.status);
        if let Some(count) = status.files_count {
            job.file_count = count;
        }
        Ok(job.clone())
    }

    /// Focus a job from the recent list.
    pub fn activate(&self, job_id: &str) -> Result<Job, IndexError> {
        let mut book = lock(&self.book);
        let job = book
            .recent
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
            .ok_or_else(|| IndexError::UnknownJob(job_id.to_string()))?;
        book.active = Some(job.id.clone());
        Ok(job)
    }

    pub fn job(&self, job_id: &str) -> Option<Job> {
        lock(&self.book)
            .recent
            .iter()
            .find(|job| job.id == job_id)
            .cloned()
    }

    pub fn active_job(&self) -> Option<Job> {
        let book = lock(&self.book);
        let active = book.active.as_ref()?;
        book.recent.iter().find(|job| &job.id == active).cloned()
    }

    /// Most recent first.
    pub fn recent(&self) -> Vec<Job> {
        lock(&self.book).recent.iter().cloned().collect()
    }

    /// A pending submission takes precedence over the focused job.
    pub fn state(&self) -> JobState {
        let book = lock(&self.book);
        if let Some(folder) = book.in_flight.keys().next() {
            return JobState::Submitting {
                folder_reference: folder.clone(),
            };
        }
        book.active
            .as_ref()
            .and_then(|id| book.recent.iter().find(|job| &job.id == id))
            .map_or(JobState::NoJob, |job| JobState::Ready(job.clone()))
    }

    /// Forget every job. Submissions still pending resolve to `Cancelled`.
    pub fn clear(&self) {
        let mut book = lock(&self.book);
        book.generation += 1;
        book.in_flight.clear();
        book.recent.clear();
        book.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{sample_credential, FakeBackend};

    const FOLDER: &str = "https://drive.google.com/drive/folders/F";

    #[test]
    fn status_strings_map_to_variants() {
        assert_eq!(JobStatus::from_wire("completed"), JobStatus::Ready);
        assert_eq!(JobStatus::from_wire(" Pending "), JobStatus::Queued);
        assert_eq!(JobStatus::from_wire("error"), JobStatus::Failed);
        assert_eq!(JobStatus::from_wire("crunching"), JobStatus::Indexing);
    }

    #[tokio::test]
    async fn submit_records_job_from_response() {
        let backend = Arc::new(FakeBackend::new().with_index_reply("42", Some("Reports"), Some(3)));
        let coordinator = IndexingCoordinator::new(backend.clone(), 20);

        let job = coordinator
            .submit(&format!("  {FOLDER} "), &sample_credential())
            .await
            .expect("submit should succeed");

        assert_eq!(job.id, "42");
        assert_eq!(job.folder_reference, FOLDER);
        assert_eq!(job.display_name, "Reports");
        assert_eq!(job.file_count, 3);
        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(coordinator.recent(), vec![job.clone()]);
        assert_eq!(coordinator.state(), JobState::Ready(job));
        assert_eq!(backend.index_requests(), vec![FOLDER.to_string()]);
    }

    #[tokio::test]
    async fn display_name_falls_back_to_drive_folder_id() {
        let backend = Arc::new(FakeBackend::new().with_index_reply("job_1", None, None));
        let coordinator = IndexingCoordinator::new(backend, 20);

        let job = coordinator
            .submit(FOLDER, &sample_credential())
            .await
            .expect("submit");
        assert_eq!(job.display_name, "F");
        assert_eq!(job.file_count, 0);
    }

    #[tokio::test]
    async fn empty_folder_reference_is_rejected() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = IndexingCoordinator::new(backend.clone(), 20);

        let err = coordinator
            .submit("   ", &sample_credential())
            .await
            .expect_err("should fail");
        assert_eq!(err, IndexError::InvalidFolder);
        assert!(backend.index_requests().is_empty());
    }

    #[tokio::test]
    async fn duplicate_pending_submission_is_rejected() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_index_reply("42", Some("F"), Some(3))
                .with_index_gate(),
        );
        let coordinator = Arc::new(IndexingCoordinator::new(backend.clone(), 20));
        let credential = sample_credential();

        let first = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            let credential = credential.clone();
            async move { coordinator.submit(FOLDER, &credential).await }
        });
        backend.wait_for_index_started().await;
        assert_eq!(
            coordinator.state(),
            JobState::Submitting {
                folder_reference: FOLDER.to_string()
            }
        );

        let second = coordinator.submit(&format!("{FOLDER}/"), &credential).await;
        assert_eq!(second, Err(IndexError::AlreadyInProgress));

        backend.release_index();
        first.await.expect("join").expect("first submission");

        let entries: Vec<Job> = coordinator
            .recent()
            .into_iter()
            .filter(|job| job.folder_reference == FOLDER)
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(backend.index_requests().len(), 1);
    }

    #[tokio::test]
    async fn failed_submission_leaves_state_untouched() {
        let backend = Arc::new(FakeBackend::new().with_index_reply("1", Some("A"), Some(1)));
        let coordinator = IndexingCoordinator::new(backend.clone(), 20);
        let credential = sample_credential();
        let first = coordinator.submit("folder-a", &credential).await.expect("a");

        backend.fail_next_index(ApiError::Status {
            status: 500,
            summary: "drive unavailable".to_string(),
        });
        let err = coordinator
            .submit("folder-b", &credential)
            .await
            .expect_err("should fail");
        assert!(matches!(err, IndexError::Backend(_)));
        assert_eq!(coordinator.recent(), vec![first.clone()]);
        assert_eq!(coordinator.active_job(), Some(first));

        // The in-flight slot is released after a failure.
        backend.set_index_reply("2", Some("B"), Some(2));
        coordinator
            .submit("folder-b", &credential)
            .await
            .expect("retry succeeds");
    }

    #[tokio::test]
    async fn resubmission_moves_folder_to_front_and_prunes_stale_job() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = IndexingCoordinator::new(backend.clone(), 20);
        let credential = sample_credential();

        backend.set_index_reply("1", Some("A"), Some(1));
        coordinator.submit("folder-a", &credential).await.expect("a");
        backend.set_index_reply("2", Some("B"), Some(1));
        coordinator.submit("folder-b", &credential).await.expect("b");
        backend.set_index_reply("3", Some("A"), Some(5));
        coordinator.submit("folder-a/", &credential).await.expect("a again");

        let ids: Vec<String> = coordinator.recent().into_iter().map(|job| job.id).collect();
        assert_eq!(ids, vec!["3".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn recent_list_is_bounded() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = IndexingCoordinator::new(backend.clone(), 3);
        let credential = sample_credential();

        for n in 0..5 {
            backend.set_index_reply(&n.to_string(), None, None);
            coordinator
                .submit(&format!("folder-{n}"), &credential)
                .await
                .expect("submit");
        }

        let ids: Vec<String> = coordinator.recent().into_iter().map(|job| job.id).collect();
        assert_eq!(ids, vec!["4", "3", "2"]);
    }

    #[tokio::test]
    async fn refresh_status_updates_only_status_and_count() {
        let backend = Arc::new(FakeBackend::new().with_index_reply("7", Some("Docs"), Some(0)));
        let coordinator = IndexingCoordinator::new(backend.clone(), 20);
        let credential = sample_credential();
        let job = coordinator.submit("docs", &credential).await.expect("submit");

        backend.set_status_reply("failed", Some(12));
        let refreshed = coordinator
            .refresh_status(&job.id, &credential)
            .await
            .expect("refresh");
        assert_eq!(refreshed.status, JobStatus::Failed);
        assert_eq!(refreshed.file_count, 12);
        assert_eq!(refreshed.display_name, "Docs");

        let err = coordinator
            .refresh_status("missing", &credential)
            .await
            .expect_err("unknown job");
        assert_eq!(err, IndexError::UnknownJob("missing".to_string()));
    }

    #[tokio::test]
    async fn activate_and_clear() {
        let backend = Arc::new(FakeBackend::new());
        let coordinator = IndexingCoordinator::new(backend.clone(), 20);
        let credential = sample_credential();
        backend.set_index_reply("1", Some("A"), None);
        coordinator.submit("a", &credential).await.expect("a");
        backend.set_index_reply("2", Some("B"), None);
        coordinator.submit("b", &credential).await.expect("b");

        let job = coordinator.activate("1").expect("activate");
        assert_eq!(coordinator.active_job(), Some(job));
        assert!(coordinator.activate("9").is_err());

        coordinator.clear();
        assert!(coordinator.recent().is_empty());
        assert_eq!(coordinator.state(), JobState::NoJob);
    }

    #[tokio::test]
    async fn state_reports_submitting_over_focused_job() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_index_reply("1", Some("A"), None)
                .with_index_gate(),
        );
        let coordinator = Arc::new(IndexingCoordinator::new(backend.clone(), 20));
        let credential = sample_credential();
        backend.release_index();
        let first = coordinator.submit("folder-a", &credential).await.expect("a");
        backend.wait_for_index_started().await;

        backend.set_index_reply("2", Some("B"), None);
        let pending = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            let credential = credential.clone();
            async move { coordinator.submit("folder-b", &credential).await }
        });
        backend.wait_for_index_started().await;
        assert_eq!(
            coordinator.state(),
            JobState::Submitting {
                folder_reference: "folder-b".to_string()
            }
        );
        assert_eq!(coordinator.active_job(), Some(first));

        backend.release_index();
        let second = pending.await.expect("join").expect("b");
        assert_eq!(coordinator.state(), JobState::Ready(second));
    }

    #[tokio::test]
    async fn clear_cancels_pending_submission() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_index_reply("42", Some("F"), Some(3))
                .with_index_gate(),
        );
        let coordinator = Arc::new(IndexingCoordinator::new(backend.clone(), 20));
        let credential = sample_credential();

        let pending = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            let credential = credential.clone();
            async move { coordinator.submit(FOLDER, &credential).await }
        });
        backend.wait_for_index_started().await;
        coordinator.clear();
        assert_eq!(coordinator.state(), JobState::NoJob);

        backend.release_index();
        assert_eq!(pending.await.expect("join"), Err(IndexError::Cancelled));
        assert!(coordinator.recent().is_empty());
        assert_eq!(coordinator.active_job(), None);
        assert_eq!(coordinator.state(), JobState::NoJob);
    }
}
