#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use micrograph_core::artifacts::StorageLayout;
use micrograph_core::experiment::{ExperimentGroup, SubExperiment};
use micrograph_core::types::{GroupId, UserId};
use micrograph_core::usage::UsageCost;
use micrograph_db::models::experiment_group::GroupPage;
use micrograph_db::repositories::experiment_group_repo::page_bounds;
use micrograph_db::{BalanceLedger, ExperimentGroupStore};
use micrograph_pipeline::{
    ArchiveAssembler, ArchiveSettings, ExperimentService, JobTemplate, ReconciliationLoop,
    SubmissionPath,
};
use micrograph_runpod::messages::parse_status;
use micrograph_runpod::{
    InferenceClient, InferenceInput, JobStatusResponse, RunPodApiError, SubmitResponse,
};
use micrograph_storage::{ObjectStore, StorageError, UploadedPart};

pub const INPUT_BUCKET: &str = "micrograph-input";
pub const OUTPUT_BUCKET: &str = "micrograph-output";
pub const OWNER: UserId = 42;
pub const STARTING_BALANCE: i64 = 1_000;

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

struct PendingUpload {
    bucket: String,
    key: String,
    parts: Vec<(i32, Vec<u8>)>,
}

/// In-memory object store with failure injection.
#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    next_upload: AtomicUsize,
    failing_gets: Mutex<HashSet<String>>,
    slow_gets: Mutex<HashMap<String, Duration>>,
    gets_in_flight: AtomicUsize,
    pub fail_puts: AtomicBool,
    pub fail_upload_parts: AtomicBool,
    pub get_delay: Mutex<Option<Duration>>,
    /// Delay between registering a multipart upload and returning its ID.
    pub create_delay: Mutex<Option<Duration>>,
    /// Most `get` calls observed in flight at once.
    pub peak_gets: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub part_sizes: Mutex<Vec<usize>>,
    pub completed_uploads: Mutex<Vec<String>>,
    pub aborted_uploads: Mutex<Vec<String>>,
}

impl FakeObjectStore {
    pub fn insert(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes);
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Make `get` for `key` fail with a transport error instead of NotFound.
    pub fn fail_get(&self, key: &str) {
        self.failing_gets.lock().unwrap().insert(key.to_string());
    }

    /// Delay every `get` of `key`, overriding `get_delay`.
    pub fn slow_get(&self, key: &str, delay: Duration) {
        self.slow_gets.lock().unwrap().insert(key.to_string(), delay);
    }

    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Request {
                bucket: bucket.into(),
                key: key.into(),
                message: "injected put failure".into(),
            });
        }
        self.insert(bucket, key, bytes);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let in_flight = self.gets_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_gets.fetch_max(in_flight, Ordering::SeqCst);

        let delay = self
            .slow_gets
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .or(*self.get_delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.gets_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_gets.lock().unwrap().contains(key) {
            return Err(StorageError::Request {
                bucket: bucket.into(),
                key: key.into(),
                message: "injected get failure".into(),
            });
        }
        self.object(bucket, key).ok_or_else(|| StorageError::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        })
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        _content_type: Option<&str>,
    ) -> Result<String, StorageError> {
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.uploads.lock().unwrap().insert(
            id.clone(),
            PendingUpload {
                bucket: bucket.into(),
                key: key.into(),
                parts: Vec::new(),
            },
        );
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        bytes: Vec<u8>,
    ) -> Result<UploadedPart, StorageError> {
        if self.fail_upload_parts.load(Ordering::SeqCst) {
            return Err(StorageError::Request {
                bucket: bucket.into(),
                key: key.into(),
                message: "injected part failure".into(),
            });
        }
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::InvalidResponse(format!("unknown upload {upload_id}")))?;
        self.part_sizes.lock().unwrap().push(bytes.len());
        upload.parts.push((part_number, bytes));
        Ok(UploadedPart {
            part_number,
            e_tag: format!("etag-{part_number}"),
        })
    }

    async fn complete_multipart(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), StorageError> {
        let upload = self
            .uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| StorageError::InvalidResponse(format!("unknown upload {upload_id}")))?;

        let numbers: Vec<i32> = parts.iter().map(|p| p.part_number).collect();
        let expected: Vec<i32> = (1..=upload.parts.len() as i32).collect();
        assert_eq!(numbers, expected, "parts must be numbered 1..=n in order");

        let mut stored = upload.parts;
        stored.sort_by_key(|(n, _)| *n);
        let body: Vec<u8> = stored.into_iter().flat_map(|(_, b)| b).collect();
        self.insert(&upload.bucket, &upload.key, body);
        self.completed_uploads
            .lock()
            .unwrap()
            .push(upload_id.to_string());
        Ok(())
    }

    async fn abort_multipart(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.uploads.lock().unwrap().remove(upload_id);
        self.aborted_uploads
            .lock()
            .unwrap()
            .push(upload_id.to_string());
        Ok(())
    }

    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        Ok(format!(
            "https://storage.test/{bucket}/{key}?expires={}",
            ttl.as_secs()
        ))
    }
}

// ---------------------------------------------------------------------------
// Inference client
// ---------------------------------------------------------------------------

pub fn status_in_queue() -> String {
    r#"{"id":"x","status":"IN_QUEUE"}"#.to_string()
}

pub fn status_in_progress() -> String {
    r#"{"id":"x","status":"IN_PROGRESS","delayTime":120,"workerId":"w-1"}"#.to_string()
}

pub fn status_completed(execution_time_ms: u64) -> String {
    format!(
        r#"{{"id":"x","status":"COMPLETED","delayTime":120,"executionTime":{execution_time_ms},"workerId":"w-1"}}"#
    )
}

pub fn status_completed_without_payload() -> String {
    r#"{"id":"x","status":"COMPLETED"}"#.to_string()
}

pub fn status_failed() -> String {
    r#"{"id":"x","status":"FAILED","error":"worker crashed"}"#.to_string()
}

pub fn status_other(status: &str) -> String {
    format!(r#"{{"id":"x","status":"{status}"}}"#)
}

/// Scripted inference provider.
///
/// Each job reports the status bodies queued for it in order; the last one
/// repeats. Jobs with nothing queued report the default status.
pub struct FakeInferenceClient {
    scripted: Mutex<HashMap<String, VecDeque<String>>>,
    default_status: Mutex<String>,
    poll_errors: Mutex<HashSet<String>>,
    next_job: AtomicUsize,
    /// Remaining successful submits before every submit fails. `None` never fails.
    submits_before_failure: Mutex<Option<usize>>,
    pub submitted: Mutex<Vec<InferenceInput>>,
    pub polls: AtomicUsize,
}

impl Default for FakeInferenceClient {
    fn default() -> Self {
        Self {
            scripted: Mutex::default(),
            default_status: Mutex::new(status_in_progress()),
            poll_errors: Mutex::default(),
            next_job: AtomicUsize::new(1),
            submits_before_failure: Mutex::new(None),
            submitted: Mutex::default(),
            polls: AtomicUsize::new(0),
        }
    }
}

impl FakeInferenceClient {
    pub fn script(&self, job_id: &str, statuses: Vec<String>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(job_id.to_string(), statuses.into());
    }

    pub fn set_default_status(&self, status: String) {
        *self.default_status.lock().unwrap() = status;
    }

    pub fn fail_polls_for(&self, job_id: &str) {
        self.poll_errors.lock().unwrap().insert(job_id.to_string());
    }

    pub fn clear_poll_errors(&self) {
        self.poll_errors.lock().unwrap().clear();
    }

    pub fn fail_submits_after(&self, successes: usize) {
        *self.submits_before_failure.lock().unwrap() = Some(successes);
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl InferenceClient for FakeInferenceClient {
    async fn submit(&self, input: &InferenceInput) -> Result<SubmitResponse, RunPodApiError> {
        {
            let mut remaining = self.submits_before_failure.lock().unwrap();
            if let Some(n) = remaining.as_mut() {
                if *n == 0 {
                    return Err(RunPodApiError::ApiError {
                        status: 500,
                        body: "injected submit failure".into(),
                    });
                }
                *n -= 1;
            }
        }
        self.submitted.lock().unwrap().push(input.clone());
        let n = self.next_job.fetch_add(1, Ordering::SeqCst);
        Ok(SubmitResponse {
            id: format!("job-{n}"),
        })
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatusResponse, RunPodApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.poll_errors.lock().unwrap().contains(job_id) {
            return Err(RunPodApiError::ApiError {
                status: 503,
                body: "injected poll failure".into(),
            });
        }

        let body = {
            let mut scripted = self.scripted.lock().unwrap();
            match scripted.get_mut(job_id) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let body = body.unwrap_or_else(|| self.default_status.lock().unwrap().clone());
        Ok(parse_status(&body)?)
    }
}

// ---------------------------------------------------------------------------
// Group store
// ---------------------------------------------------------------------------

/// In-memory repository with the same selection and link rules as the
/// PostgreSQL one.
#[derive(Default)]
pub struct InMemoryGroupStore {
    groups: Mutex<Vec<ExperimentGroup>>,
    pub fail_inserts: AtomicBool,
    pub fail_updates: AtomicBool,
    pub updates: AtomicUsize,
}

impl InMemoryGroupStore {
    pub fn group(&self, id: GroupId) -> ExperimentGroup {
        self.groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .expect("group should exist")
    }

    pub fn len(&self) -> usize {
        self.groups.lock().unwrap().len()
    }

    pub fn put(&self, group: ExperimentGroup) {
        self.groups.lock().unwrap().push(group);
    }
}

fn injected_db_error(what: &str) -> sqlx::Error {
    sqlx::Error::Protocol(format!("injected {what} failure"))
}

#[async_trait::async_trait]
impl ExperimentGroupStore for InMemoryGroupStore {
    async fn insert(&self, group: &ExperimentGroup) -> Result<GroupId, sqlx::Error> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(injected_db_error("insert"));
        }
        self.put(group.clone());
        Ok(group.id)
    }

    async fn find_by_owner(
        &self,
        owner_id: UserId,
        page: i64,
        page_size: i64,
    ) -> Result<GroupPage, sqlx::Error> {
        let (limit, offset) = page_bounds(page, page_size);
        let mut owned: Vec<ExperimentGroup> = self
            .groups
            .lock()
            .unwrap()
            .iter()
            .filter(|g| g.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = owned.len() as i64;
        let items = owned
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(GroupPage { items, total })
    }

    async fn find_one(
        &self,
        id: GroupId,
        owner_id: Option<UserId>,
    ) -> Result<Option<ExperimentGroup>, sqlx::Error> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .iter()
            .find(|g| g.id == id && owner_id.map_or(true, |o| g.owner_id == o))
            .cloned())
    }

    async fn update_progress(
        &self,
        id: GroupId,
        members: &[SubExperiment],
        download_url: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(injected_db_error("update"));
        }
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        group.members = members.to_vec();
        if group.download_url.as_deref().map_or(true, str::is_empty) {
            if let Some(url) = download_url {
                group.download_url = Some(url.to_string());
            }
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_in_progress(&self) -> Result<Vec<ExperimentGroup>, sqlx::Error> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .iter()
            .filter(|g| g.needs_reconciliation())
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Balance ledger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeLedger {
    balances: Mutex<HashMap<UserId, i64>>,
    charged: Mutex<HashSet<String>>,
    pub fail_charges: AtomicBool,
}

impl FakeLedger {
    pub fn with_balance(owner_id: UserId, tokens: i64) -> Self {
        let ledger = Self::default();
        ledger.balances.lock().unwrap().insert(owner_id, tokens);
        ledger
    }

    pub fn balance(&self, owner_id: UserId) -> i64 {
        self.balances
            .lock()
            .unwrap()
            .get(&owner_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn charge_count(&self) -> usize {
        self.charged.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl BalanceLedger for FakeLedger {
    async fn charge_usage(
        &self,
        owner_id: UserId,
        usage_key: &str,
        tokens: i64,
    ) -> Result<bool, sqlx::Error> {
        if self.fail_charges.load(Ordering::SeqCst) {
            return Err(injected_db_error("charge"));
        }
        if !self.charged.lock().unwrap().insert(usage_key.to_string()) {
            return Ok(false);
        }
        *self.balances.lock().unwrap().entry(owner_id).or_default() -= tokens;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// All fakes plus constructors for the components under test.
pub struct Harness {
    pub objects: Arc<FakeObjectStore>,
    pub inference: Arc<FakeInferenceClient>,
    pub groups: Arc<InMemoryGroupStore>,
    pub ledger: Arc<FakeLedger>,
    pub archive_settings: ArchiveSettings,
    pub usage_cost: UsageCost,
    /// Time budget for starting archive assemblies within one scan.
    pub scan_budget: Duration,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(FakeObjectStore::default()),
            inference: Arc::new(FakeInferenceClient::default()),
            groups: Arc::new(InMemoryGroupStore::default()),
            ledger: Arc::new(FakeLedger::with_balance(OWNER, STARTING_BALANCE)),
            archive_settings: ArchiveSettings::default(),
            usage_cost: UsageCost::default(),
            scan_budget: Duration::from_secs(30),
        }
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::default()
    }

    pub fn job_template(&self) -> JobTemplate {
        JobTemplate::new(INPUT_BUCKET.into(), OUTPUT_BUCKET.into(), self.layout())
    }

    pub fn assembler(&self) -> ArchiveAssembler {
        ArchiveAssembler::new(
            self.objects.clone(),
            OUTPUT_BUCKET.into(),
            self.layout(),
            self.archive_settings.clone(),
        )
    }

    pub fn reconciler(&self) -> ReconciliationLoop {
        ReconciliationLoop::new(
            self.inference.clone(),
            self.groups.clone(),
            self.ledger.clone(),
            self.assembler(),
            self.job_template(),
            self.usage_cost,
            Duration::from_millis(20),
            self.scan_budget,
        )
    }

    pub fn submission(&self, max_upload_bytes: u64) -> SubmissionPath {
        SubmissionPath::new(
            self.objects.clone(),
            self.inference.clone(),
            self.groups.clone(),
            self.job_template(),
            max_upload_bytes,
        )
    }

    pub fn service(&self) -> ExperimentService {
        ExperimentService::new(self.groups.clone())
    }

    /// Store a group of freshly submitted members with job IDs
    /// `job-<file_id>`.
    pub fn seed_group(&self, file_ids: &[&str]) -> ExperimentGroup {
        let members = file_ids
            .iter()
            .map(|id| {
                SubExperiment::submitted(
                    (*id).to_string(),
                    ".tif".into(),
                    format!("job-{id}"),
                    0.325,
                )
            })
            .collect();
        let group = ExperimentGroup::new(OWNER, "plate".into(), members);
        self.groups.put(group.clone());
        group
    }

    /// Store every expected output artifact for `file_id`, skipping `skip`.
    pub fn seed_artifacts(&self, file_id: &str, skip: &[&str]) {
        for artifact in self.layout().expected_artifacts(file_id) {
            if skip.contains(&artifact.key.as_str()) {
                continue;
            }
            let body = format!("{} for {file_id}", artifact.entry_name).into_bytes();
            self.objects.insert(OUTPUT_BUCKET, &artifact.key, body);
        }
    }
}

/// Entry names of a zip archive, sorted.
pub fn archive_entries(bytes: Vec<u8>) -> Vec<String> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

/// Deterministic bytes that deflate cannot shrink much.
pub fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}
