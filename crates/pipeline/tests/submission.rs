mod common;

use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use common::*;
use micrograph_core::error::CoreError;
use micrograph_core::experiment::ExperimentStatus;
use micrograph_core::submission::{UploadFile, DEFAULT_MAX_UPLOAD_BYTES};
use micrograph_pipeline::{NewSubmission, SubmissionError};
use micrograph_runpod::RunPodApiError;
use micrograph_storage::StorageError;

fn request(files: Vec<UploadFile>) -> NewSubmission {
    NewSubmission {
        owner_id: OWNER,
        name: "  Plate 7  ".into(),
        microns_per_pixel: 0.325,
        files,
    }
}

fn two_files() -> Vec<UploadFile> {
    vec![
        UploadFile::new("first.tif", b"tif-bytes".to_vec()),
        UploadFile::new("second.png", b"png-bytes".to_vec()),
    ]
}

#[tokio::test]
async fn submission_uploads_submits_and_persists_in_order() {
    let h = Harness::new();

    let group = h
        .submission(DEFAULT_MAX_UPLOAD_BYTES)
        .submit(request(two_files()))
        .await
        .unwrap();

    assert_eq!(group.name, "Plate 7");
    assert_eq!(group.owner_id, OWNER);
    assert!(group.download_url.is_none());
    assert_eq!(group.members.len(), 2);
    assert_eq!(group.members[0].file_extension, ".tif");
    assert_eq!(group.members[1].file_extension, ".png");
    for member in &group.members {
        assert_eq!(member.status, ExperimentStatus::InProgress);
        assert_eq!(member.retry_count, 0);
        assert_eq!(member.microns_per_pixel, 0.325);
    }

    // Inputs stored under derived keys.
    let first = &group.members[0];
    let key = h.layout().input_key(&first.file_id, &first.file_extension);
    assert_eq!(h.objects.object(INPUT_BUCKET, &key).unwrap(), b"tif-bytes");

    // One job per file, referencing the same keys, in input order.
    let submitted = h.inference.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 2);
    for (member, input) in group.members.iter().zip(&submitted) {
        assert_eq!(*input, h.job_template().for_member(member));
    }
    assert_eq!(group.members[0].external_job_id, "job-1");
    assert_eq!(group.members[1].external_job_id, "job-2");

    assert_eq!(h.groups.group(group.id), group);
}

#[tokio::test]
async fn file_ids_are_unique() {
    let h = Harness::new();
    let files = (0..5)
        .map(|i| UploadFile::new(format!("img{i}.tif"), vec![i]))
        .collect();

    let group = h
        .submission(DEFAULT_MAX_UPLOAD_BYTES)
        .submit(request(files))
        .await
        .unwrap();

    let mut ids: Vec<_> = group.members.iter().map(|m| m.file_id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_upload() {
    let h = Harness::new();
    let submission = h.submission(16);

    let cases = vec![
        request(vec![]),
        request(vec![UploadFile::new("no-extension", vec![1])]),
        request(vec![UploadFile::new("big.tif", vec![0; 17])]),
        NewSubmission {
            name: "   ".into(),
            ..request(two_files())
        },
        NewSubmission {
            microns_per_pixel: 0.0,
            ..request(two_files())
        },
        NewSubmission {
            microns_per_pixel: f64::NAN,
            ..request(two_files())
        },
    ];

    for case in cases {
        let err = submission.submit(case).await.unwrap_err();
        assert_matches!(err, SubmissionError::Invalid(CoreError::Validation(_)));
    }

    assert_eq!(h.objects.put_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.inference.submit_count(), 0);
    assert_eq!(h.groups.len(), 0);
}

#[tokio::test]
async fn upload_failure_persists_nothing_and_submits_nothing() {
    let h = Harness::new();
    h.objects.fail_puts.store(true, Ordering::SeqCst);

    let err = h
        .submission(DEFAULT_MAX_UPLOAD_BYTES)
        .submit(request(two_files()))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        SubmissionError::Upload {
            source: StorageError::Request { .. },
            ..
        }
    );
    assert_eq!(h.inference.submit_count(), 0);
    assert_eq!(h.groups.len(), 0);
}

#[tokio::test]
async fn submit_failure_persists_nothing() {
    let h = Harness::new();
    h.inference.fail_submits_after(1);

    let err = h
        .submission(DEFAULT_MAX_UPLOAD_BYTES)
        .submit(request(two_files()))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        SubmissionError::Submit {
            source: RunPodApiError::ApiError { status: 500, .. },
            ..
        }
    );
    assert_eq!(h.groups.len(), 0);
}

#[tokio::test]
async fn repository_failure_is_surfaced() {
    let h = Harness::new();
    h.groups.fail_inserts.store(true, Ordering::SeqCst);

    let err = h
        .submission(DEFAULT_MAX_UPLOAD_BYTES)
        .submit(request(two_files()))
        .await
        .unwrap_err();

    assert_matches!(err, SubmissionError::Persist(_));
    assert_eq!(h.groups.len(), 0);
}

#[tokio::test]
async fn submitted_group_is_picked_up_by_reconciliation() {
    let h = Harness::new();
    let group = h
        .submission(DEFAULT_MAX_UPLOAD_BYTES)
        .submit(request(two_files()))
        .await
        .unwrap();
    h.inference.set_default_status(status_completed(30_000));
    for member in &group.members {
        h.seed_artifacts(&member.file_id, &[]);
    }

    let summary = h.reconciler().reconcile_once().await;

    assert_eq!(summary.completed, 2);
    assert!(h.groups.group(group.id).download_url.is_some());
}
