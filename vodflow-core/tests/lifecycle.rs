use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use vodflow_core::{
    ArtifactClassifier, ConsoleLinks, EncoderClient, EncoderError, EncoderResult, JobLifecycle,
    JobRecord, JobRequest, JobStore, LedgerError, LedgerResult, LifecycleError, LifecycleOutcome,
    ManifestLedger, MemoryObjectStore, Notification, NotificationPublisher, Notifier,
    NotifyError, NotifyResult, ObjectLocation, OutputGroupKind, StorageError,
};

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingPublisher {
    fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn publish(&self, _topic: &str, notification: &Notification) -> NotifyResult<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct FailingPublisher;

#[async_trait]
impl NotificationPublisher for FailingPublisher {
    async fn publish(&self, _topic: &str, _notification: &Notification) -> NotifyResult<()> {
        Err(NotifyError::Unavailable("topic deleted".into()))
    }
}

struct StaticEncoder {
    job: Value,
    lookups: Mutex<Vec<String>>,
}

impl StaticEncoder {
    fn new(job: Value) -> Self {
        Self {
            job,
            lookups: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EncoderClient for StaticEncoder {
    async fn get_job(&self, job_id: &str) -> EncoderResult<Value> {
        self.lookups.lock().unwrap().push(job_id.to_string());
        Ok(self.job.clone())
    }

    async fn create_job(&self, _request: &JobRequest) -> EncoderResult<String> {
        Err(EncoderError::InvalidResponse("not used".into()))
    }
}

struct BrokenLedger;

#[async_trait]
impl JobStore for BrokenLedger {
    async fn get(&self, _id: &str) -> LedgerResult<Option<JobRecord>> {
        Ok(None)
    }

    async fn upsert(&self, patch: JobRecord) -> LedgerResult<JobRecord> {
        let source = LedgerError::Write {
            location: "s3://vod-source/jobs-manifest.json".into(),
            source: StorageError::Unavailable("bucket is read-only".into()),
        };
        Err(LedgerError::update(patch, source))
    }

    async fn list(&self) -> LedgerResult<Vec<JobRecord>> {
        Ok(Vec::new())
    }
}

struct Harness {
    lifecycle: JobLifecycle,
    ledger: Arc<ManifestLedger>,
    objects: Arc<MemoryObjectStore>,
    publisher: Arc<RecordingPublisher>,
    encoder: Arc<StaticEncoder>,
}

fn manifest_location() -> ObjectLocation {
    ObjectLocation::new("vod-source", "jobs-manifest.json")
}

fn harness() -> Harness {
    let objects = Arc::new(MemoryObjectStore::new());
    let ledger = Arc::new(ManifestLedger::new(objects.clone(), manifest_location()));
    let publisher = Arc::new(RecordingPublisher::default());
    let encoder = Arc::new(StaticEncoder::new(json!({
        "Id": "abc",
        "Status": "COMPLETE",
        "Settings": { "OutputGroups": [] }
    })));
    let notifier = Notifier::new(publisher.clone(), "vod-status", ConsoleLinks::new("ap-south-1"));
    let lifecycle = JobLifecycle::new(
        ledger.clone(),
        encoder.clone(),
        notifier,
        ArtifactClassifier::new("d1example.cloudfront.net"),
    );
    Harness {
        lifecycle,
        ledger,
        objects,
        publisher,
        encoder,
    }
}

fn complete_event() -> Value {
    json!({
        "detail-type": "MediaConvert Job State Change",
        "detail": {
            "status": "COMPLETE",
            "jobId": "abc",
            "outputGroupDetails": [
                {
                    "type": "HLS_GROUP",
                    "playlistFilePaths": ["s3://vod-destination/guid/AppleHLS1/clip.m3u8"],
                    "outputDetails": [{
                        "outputFilePaths": ["s3://vod-destination/guid/AppleHLS1/clip_1080.m3u8"],
                        "durationInMs": 30000
                    }]
                },
                {
                    "type": "FILE_GROUP",
                    "outputDetails": [{
                        "outputFilePaths": ["s3://vod-destination/guid/ThumbNails/clip.0000000.jpg"]
                    }]
                }
            ]
        }
    })
}

#[tokio::test]
async fn input_information_is_recorded_without_notice() {
    let h = harness();
    let event = json!({
        "detail": {
            "status": "INPUT_INFORMATION",
            "jobId": "abc",
            "inputDetails": [{ "id": 1, "uri": "s3://vod-source/shows/clip.mp4" }]
        }
    });

    let outcome = h.lifecycle.handle(&event).await.unwrap();
    let LifecycleOutcome::InputRecorded(record) = outcome else {
        panic!("unexpected lifecycle outcome");
    };
    assert_eq!(record.input_file.as_deref(), Some("s3://vod-source/shows/clip.mp4"));
    assert!(h.publisher.sent().is_empty());
    assert_eq!(h.ledger.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn complete_splits_thumbnails_from_files() {
    let h = harness();
    let outcome = h.lifecycle.handle(&complete_event()).await.unwrap();
    let LifecycleOutcome::Completed(record) = outcome else {
        panic!("unexpected lifecycle outcome");
    };

    let outputs = record.outputs.as_ref().unwrap();
    assert_eq!(
        outputs.get(OutputGroupKind::Hls).unwrap(),
        ["https://d1example.cloudfront.net/guid/AppleHLS1/clip.m3u8".to_string()]
    );
    assert_eq!(
        outputs.get(OutputGroupKind::Thumbnails).unwrap(),
        ["https://d1example.cloudfront.net/guid/ThumbNails/clip.0000000.jpg".to_string()]
    );
    assert!(!outputs.contains(OutputGroupKind::File));
    assert_eq!(record.job.as_ref().unwrap()["Id"], json!("abc"));
    assert_eq!(*h.encoder.lookups.lock().unwrap(), vec!["abc".to_string()]);

    let stored = h.ledger.get("abc").await.unwrap().unwrap();
    assert_eq!(stored, record);

    let sent = h.publisher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Job COMPLETE id:abc");
    let body: Value = serde_json::from_str(&sent[0].message).unwrap();
    assert!(body["Outputs"].get("FILE_GROUP").is_none());
}

#[tokio::test]
async fn complete_after_input_keeps_input_fields() {
    let h = harness();
    let input = json!({
        "status": "SUBMITTED_INPUT_INFO",
        "jobId": "abc",
        "inputDetails": [{ "uri": "s3://vod-source/shows/clip.mp4" }]
    });
    h.lifecycle.handle(&input).await.unwrap();
    h.lifecycle.handle(&complete_event()).await.unwrap();

    let jobs = h.ledger.list().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].input_file.as_deref(), Some("s3://vod-source/shows/clip.mp4"));
    assert!(jobs[0].outputs.is_some());
}

#[tokio::test]
async fn canceled_leaves_ledger_untouched() {
    let h = harness();
    h.lifecycle
        .handle(&json!({ "detail": { "status": "INPUT_INFORMATION", "jobId": "seed",
            "inputDetails": [{ "uri": "s3://vod-source/seed.mp4" }] } }))
        .await
        .unwrap();
    let before = h.objects.snapshot(&manifest_location());

    let event = json!({ "detail": { "status": "CANCELED", "jobId": "abc" } });
    let outcome = h.lifecycle.handle(&event).await.unwrap();
    assert_eq!(outcome, LifecycleOutcome::Canceled { job_id: "abc".into() });

    assert_eq!(h.objects.snapshot(&manifest_location()), before);
    let sent = h.publisher.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("CANCELED"));
    assert!(sent[0].subject.contains("abc"));
}

#[tokio::test]
async fn error_event_is_forwarded() {
    let h = harness();
    let event = json!({ "status": "ERROR", "jobId": "abc", "errorMessage": "bad input" });
    h.lifecycle.handle(&event).await.unwrap();
    let sent = h.publisher.sent();
    assert_eq!(sent.len(), 1);
    let body: Value = serde_json::from_str(&sent[0].message).unwrap();
    assert_eq!(body["ErrorMsg"]["errorMessage"], json!("bad input"));
    assert!(h.ledger.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn ledger_failure_sends_one_processing_error() {
    let publisher = Arc::new(RecordingPublisher::default());
    let notifier = Notifier::new(publisher.clone(), "vod-status", ConsoleLinks::new("ap-south-1"));
    let lifecycle = JobLifecycle::new(
        Arc::new(BrokenLedger),
        Arc::new(StaticEncoder::new(json!({ "Id": "abc" }))),
        notifier,
        ArtifactClassifier::new("d1example.cloudfront.net"),
    );

    let err = lifecycle.handle(&complete_event()).await.unwrap_err();
    let LifecycleError::Ledger(ledger_err) = &err else {
        panic!("expected a ledger error");
    };
    assert_eq!(ledger_err.payload().map(|record| record.id.as_str()), Some("abc"));

    let sent = publisher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Job PROCESSING ERROR id:abc");
    let body: Value = serde_json::from_str(&sent[0].message).unwrap();
    assert!(body["Error"].as_str().unwrap().contains("bucket is read-only"));
    assert_eq!(body["Job"], complete_event());
}

#[tokio::test]
async fn unknown_status_fails_and_reports() {
    let h = harness();
    let event = json!({ "detail": { "status": "PROGRESSING", "jobId": "abc" } });
    let err = h.lifecycle.handle(&event).await.unwrap_err();
    assert!(matches!(err, LifecycleError::UnknownStatus { .. }));
    let sent = h.publisher.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("PROCESSING ERROR"));
}

#[tokio::test]
async fn failed_canceled_notice_is_the_handler_error() {
    let objects = Arc::new(MemoryObjectStore::new());
    let ledger = Arc::new(ManifestLedger::new(objects, manifest_location()));
    let lifecycle = JobLifecycle::new(
        ledger,
        Arc::new(StaticEncoder::new(json!({ "Id": "abc" }))),
        Notifier::new(Arc::new(FailingPublisher), "vod-status", ConsoleLinks::new("ap-south-1")),
        ArtifactClassifier::new("d1example.cloudfront.net"),
    );

    let err = lifecycle
        .handle(&json!({ "status": "CANCELED", "jobId": "abc" }))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Notify(NotifyError::Unavailable(_))));
}

#[tokio::test]
async fn failed_processing_error_notice_keeps_ledger_error() {
    let lifecycle = JobLifecycle::new(
        Arc::new(BrokenLedger),
        Arc::new(StaticEncoder::new(json!({ "Id": "abc" }))),
        Notifier::new(Arc::new(FailingPublisher), "vod-status", ConsoleLinks::new("ap-south-1")),
        ArtifactClassifier::new("d1example.cloudfront.net"),
    );

    let err = lifecycle.handle(&complete_event()).await.unwrap_err();
    let LifecycleError::Ledger(ledger_err) = &err else {
        panic!("expected the ledger error, got {err:?}");
    };
    assert_eq!(ledger_err.payload().map(|record| record.id.as_str()), Some("abc"));
}

#[tokio::test]
async fn error_event_with_null_outputs_is_forwarded() {
    let h = harness();
    let event = json!({ "status": "ERROR", "jobId": "abc", "outputGroupDetails": null });
    let outcome = h.lifecycle.handle(&event).await.unwrap();
    assert_eq!(outcome, LifecycleOutcome::Failed { job_id: "abc".into() });

    let sent = h.publisher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Job ERROR id:abc");
}

#[tokio::test]
async fn complete_stores_output_details_as_received() {
    let h = harness();
    let mut event = complete_event();
    event["detail"]["outputGroupDetails"][0]["vendorField"] = json!(7);
    event["detail"]["outputGroupDetails"][0]["outputDetails"][0]["audioDetails"] =
        json!({ "x": 1 });
    event["detail"]["outputGroupDetails"][1]["outputDetails"][0]["videoDetails"] = json!([]);

    h.lifecycle.handle(&event).await.unwrap();

    let stored = h.ledger.get("abc").await.unwrap().unwrap();
    assert_eq!(
        stored.output_group_details.as_ref(),
        Some(&event["detail"]["outputGroupDetails"])
    );
    let raw: Value =
        serde_json::from_slice(&h.objects.snapshot(&manifest_location()).unwrap()).unwrap();
    let groups = &raw["Jobs"][0]["OutputGroupDetails"];
    assert_eq!(groups[0]["vendorField"], json!(7));
    assert_eq!(groups[0]["outputDetails"][0]["audioDetails"], json!({ "x": 1 }));
    assert_eq!(groups[1]["outputDetails"][0]["videoDetails"], json!([]));
}
