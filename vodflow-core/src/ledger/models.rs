use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Semantic output buckets of a finished job, keyed the way the ledger stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OutputGroupKind {
    #[serde(rename = "HLS_GROUP")]
    Hls,
    #[serde(rename = "DASH_ISO_GROUP")]
    DashIso,
    #[serde(rename = "CMAF_GROUP")]
    Cmaf,
    #[serde(rename = "MS_SMOOTH_GROUP")]
    MsSmooth,
    #[serde(rename = "FILE_GROUP")]
    File,
    #[serde(rename = "THUMB_NAILS")]
    Thumbnails,
}

impl OutputGroupKind {
    pub const ALL: [OutputGroupKind; 6] = [
        OutputGroupKind::Hls,
        OutputGroupKind::DashIso,
        OutputGroupKind::Cmaf,
        OutputGroupKind::MsSmooth,
        OutputGroupKind::File,
        OutputGroupKind::Thumbnails,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputGroupKind::Hls => "HLS_GROUP",
            OutputGroupKind::DashIso => "DASH_ISO_GROUP",
            OutputGroupKind::Cmaf => "CMAF_GROUP",
            OutputGroupKind::MsSmooth => "MS_SMOOTH_GROUP",
            OutputGroupKind::File => "FILE_GROUP",
            OutputGroupKind::Thumbnails => "THUMB_NAILS",
        }
    }
}

impl fmt::Display for OutputGroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputGroupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutputGroupKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown output group kind: {s}"))
    }
}

/// Public URLs per output bucket. Buckets without URLs are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobOutputs(BTreeMap<OutputGroupKind, Vec<String>>);

impl JobOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: OutputGroupKind, url: impl Into<String>) {
        self.0.entry(kind).or_default().push(url.into());
    }

    pub fn get(&self, kind: OutputGroupKind) -> Option<&[String]> {
        self.0.get(&kind).map(Vec::as_slice)
    }

    pub fn contains(&self, kind: OutputGroupKind) -> bool {
        self.0.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = OutputGroupKind> + '_ {
        self.0.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn url_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

impl FromIterator<(OutputGroupKind, String)> for JobOutputs {
    fn from_iter<I: IntoIterator<Item = (OutputGroupKind, String)>>(iter: I) -> Self {
        let mut outputs = JobOutputs::new();
        for (kind, url) in iter {
            outputs.push(kind, url);
        }
        outputs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    InputKnown,
    Complete,
    Canceled,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::InputKnown => "INPUT_KNOWN",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Canceled => "CANCELED",
            JobStatus::Error => "ERROR",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Canceled | JobStatus::Error
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger entry. Doubles as the partial update passed to `JobStore::upsert`:
/// `None` fields in a patch leave the stored value untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<JobOutputs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_group_details: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input_file: None,
            input_details: None,
            outputs: None,
            job: None,
            output_group_details: None,
            extra: Map::new(),
        }
    }

    /// Overlays every field present in `patch`; the id never changes.
    pub fn merge(&mut self, patch: JobRecord) {
        let JobRecord {
            id: _,
            input_file,
            input_details,
            outputs,
            job,
            output_group_details,
            extra,
        } = patch;
        if input_file.is_some() {
            self.input_file = input_file;
        }
        if input_details.is_some() {
            self.input_details = input_details;
        }
        if outputs.is_some() {
            self.outputs = outputs;
        }
        if job.is_some() {
            self.job = job;
        }
        if output_group_details.is_some() {
            self.output_group_details = output_group_details;
        }
        self.extra.extend(extra);
    }

    /// Shape of a record stored for the first time: a job first seen through
    /// its completion has no input details yet, so an empty placeholder is kept.
    pub fn into_new_record(mut self) -> JobRecord {
        if self.input_details.is_none() {
            self.input_details = Some(Value::Object(Map::new()));
        }
        self
    }

    pub fn status(&self) -> JobStatus {
        if self.outputs.is_some() {
            return JobStatus::Complete;
        }
        match &self.input_details {
            Some(Value::Object(map)) if map.is_empty() => JobStatus::Submitted,
            Some(Value::Null) | None => JobStatus::Submitted,
            Some(_) => JobStatus::InputKnown,
        }
    }
}

/// The whole ledger blob: `{ "Jobs": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Manifest {
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    pub fn find(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Merges `patch` into the record with the same id or appends it.
    pub fn upsert(&mut self, patch: JobRecord) -> JobRecord {
        match self.jobs.iter_mut().find(|job| job.id == patch.id) {
            Some(existing) => {
                existing.merge(patch);
                existing.clone()
            }
            None => {
                let record = patch.into_new_record();
                self.jobs.push(record.clone());
                record
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_with_input(id: &str) -> JobRecord {
        let mut record = JobRecord::new(id);
        record.input_file = Some(format!("s3://src/{id}.mp4"));
        record.input_details = Some(json!({
            "uri": format!("s3://src/{id}.mp4"),
            "durationInMs": 1000
        }));
        record
    }

    #[test]
    fn merge_overlays_present_fields_only() {
        let mut stored = record_with_input("abc");
        stored.extra.insert("Owner".into(), json!("ops"));

        let mut patch = JobRecord::new("abc");
        patch.outputs = Some(
            [(OutputGroupKind::Hls, "https://cdn/abc/index.m3u8".to_string())]
                .into_iter()
                .collect(),
        );
        patch.extra.insert("Priority".into(), json!(2));

        let before = stored.clone();
        stored.merge(patch.clone());

        assert_eq!(stored.input_file, before.input_file);
        assert_eq!(stored.input_details, before.input_details);
        assert_eq!(stored.outputs, patch.outputs);
        assert_eq!(stored.extra.get("Owner"), Some(&json!("ops")));
        assert_eq!(stored.extra.get("Priority"), Some(&json!(2)));
    }

    #[test]
    fn status_follows_field_presence() {
        let mut record = JobRecord::new("x");
        assert_eq!(record.status(), JobStatus::Submitted);
        record.input_details = Some(json!({}));
        assert_eq!(record.status(), JobStatus::Submitted);
        record.input_details = Some(json!({ "uri": "s3://src/x.mp4" }));
        assert_eq!(record.status(), JobStatus::InputKnown);
        record.outputs = Some(JobOutputs::new());
        assert_eq!(record.status(), JobStatus::Complete);
        assert!(record.status().terminal());
    }

    #[test]
    fn manifest_upsert_appends_with_placeholder_and_keeps_ids_unique() {
        let mut manifest = Manifest::default();
        let created = manifest.upsert(JobRecord::new("new-job"));
        assert_eq!(created.input_details, Some(json!({})));

        manifest.upsert(record_with_input("new-job"));
        assert_eq!(manifest.jobs.len(), 1);
        assert_eq!(manifest.jobs[0].status(), JobStatus::InputKnown);
    }

    #[test]
    fn ledger_blob_uses_pascal_case_and_keeps_unknown_keys() {
        let raw = json!({
            "Jobs": [{
                "Id": "abc",
                "InputFile": "s3://src/a.mp4",
                "Outputs": {
                    "THUMB_NAILS": ["https://cdn/a.jpg"],
                    "HLS_GROUP": ["https://cdn/a.m3u8"]
                },
                "Reviewed": true
            }],
            "Version": 3
        });
        let manifest: Manifest = serde_json::from_value(raw).unwrap();
        let record = manifest.find("abc").unwrap();
        assert!(record.extra.contains_key("Reviewed"));
        let outputs = record.outputs.as_ref().unwrap();
        assert_eq!(
            outputs.kinds().collect::<Vec<_>>(),
            vec![OutputGroupKind::Hls, OutputGroupKind::Thumbnails]
        );

        let encoded = serde_json::to_value(&manifest).unwrap();
        assert_eq!(encoded["Version"], json!(3));
        assert_eq!(encoded["Jobs"][0]["Reviewed"], json!(true));
        assert!(encoded["Jobs"][0].get("InputDetails").is_none());
    }

    #[test]
    fn kind_parses_only_recognized_tags() {
        assert_eq!("CMAF_GROUP".parse::<OutputGroupKind>(), Ok(OutputGroupKind::Cmaf));
        assert!("SPEKE_GROUP".parse::<OutputGroupKind>().is_err());
    }
}
