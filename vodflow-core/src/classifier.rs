use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ledger::{JobOutputs, OutputGroupKind};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("unrecognized output group type {kind:?}")]
    UnknownGroupKind { kind: String },
    #[error("{kind} output group has no playlist path")]
    MissingPlaylist { kind: OutputGroupKind },
    #[error("{kind} output #{index} has no file path")]
    MissingFilePath { kind: OutputGroupKind, index: usize },
    #[error("cannot derive a public url from storage path {path:?}")]
    MalformedPath { path: String },
}

pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Raw output group as reported by the encoder's completion event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputGroupDetail {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub playlist_file_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_details: Vec<OutputDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDetail {
    #[serde(default)]
    pub output_file_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_in_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_details: Option<Value>,
}

/// Sorts encoder artifacts into output buckets and rewrites their storage
/// paths to public URLs.
#[derive(Debug, Clone)]
pub struct ArtifactClassifier {
    public_base: String,
}

impl ArtifactClassifier {
    pub fn new(public_base_url: impl AsRef<str>) -> Self {
        let base = public_base_url.as_ref().trim().trim_end_matches('/');
        let public_base = if base.contains("://") {
            base.to_string()
        } else {
            format!("https://{base}")
        };
        Self { public_base }
    }

    pub fn public_base(&self) -> &str {
        &self.public_base
    }

    /// `s3://bucket/a/b.m3u8` becomes `<public base>/a/b.m3u8`.
    pub fn public_url(&self, storage_path: &str) -> ClassifyResult<String> {
        let malformed = || ClassifyError::MalformedPath {
            path: storage_path.to_string(),
        };
        let (_, rest) = storage_path.split_once("://").ok_or_else(malformed)?;
        let (_, key) = rest.split_once('/').ok_or_else(malformed)?;
        if key.is_empty() {
            return Err(malformed());
        }
        Ok(format!("{}/{}", self.public_base, key))
    }

    pub fn classify(
        &self,
        detail: &OutputGroupDetail,
    ) -> ClassifyResult<Vec<(OutputGroupKind, String)>> {
        let kind: OutputGroupKind =
            detail
                .kind
                .parse()
                .map_err(|_| ClassifyError::UnknownGroupKind {
                    kind: detail.kind.clone(),
                })?;

        match kind {
            OutputGroupKind::Hls
            | OutputGroupKind::DashIso
            | OutputGroupKind::Cmaf
            | OutputGroupKind::MsSmooth => {
                let playlist = detail
                    .playlist_file_paths
                    .first()
                    .ok_or(ClassifyError::MissingPlaylist { kind })?;
                Ok(vec![(kind, self.public_url(playlist)?)])
            }
            OutputGroupKind::File => detail
                .output_details
                .iter()
                .enumerate()
                .map(|(index, output)| -> ClassifyResult<(OutputGroupKind, String)> {
                    let path = output
                        .output_file_paths
                        .first()
                        .ok_or(ClassifyError::MissingFilePath { kind, index })?;
                    let bucket = if is_image(path) {
                        OutputGroupKind::Thumbnails
                    } else {
                        OutputGroupKind::File
                    };
                    Ok((bucket, self.public_url(path)?))
                })
                .collect(),
            OutputGroupKind::Thumbnails => detail
                .output_details
                .iter()
                .flat_map(|output| output.output_file_paths.iter())
                .map(|path| -> ClassifyResult<(OutputGroupKind, String)> {
                    Ok((OutputGroupKind::Thumbnails, self.public_url(path)?))
                })
                .collect(),
        }
    }

    pub fn classify_all(&self, details: &[OutputGroupDetail]) -> ClassifyResult<JobOutputs> {
        let mut outputs = JobOutputs::new();
        for detail in details {
            for (kind, url) in self.classify(detail)? {
                outputs.push(kind, url);
            }
        }
        Ok(outputs)
    }
}

fn is_image(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|image| ext.eq_ignore_ascii_case(image))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ArtifactClassifier {
        ArtifactClassifier::new("d1example.cloudfront.net")
    }

    fn file_group(paths: &[&str]) -> OutputGroupDetail {
        OutputGroupDetail {
            kind: "FILE_GROUP".into(),
            playlist_file_paths: Vec::new(),
            output_details: paths
                .iter()
                .map(|path| OutputDetail {
                    output_file_paths: vec![path.to_string()],
                    duration_in_ms: None,
                    video_details: None,
                })
                .collect(),
        }
    }

    #[test]
    fn public_url_strips_scheme_and_bucket() {
        let url = classifier()
            .public_url("s3://vod-destination/guid/AppleHLS1/clip.m3u8")
            .unwrap();
        assert_eq!(
            url,
            "https://d1example.cloudfront.net/guid/AppleHLS1/clip.m3u8"
        );
        assert!(classifier().public_url("vod-destination/clip.m3u8").is_err());
        assert!(classifier().public_url("s3://bucket-only").is_err());
    }

    #[test]
    fn base_with_scheme_is_kept() {
        let classifier = ArtifactClassifier::new("http://localhost:8080/media/");
        assert_eq!(classifier.public_base(), "http://localhost:8080/media");
    }

    #[test]
    fn streaming_group_yields_one_playlist_url() {
        let detail = OutputGroupDetail {
            kind: "DASH_ISO_GROUP".into(),
            playlist_file_paths: vec![
                "s3://dst/g/Dash1/clip.mpd".into(),
                "s3://dst/g/Dash1/other.mpd".into(),
            ],
            output_details: Vec::new(),
        };
        let pairs = classifier().classify(&detail).unwrap();
        assert_eq!(
            pairs,
            vec![(
                OutputGroupKind::DashIso,
                "https://d1example.cloudfront.net/g/Dash1/clip.mpd".to_string()
            )]
        );
    }

    #[test]
    fn streaming_group_without_playlist_fails() {
        let detail = OutputGroupDetail {
            kind: "HLS_GROUP".into(),
            playlist_file_paths: Vec::new(),
            output_details: Vec::new(),
        };
        assert!(matches!(
            classifier().classify(&detail),
            Err(ClassifyError::MissingPlaylist { .. })
        ));
    }

    #[test]
    fn images_in_file_groups_become_thumbnails() {
        let detail = file_group(&[
            "s3://dst/g/File1/clip.mp4",
            "s3://dst/g/File1/clip.0000000.jpg",
            "s3://dst/g/File1/poster.JPG",
            "s3://dst/g/File1/clip_audio.m4a",
        ]);
        let outputs = classifier().classify_all(&[detail]).unwrap();
        assert_eq!(outputs.get(OutputGroupKind::File).map(<[String]>::len), Some(2));
        assert_eq!(
            outputs.get(OutputGroupKind::Thumbnails).map(<[String]>::len),
            Some(2)
        );
        for url in outputs.get(OutputGroupKind::File).unwrap() {
            assert!(!url.ends_with(".jpg"));
        }
    }

    #[test]
    fn thumbnail_only_group_leaves_no_file_bucket() {
        let detail = file_group(&["s3://dst/g/Thumbs/clip.0000000.jpg"]);
        let outputs = classifier().classify_all(&[detail]).unwrap();
        assert!(!outputs.contains(OutputGroupKind::File));
        assert!(outputs.contains(OutputGroupKind::Thumbnails));
    }

    #[test]
    fn unknown_kind_fails_loudly() {
        let detail = OutputGroupDetail {
            kind: "RTMP_GROUP".into(),
            playlist_file_paths: vec!["s3://dst/x".into()],
            output_details: Vec::new(),
        };
        let err = classifier().classify_all(&[detail]).unwrap_err();
        assert!(err.to_string().contains("RTMP_GROUP"));
    }

    #[test]
    fn file_output_without_paths_fails() {
        let mut detail = file_group(&[]);
        detail.output_details.push(OutputDetail {
            output_file_paths: Vec::new(),
            duration_in_ms: Some(1000),
            video_details: None,
        });
        assert!(matches!(
            classifier().classify(&detail),
            Err(ClassifyError::MissingFilePath { index: 0, .. })
        ));
    }

    #[test]
    fn event_payload_deserializes() {
        let raw = serde_json::json!({
            "type": "FILE_GROUP",
            "outputDetails": [{
                "outputFilePaths": ["s3://dst/g/File1/clip.mp4"],
                "durationInMs": 30000,
                "videoDetails": { "widthInPx": 1280, "heightInPx": 720 }
            }]
        });
        let detail: OutputGroupDetail = serde_json::from_value(raw).unwrap();
        assert_eq!(detail.output_details[0].duration_in_ms, Some(30000));
        assert!(detail.playlist_file_paths.is_empty());
    }
}
