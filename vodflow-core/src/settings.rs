use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_ACCELERATION_MODE: &str = "PREFERRED";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("job settings are not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("job settings must be a JSON object")]
    NotAnObject,
    #[error("job settings are missing the top-level \"Settings\" object")]
    MissingSettings,
    #[error("job settings declare {count} inputs, at most one is allowed")]
    TooManyInputs { count: usize },
    #[error("output group #{index} has no OutputGroupSettings.Type")]
    MissingGroupType { index: usize },
    #[error("output group #{index} ({name}) has unrecognized type {kind:?}")]
    UnknownGroupType {
        index: usize,
        name: String,
        kind: String,
    },
    #[error("output group #{index} has an invalid Name or CustomName")]
    InvalidGroupName { index: usize },
    #[error("{field} must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Output group types accepted in a job template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupType {
    File,
    Hls,
    DashIso,
    MsSmooth,
    Cmaf,
}

impl GroupType {
    pub const ALL: [GroupType; 5] = [
        GroupType::File,
        GroupType::Hls,
        GroupType::DashIso,
        GroupType::MsSmooth,
        GroupType::Cmaf,
    ];

    pub fn type_tag(&self) -> &'static str {
        match self {
            GroupType::File => "FILE_GROUP_SETTINGS",
            GroupType::Hls => "HLS_GROUP_SETTINGS",
            GroupType::DashIso => "DASH_ISO_GROUP_SETTINGS",
            GroupType::MsSmooth => "MS_SMOOTH_GROUP_SETTINGS",
            GroupType::Cmaf => "CMAF_GROUP_SETTINGS",
        }
    }

    /// Key of the type-specific settings object holding `Destination`.
    pub fn settings_key(&self) -> &'static str {
        match self {
            GroupType::File => "FileGroupSettings",
            GroupType::Hls => "HlsGroupSettings",
            GroupType::DashIso => "DashIsoGroupSettings",
            GroupType::MsSmooth => "MsSmoothGroupSettings",
            GroupType::Cmaf => "CmafGroupSettings",
        }
    }

    pub fn default_name(&self) -> &'static str {
        match self {
            GroupType::File => "File",
            GroupType::Hls => "Hls",
            GroupType::DashIso => "DashIso",
            GroupType::MsSmooth => "MsSmooth",
            GroupType::Cmaf => "Cmaf",
        }
    }

    pub fn from_type_tag(tag: &str) -> Option<Self> {
        GroupType::ALL
            .into_iter()
            .find(|group| group.type_tag() == tag)
    }
}

/// Per-type destination counters, 1-based, in template order.
#[derive(Debug, Default)]
pub struct KindCounters(HashMap<GroupType, u32>);

impl KindCounters {
    pub fn next(&mut self, group: GroupType) -> u32 {
        let counter = self.0.entry(group).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// A validated job template. Unknown encoder settings are carried verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    document: Value,
}

impl JobTemplate {
    pub fn from_slice(bytes: &[u8]) -> SettingsResult<Self> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }

    pub fn from_value(document: Value) -> SettingsResult<Self> {
        validate(&document)?;
        Ok(Self { document })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }
}

fn validate(document: &Value) -> SettingsResult<Vec<GroupType>> {
    let root = document.as_object().ok_or(SettingsError::NotAnObject)?;
    let settings = root
        .get("Settings")
        .and_then(Value::as_object)
        .ok_or(SettingsError::MissingSettings)?;

    match settings.get("Inputs") {
        None | Some(Value::Null) => {}
        Some(Value::Array(inputs)) if inputs.len() > 1 => {
            return Err(SettingsError::TooManyInputs {
                count: inputs.len(),
            })
        }
        Some(Value::Array(inputs)) => {
            if inputs.iter().any(|input| !input.is_object()) {
                return Err(SettingsError::InvalidField {
                    field: "Settings.Inputs[0]",
                    expected: "an object",
                });
            }
        }
        Some(_) => {
            return Err(SettingsError::InvalidField {
                field: "Settings.Inputs",
                expected: "an array",
            })
        }
    }

    match root.get("UserMetadata") {
        None | Some(Value::Null) | Some(Value::Object(_)) => {}
        Some(_) => {
            return Err(SettingsError::InvalidField {
                field: "UserMetadata",
                expected: "an object",
            })
        }
    }

    let groups = match settings.get("OutputGroups") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(groups)) => groups,
        Some(_) => {
            return Err(SettingsError::InvalidField {
                field: "Settings.OutputGroups",
                expected: "an array",
            })
        }
    };

    groups
        .iter()
        .enumerate()
        .map(|(index, group)| validate_group(index, group))
        .collect()
}

fn validate_group(index: usize, group: &Value) -> SettingsResult<GroupType> {
    let name_ok = |key: &str| {
        matches!(group.get(key), None | Some(Value::Null) | Some(Value::String(_)))
    };
    if !group.is_object() || !name_ok("Name") || !name_ok("CustomName") {
        return Err(SettingsError::InvalidGroupName { index });
    }
    let group_settings = group.get("OutputGroupSettings");
    let tag = group_settings
        .and_then(|settings| settings.get("Type"))
        .and_then(Value::as_str)
        .ok_or(SettingsError::MissingGroupType { index })?;
    let group_type =
        GroupType::from_type_tag(tag).ok_or_else(|| SettingsError::UnknownGroupType {
            index,
            name: display_name(group),
            kind: tag.to_string(),
        })?;
    match group_settings.and_then(|settings| settings.get(group_type.settings_key())) {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(group_type),
        Some(_) => Err(SettingsError::InvalidField {
            field: "OutputGroupSettings.<Type>Settings",
            expected: "an object",
        }),
    }
}

fn display_name(group: &Value) -> String {
    ["CustomName", "Name"]
        .iter()
        .find_map(|key| group.get(*key).and_then(Value::as_str))
        .unwrap_or("unnamed")
        .to_string()
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|ch| !ch.is_whitespace()).collect()
}

/// The job request handed to the encoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JobRequest {
    document: Value,
}

impl JobRequest {
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_value(self) -> Value {
        self.document
    }

    pub fn input_paths(&self) -> Vec<&str> {
        self.document
            .pointer("/Settings/Inputs")
            .and_then(Value::as_array)
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(|input| input.get("FileInput").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn destinations(&self) -> Vec<&str> {
        let Some(groups) = self
            .document
            .pointer("/Settings/OutputGroups")
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };
        groups
            .iter()
            .filter_map(|group| {
                let settings = group.get("OutputGroupSettings")?;
                let group_type = GroupType::from_type_tag(settings.get("Type")?.as_str()?)?;
                settings
                    .get(group_type.settings_key())?
                    .get("Destination")?
                    .as_str()
            })
            .collect()
    }

    pub fn role(&self) -> Option<&str> {
        self.document.get("Role").and_then(Value::as_str)
    }

    pub fn queue(&self) -> Option<&str> {
        self.document.get("Queue").and_then(Value::as_str)
    }

    pub fn user_metadata(&self, key: &str) -> Option<&str> {
        self.document
            .get("UserMetadata")
            .and_then(|metadata| metadata.get(key))
            .and_then(Value::as_str)
    }
}

/// Resolves a template into a fully addressed job request.
#[derive(Debug, Clone)]
pub struct JobSettingsBuilder {
    input_path: String,
    output_base: String,
    role: String,
    metadata: Map<String, Value>,
}

impl JobSettingsBuilder {
    pub fn new(
        input_path: impl Into<String>,
        output_base: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            input_path: input_path.into(),
            output_base: output_base.into(),
            role: role.into(),
            metadata: Map::new(),
        }
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .insert(key.into(), Value::String(value.into()));
        self
    }

    /// Works on a copy: a template that fails validation is never touched.
    pub fn build(&self, template: &JobTemplate) -> SettingsResult<JobRequest> {
        let group_types = validate(&template.document)?;
        let mut document = template.document.clone();
        let root = document
            .as_object_mut()
            .ok_or(SettingsError::NotAnObject)?;

        {
            let settings = root
                .get_mut("Settings")
                .and_then(Value::as_object_mut)
                .ok_or(SettingsError::MissingSettings)?;
            self.set_input(settings);

            if let Some(Value::Array(groups)) = settings.get_mut("OutputGroups") {
                let mut counters = KindCounters::default();
                for (group, group_type) in groups.iter_mut().zip(group_types) {
                    let number = counters.next(group_type);
                    let destination = self.destination(group, group_type, number);
                    debug!(
                        group = group_type.type_tag(),
                        %destination,
                        "resolved output destination"
                    );
                    set_destination(group, group_type, destination);
                }
            }
        }

        root.entry("AccelerationSettings")
            .or_insert_with(|| json!({ "Mode": DEFAULT_ACCELERATION_MODE }));
        root.insert("Role".to_string(), Value::String(self.role.clone()));

        let short_queue = root
            .get("Queue")
            .and_then(Value::as_str)
            .filter(|queue| queue.contains('/'))
            .and_then(|queue| queue.split('/').nth(1))
            .map(str::to_string);
        if let Some(queue) = short_queue {
            root.insert("Queue".to_string(), Value::String(queue));
        }

        let metadata = root
            .entry("UserMetadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if metadata.is_null() {
            *metadata = Value::Object(Map::new());
        }
        if let Value::Object(existing) = metadata {
            existing.extend(self.metadata.clone());
        }

        Ok(JobRequest { document })
    }

    fn set_input(&self, settings: &mut Map<String, Value>) {
        let inputs = settings
            .entry("Inputs")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !inputs.is_array() {
            *inputs = Value::Array(Vec::new());
        }
        if let Value::Array(inputs) = inputs {
            if inputs.is_empty() {
                inputs.push(Value::Object(Map::new()));
            }
            if let Some(Value::Object(input)) = inputs.first_mut() {
                input.insert(
                    "FileInput".to_string(),
                    Value::String(self.input_path.clone()),
                );
            }
        }
    }

    fn destination(&self, group: &Value, group_type: GroupType, number: u32) -> String {
        let base = self.output_base.trim_end_matches('/');
        let custom = group
            .get("CustomName")
            .and_then(Value::as_str)
            .map(strip_whitespace)
            .filter(|name| !name.is_empty());
        let name = match custom {
            Some(custom) => custom,
            None => {
                let name = group
                    .get("Name")
                    .and_then(Value::as_str)
                    .map(strip_whitespace)
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| group_type.default_name().to_string());
                format!("{name}{number}")
            }
        };
        format!("{base}/{name}/")
    }
}

fn set_destination(group: &mut Value, group_type: GroupType, destination: String) {
    let Some(group_settings) = group
        .get_mut("OutputGroupSettings")
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    let typed = group_settings
        .entry(group_type.settings_key())
        .or_insert_with(|| Value::Object(Map::new()));
    if typed.is_null() {
        *typed = Value::Object(Map::new());
    }
    if let Value::Object(typed) = typed {
        typed.insert("Destination".to_string(), Value::String(destination));
    }
}
