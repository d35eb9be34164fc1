//! Operation descriptors and combined-job configuration.
//!
//! A combined job threads one base file through an ordered list of
//! `{type, config}` descriptors. Descriptors arrive as raw JSON from the
//! API layer, so parsing is explicit and reports which entry is broken.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};
use crate::file::FileId;

/// Minimum number of stages in a combined job.
pub const MIN_OPERATIONS: usize = 2;

/// Maximum number of stages in a combined job.
pub const MAX_OPERATIONS: usize = 10;

/// The closed set of transformations an operation processor can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Concatenate several media files
    Join,
    /// Mix or replace the audio track
    AudioOverlay,
    /// Burn text onto the video
    TextOverlay,
    /// Burn a subtitle track onto the video
    Subtitles,
    /// Picture-in-picture overlay of another video or image
    VideoOverlay,
}

impl OperationKind {
    /// All operation kinds, in declaration order.
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Join,
        OperationKind::AudioOverlay,
        OperationKind::TextOverlay,
        OperationKind::Subtitles,
        OperationKind::VideoOverlay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Join => "join",
            OperationKind::AudioOverlay => "audio_overlay",
            OperationKind::TextOverlay => "text_overlay",
            OperationKind::Subtitles => "subtitles",
            OperationKind::VideoOverlay => "video_overlay",
        }
    }

    /// Parse from the wire name, returning `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated stage of a combined job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OperationDescriptor {
    /// Which processor handles this stage
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Processor-specific parameters
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl OperationDescriptor {
    pub fn new(kind: OperationKind, config: Map<String, Value>) -> Self {
        Self { kind, config }
    }

    /// Parse a raw descriptor, reporting errors against its position.
    pub fn parse(index: usize, raw: &Value) -> ModelResult<Self> {
        let obj = raw.as_object().ok_or_else(|| ModelError::MalformedOperation {
            index,
            reason: "descriptor must be an object".into(),
        })?;

        let name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::MalformedOperation {
                index,
                reason: "missing 'type'".into(),
            })?;

        let kind = OperationKind::from_name(name).ok_or_else(|| ModelError::UnknownOperation {
            index,
            name: name.to_string(),
        })?;

        let config = match obj.get("config") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(ModelError::ConfigNotMapping { index }),
        };

        Ok(Self { kind, config })
    }
}

/// Validated configuration of a combined job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CombinedConfig {
    /// File the first stage consumes
    pub base_file_id: FileId,
    /// Ordered stages
    pub operations: Vec<OperationDescriptor>,
}

impl CombinedConfig {
    /// Validate a raw combined-job config.
    ///
    /// `fallback_base` is used when the config itself carries no
    /// `base_file_id` (the first of the task's input files).
    ///
    /// Checks run in a fixed order: operation count, base reference, then
    /// each descriptor. Nothing here touches storage.
    pub fn parse(raw: &Value, fallback_base: Option<FileId>) -> ModelResult<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| ModelError::invalid_config("combined config must be an object"))?;

        let ops = match obj.get("operations") {
            Some(Value::Array(ops)) => ops.as_slice(),
            None | Some(Value::Null) => &[],
            Some(_) => return Err(ModelError::invalid_config("'operations' must be a list")),
        };

        if ops.len() < MIN_OPERATIONS {
            return Err(ModelError::TooFewOperations(ops.len()));
        }
        if ops.len() > MAX_OPERATIONS {
            return Err(ModelError::TooManyOperations(ops.len()));
        }

        let base_file_id = match obj.get("base_file_id") {
            Some(v) if !v.is_null() => {
                FileId::from_value(v).ok_or_else(|| {
                    ModelError::invalid_config("'base_file_id' must be a positive integer")
                })?
            }
            _ => fallback_base.ok_or(ModelError::MissingBaseFile)?,
        };

        let operations = ops
            .iter()
            .enumerate()
            .map(|(i, raw)| OperationDescriptor::parse(i, raw))
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(Self {
            base_file_id,
            operations,
        })
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ops(n: usize) -> Value {
        Value::Array(
            (0..n)
                .map(|_| json!({"type": "text_overlay", "config": {"text": "hi"}}))
                .collect(),
        )
    }

    #[test]
    fn test_parse_valid_combined() {
        let raw = json!({
            "base_file_id": 5,
            "operations": [
                {"type": "text_overlay", "config": {"text": "Hello"}},
                {"type": "audio_overlay", "config": {"audio_file_id": 7}},
            ]
        });
        let cfg = CombinedConfig::parse(&raw, None).unwrap();
        assert_eq!(cfg.base_file_id, FileId(5));
        assert_eq!(cfg.len(), 2);
        assert_eq!(cfg.operations[0].kind, OperationKind::TextOverlay);
        assert_eq!(cfg.operations[1].kind, OperationKind::AudioOverlay);
    }

    #[test]
    fn test_single_operation_rejected() {
        let raw = json!({"base_file_id": 5, "operations": ops(1)});
        let err = CombinedConfig::parse(&raw, None).unwrap_err();
        assert_eq!(err, ModelError::TooFewOperations(1));
        assert!(err.to_string().contains("at least 2 operations"));
    }

    #[test]
    fn test_eleven_operations_rejected() {
        let raw = json!({"base_file_id": 5, "operations": ops(11)});
        assert_eq!(
            CombinedConfig::parse(&raw, None).unwrap_err(),
            ModelError::TooManyOperations(11)
        );
    }

    #[test]
    fn test_bounds_inclusive() {
        for n in [MIN_OPERATIONS, MAX_OPERATIONS] {
            let raw = json!({"base_file_id": 1, "operations": ops(n)});
            assert_eq!(CombinedConfig::parse(&raw, None).unwrap().len(), n);
        }
    }

    #[test]
    fn test_base_falls_back_to_input_file() {
        let raw = json!({"operations": ops(2)});
        let cfg = CombinedConfig::parse(&raw, Some(FileId(9))).unwrap();
        assert_eq!(cfg.base_file_id, FileId(9));

        assert_eq!(
            CombinedConfig::parse(&raw, None).unwrap_err(),
            ModelError::MissingBaseFile
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = json!({
            "base_file_id": 1,
            "operations": [
                {"type": "text_overlay", "config": {}},
                {"type": "blur", "config": {}},
            ]
        });
        assert_eq!(
            CombinedConfig::parse(&raw, None).unwrap_err(),
            ModelError::UnknownOperation {
                index: 1,
                name: "blur".into()
            }
        );
    }

    #[test]
    fn test_non_mapping_config_rejected() {
        let raw = json!({
            "base_file_id": 1,
            "operations": [
                {"type": "join", "config": ["a", "b"]},
                {"type": "subtitles"},
            ]
        });
        assert_eq!(
            CombinedConfig::parse(&raw, None).unwrap_err(),
            ModelError::ConfigNotMapping { index: 0 }
        );
    }

    #[test]
    fn test_kind_names() {
        for kind in OperationKind::ALL {
            assert_eq!(OperationKind::from_name(kind.as_str()), Some(kind));
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, json!(kind.as_str()));
        }
    }
}
