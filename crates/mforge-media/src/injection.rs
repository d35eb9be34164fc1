//! Stage config wiring: where a stage reads its source and extra inputs,
//! and where its output path comes back.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use mforge_models::{FileId, OperationKind};

use crate::error::{MediaError, MediaResult};

/// Result keys that may hold the produced file, checked in order.
pub const RESULT_PATH_KEYS: [&str; 3] = ["output_path", "result_path", "path"];

const JOIN_INPUTS_KEY: &str = "input_paths";

/// Config key receiving the current working file for `kind`.
pub fn source_key(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Join => JOIN_INPUTS_KEY,
        OperationKind::AudioOverlay | OperationKind::TextOverlay | OperationKind::Subtitles => "video_path",
        OperationKind::VideoOverlay => "base_video_path",
    }
}

/// Put the working file into a stage config.
///
/// Join prepends it to `input_paths`; every other kind sets its source key.
pub fn inject_source(kind: OperationKind, config: &mut Map<String, Value>, path: &Path) -> MediaResult<()> {
    let value = Value::String(path.to_string_lossy().into_owned());
    match kind {
        OperationKind::Join => {
            let list = join_inputs(config)?;
            list.insert(0, value);
        }
        _ => {
            config.insert(source_key(kind).to_string(), value);
        }
    }
    Ok(())
}

/// A stored file a stage needs besides its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryInput {
    pub file_id: FileId,
    /// Config key the local path is written to
    pub target_key: &'static str,
}

/// Stored files referenced by a stage config.
pub fn auxiliary_inputs(kind: OperationKind, config: &Map<String, Value>) -> MediaResult<Vec<AuxiliaryInput>> {
    let single = |id_key: &str, target_key: &'static str| -> MediaResult<Vec<AuxiliaryInput>> {
        match config.get(id_key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(raw) => FileId::from_value(raw)
                .map(|file_id| vec![AuxiliaryInput { file_id, target_key }])
                .ok_or_else(|| MediaError::invalid_config(kind, format!("{} is not a valid file id", id_key))),
        }
    };

    match kind {
        OperationKind::Join => match config.get("file_ids") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|raw| {
                    FileId::from_value(raw)
                        .map(|file_id| AuxiliaryInput {
                            file_id,
                            target_key: JOIN_INPUTS_KEY,
                        })
                        .ok_or_else(|| MediaError::invalid_config(kind, "file_ids must hold file ids"))
                })
                .collect(),
            Some(_) => Err(MediaError::invalid_config(kind, "file_ids must be a list")),
        },
        OperationKind::AudioOverlay => single("audio_file_id", "audio_path"),
        OperationKind::Subtitles => single("subtitle_file_id", "subtitle_path"),
        OperationKind::VideoOverlay => single("overlay_file_id", "overlay_path"),
        OperationKind::TextOverlay => Ok(Vec::new()),
    }
}

/// Write a materialized auxiliary file into a stage config.
pub fn attach_auxiliary(
    kind: OperationKind,
    config: &mut Map<String, Value>,
    input: &AuxiliaryInput,
    path: &Path,
) -> MediaResult<()> {
    let value = Value::String(path.to_string_lossy().into_owned());
    if kind == OperationKind::Join && input.target_key == JOIN_INPUTS_KEY {
        join_inputs(config)?.push(value);
    } else {
        config.insert(input.target_key.to_string(), value);
    }
    Ok(())
}

fn join_inputs(config: &mut Map<String, Value>) -> MediaResult<&mut Vec<Value>> {
    let entry = config
        .entry(JOIN_INPUTS_KEY.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if entry.is_null() {
        *entry = Value::Array(Vec::new());
    }
    entry
        .as_array_mut()
        .ok_or_else(|| MediaError::invalid_config(OperationKind::Join, "input_paths must be a list"))
}

/// First known result key naming an existing file.
pub fn extract_output_path(output: &Map<String, Value>) -> Option<PathBuf> {
    RESULT_PATH_KEYS
        .iter()
        .filter_map(|key| output.get(*key).and_then(Value::as_str))
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_join_prepends_source() {
        let mut config = map(json!({"input_paths": ["/w/b.mp4"]}));
        inject_source(OperationKind::Join, &mut config, Path::new("/w/a.mp4")).unwrap();
        assert_eq!(config["input_paths"], json!(["/w/a.mp4", "/w/b.mp4"]));

        let mut empty = Map::new();
        inject_source(OperationKind::Join, &mut empty, Path::new("/w/a.mp4")).unwrap();
        assert_eq!(empty["input_paths"], json!(["/w/a.mp4"]));

        let mut bad = map(json!({"input_paths": "/w/b.mp4"}));
        assert!(inject_source(OperationKind::Join, &mut bad, Path::new("/w/a.mp4")).is_err());
    }

    #[test]
    fn test_source_keys() {
        for (kind, key) in [
            (OperationKind::AudioOverlay, "video_path"),
            (OperationKind::TextOverlay, "video_path"),
            (OperationKind::Subtitles, "video_path"),
            (OperationKind::VideoOverlay, "base_video_path"),
        ] {
            let mut config = map(json!({key: "/stale.mp4"}));
            inject_source(kind, &mut config, Path::new("/w/cur.mp4")).unwrap();
            assert_eq!(config[key], "/w/cur.mp4");
        }
    }

    #[test]
    fn test_auxiliary_inputs() {
        let aux = auxiliary_inputs(OperationKind::AudioOverlay, &map(json!({"audio_file_id": 7}))).unwrap();
        assert_eq!(aux, vec![AuxiliaryInput { file_id: FileId(7), target_key: "audio_path" }]);

        let aux = auxiliary_inputs(OperationKind::Join, &map(json!({"file_ids": [3, "4"]}))).unwrap();
        assert_eq!(aux.len(), 2);
        assert_eq!(aux[1].file_id, FileId(4));

        assert!(auxiliary_inputs(OperationKind::Subtitles, &map(json!({"subtitle_file_id": "abc"}))).is_err());
        assert!(auxiliary_inputs(OperationKind::TextOverlay, &map(json!({"text": "x"}))).unwrap().is_empty());
    }

    #[test]
    fn test_attach_auxiliary_appends_join_inputs() {
        let mut config = map(json!({"input_paths": ["/w/base.mp4"]}));
        let input = AuxiliaryInput { file_id: FileId(3), target_key: JOIN_INPUTS_KEY };
        attach_auxiliary(OperationKind::Join, &mut config, &input, Path::new("/w/3.mp4")).unwrap();
        assert_eq!(config["input_paths"], json!(["/w/base.mp4", "/w/3.mp4"]));
    }

    #[test]
    fn test_extract_output_path_order_and_existence() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("out.mp4");
        std::fs::write(&real, b"x").unwrap();

        let output = map(json!({"output_path": "/nope/missing.mp4", "path": real}));
        assert_eq!(extract_output_path(&output), Some(real.clone()));

        let output = map(json!({"result_path": real, "path": "/other"}));
        assert_eq!(extract_output_path(&output), Some(real));

        assert_eq!(extract_output_path(&map(json!({"status": "ok"}))), None);
    }
}
