//! Key layout for objects written by the engine.

use uuid::Uuid;

use mforge_models::TaskId;

/// Key for a promoted remote file: `uploads/{owner}/{uuid}.{ext}`.
pub fn upload_key(owner_id: &str, extension: &str) -> String {
    format!("uploads/{}/{}.{}", sanitize_segment(owner_id), Uuid::new_v4(), extension)
}

/// Key for a published task artifact: `outputs/{owner}/{task}/{uuid}.{ext}`.
///
/// The random component keeps a re-delivered attempt from overwriting an
/// artifact another attempt already linked.
pub fn output_key(owner_id: &str, task_id: TaskId, extension: &str) -> String {
    format!(
        "outputs/{}/{}/{}.{}",
        sanitize_segment(owner_id),
        task_id,
        Uuid::new_v4(),
        extension
    )
}

/// Make an arbitrary id safe to use as a single key segment.
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::validate_key;

    #[test]
    fn test_output_key_is_scoped_and_unique() {
        let a = output_key("user-1", TaskId(9), "mp4");
        let b = output_key("user-1", TaskId(9), "mp4");
        assert!(a.starts_with("outputs/user-1/9/"));
        assert!(a.ends_with(".mp4"));
        assert_ne!(a, b);
        assert!(validate_key(&a).is_ok());
    }

    #[test]
    fn test_owner_segment_sanitized() {
        let key = upload_key("../evil/owner", "wav");
        assert!(key.starts_with("uploads/___evil_owner/"));
        assert!(validate_key(&key).is_ok());
    }
}
