//! Result payloads stored on completed tasks and returned by the worker.

use serde_json::{json, Value};

use crate::file::FileId;
use crate::job_status::TaskStatus;
use crate::operation::OperationKind;

/// Result of a completed combined task.
pub fn combined_result(result_file_id: FileId, operations_count: usize) -> Value {
    json!({
        "result_file_id": result_file_id,
        "operations_count": operations_count,
    })
}

/// Result of a completed single-operation task.
pub fn simple_result(result_file_id: FileId, operation: OperationKind) -> Value {
    json!({
        "result_file_id": result_file_id,
        "operation": operation,
    })
}

/// No-op result returned when a dispatch finds the task already settled.
pub fn skipped_result(status: TaskStatus) -> Value {
    json!({ "status": status })
}
