//! JSON Patch (RFC 6902) documents carried in the spec-diff annotation.
//!
//! Only the shape is validated here; applying the patch is the syncer's job.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Parse and validate a JSON Patch document.
pub fn parse(raw: &str) -> Result<Vec<PatchOperation>, String> {
    let ops: Vec<PatchOperation> =
        serde_json::from_str(raw).map_err(|e| format!("not a JSON Patch array: {e}"))?;
    for (i, op) in ops.iter().enumerate() {
        validate(op).map_err(|e| format!("operation {i}: {e}"))?;
    }
    Ok(ops)
}

fn validate(op: &PatchOperation) -> Result<(), String> {
    check_pointer(&op.path)?;
    match op.op {
        PatchOp::Add | PatchOp::Replace | PatchOp::Test if op.value.is_none() => {
            Err(format!("{:?} requires a value", op.op))
        }
        PatchOp::Move | PatchOp::Copy => match &op.from {
            Some(from) => check_pointer(from),
            None => Err(format!("{:?} requires from", op.op)),
        },
        _ => Ok(()),
    }
}

/// A JSON Pointer is empty or starts with `/`.
fn check_pointer(pointer: &str) -> Result<(), String> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(format!("invalid JSON pointer {pointer:?}"))
    }
}
