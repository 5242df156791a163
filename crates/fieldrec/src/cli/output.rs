//! JSON output on stdout, JSON errors on stderr.

use anyhow::Result;
use fieldrec_workflow::WorkflowError;
use serde::Serialize;
use serde_json::json;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The workflow error kind anywhere in the chain, or `"error"`.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<WorkflowError>())
        .map(WorkflowError::kind)
        .unwrap_or("error")
}

pub fn print_error(err: &anyhow::Error) {
    let body = json!({
        "error": {
            "kind": error_kind(err),
            "message": format!("{:#}", err),
        }
    });
    eprintln!("{}", body);
}
