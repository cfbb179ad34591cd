//! Best-effort extraction of a `changes` list from command output.
//!
//! Some `vervids` subcommands print a JSON object somewhere in their text
//! output. We take everything between the first `{` and the last `}`, try to
//! parse it, and surface its `changes` field. This is a heuristic over an
//! opaque format: `None` is the normal result and never an error.

use serde_json::Value;

/// Return the `changes` field of the JSON object embedded in `output`, if any.
pub fn extract_changes(output: &str) -> Option<Value> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    if end < start {
        return None;
    }

    let parsed: Value = serde_json::from_str(&output[start..=end]).ok()?;
    match parsed.get("changes")? {
        Value::Null | Value::Bool(false) => None,
        changes => Some(changes.clone()),
    }
}
