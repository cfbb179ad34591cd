/// Classification of failed command output.
///
/// The relay passes CLI output through untouched; the panel scans it for a
/// handful of well-known failure patterns and adds a hint line underneath.
///
/// Returns one of: "read_only", "not_found", "permission", "unknown".
pub(crate) fn classify_failure(output: &str) -> &'static str {
    let lower = output.to_lowercase();

    // Read-only volume (project on a mounted image, locked network share)
    if lower.contains("read-only file system") || lower.contains("erofs") {
        return "read_only";
    }

    // Missing binary. `sh` says "vervids: not found", bash/zsh say
    // "command not found"; exit status 127 covers both.
    if lower.contains("command not found") {
        return "not_found";
    }
    {
        lazy_static::lazy_static! {
            static ref SHELL_NOT_FOUND: regex::Regex =
                regex::Regex::new(r"(?m)^\S*:(?: line)? ?\d*:? \S+: not found\s*$").unwrap();
        }
        if SHELL_NOT_FOUND.is_match(&lower) {
            return "not_found";
        }
    }

    if lower.contains("permission denied")
        || lower.contains("operation not permitted")
        || lower.contains("eacces")
    {
        return "permission";
    }

    "unknown"
}

/// Hint shown under a failed command, if its output matches a known pattern.
pub(crate) fn failure_hint(output: &str, code: Option<i32>) -> Option<&'static str> {
    let kind = match classify_failure(output) {
        "unknown" if code == Some(127) => "not_found",
        other => other,
    };
    match kind {
        "read_only" => Some(
            "Hint: the project is on a read-only volume. Save it to a writable folder and try again.",
        ),
        "not_found" => Some(
            "Hint: the vervids CLI was not found. Install it and make sure it is on the PATH of your login shell.",
        ),
        "permission" => {
            Some("Hint: permission denied. Check that you can write to the project folder.")
        }
        _ => None,
    }
}
