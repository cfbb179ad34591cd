use std::fmt;
use std::path::PathBuf;

/// What the host bridge's `getProjectFilePath()` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectPath {
    Saved(PathBuf),
    /// The literal `"null"` (or nothing): the project was never saved
    Unsaved,
    /// A string starting with `Error:`
    Error(String),
}

impl ProjectPath {
    /// Interpret the bridge's raw string. Sentinel forms never become paths.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw == "null" || raw == "undefined" {
            return Self::Unsaved;
        }
        if let Some(message) = raw.strip_prefix("Error:") {
            return Self::Error(message.trim().to_string());
        }
        Self::Saved(PathBuf::from(raw))
    }

    pub fn as_path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Saved(p) => Some(p),
            _ => None,
        }
    }

    /// Path of the XML (`.aepx`) copy of a saved project.
    pub fn xml_path(&self) -> Option<PathBuf> {
        self.as_path().map(xml_project_path)
    }
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saved(p) => write!(f, "{}", p.display()),
            Self::Unsaved => write!(f, "No project saved yet. Save the project first."),
            Self::Error(e) => write!(f, "Could not get project path: {e}"),
        }
    }
}

/// `.aep` becomes `.aepx`, `.aepx` is kept, anything else gets `.aepx` appended.
pub fn xml_project_path(path: &std::path::Path) -> PathBuf {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("aepx") => path.to_path_buf(),
        Some("aep") => path.with_extension("aepx"),
        _ => {
            let mut s = path.as_os_str().to_os_string();
            s.push(".aepx");
            PathBuf::from(s)
        }
    }
}
