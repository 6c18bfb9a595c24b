use serde::Deserialize;

use crate::error::PipelineError;

/// Kind of installable package the worker produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArtifactKind {
    Apk,
    Xapk,
    Apks,
}

impl ArtifactKind {
    /// Every kind ships as the generic Android package content type.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        "application/vnd.android.package-archive"
    }

    /// Companion tool needed to install container formats.
    #[must_use]
    pub fn installer_tool(self) -> Option<&'static str> {
        match self {
            Self::Apk => None,
            Self::Xapk => Some("ZArchiver"),
            Self::Apks => Some("SAI"),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apk => "APK",
            Self::Xapk => "XAPK",
            Self::Apks => "APKS",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw worker stdout; every field optional until validated.
#[derive(Debug, Deserialize)]
struct RawLookup {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default, rename = "sizeMB")]
    size_mb: Option<f64>,
    #[serde(default)]
    developer: Option<String>,
    #[serde(default, rename = "fileType")]
    kind: Option<ArtifactKind>,
    #[serde(default, rename = "iconUrl")]
    icon_url: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default, rename = "hasOBB")]
    has_obb: bool,
}

/// A completed lookup with every artifact field present.
#[derive(Debug, Clone)]
pub struct AppArtifact {
    pub name: String,
    pub version: String,
    pub size_label: String,
    pub size_mb: f64,
    pub developer: String,
    pub kind: ArtifactKind,
    pub icon_url: Option<String>,
    pub filename: String,
    /// The package carries expansion data alongside the installer.
    pub has_obb: bool,
}

/// Validated worker output: either a clean miss or a complete artifact.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    /// "Not found"-class result carrying the worker's own message.
    NotFound(String),
    Found(AppArtifact),
}

/// Parse and validate the worker's stdout.
pub fn parse_lookup(stdout: &str) -> Result<LookupOutcome, PipelineError> {
    let raw: RawLookup = serde_json::from_str(stdout.trim())
        .map_err(|e| PipelineError::MalformedResult(e.to_string()))?;

    if let Some(message) = raw.error {
        return Ok(LookupOutcome::NotFound(message));
    }

    match (
        raw.name,
        raw.version,
        raw.size,
        raw.size_mb,
        raw.developer,
        raw.kind,
        raw.filename,
    ) {
        (
            Some(name),
            Some(version),
            Some(size_label),
            Some(size_mb),
            Some(developer),
            Some(kind),
            Some(filename),
        ) => Ok(LookupOutcome::Found(AppArtifact {
            name,
            version,
            size_label,
            size_mb,
            developer,
            kind,
            icon_url: raw.icon_url,
            filename,
            has_obb: raw.has_obb,
        })),
        _ => Err(PipelineError::MalformedResult(
            "result has neither an error nor a complete artifact".into(),
        )),
    }
}
