use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A backend account, as listed in the access configuration.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

// The password is kept out of Debug output so that request logging can never
// leak it.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// The set of backend accounts the controller may authenticate as.
///
/// Loaded from the access configuration file and replaced wholesale on
/// reload.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AuthConfiguration {
    #[serde(default)]
    pub users: Vec<Credential>,
}

impl AuthConfiguration {
    /// Returns the credential configured for `username`, if any.
    pub fn credential_for(&self, username: &str) -> Option<&Credential> {
        self.users.iter().find(|c| c.username == username)
    }
}

/// Image metadata as reported by the scanning backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub digest: String,
    pub analysis_status: AnalysisStatus,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[serde(alias = "not_analyzed")]
    Analyzing,
    Analyzed,
    #[serde(alias = "failed")]
    AnalysisFailed,
    NotFound,
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyzing => "analyzing".fmt(f),
            Self::Analyzed => "analyzed".fmt(f),
            Self::AnalysisFailed => "analysis_failed".fmt(f),
            Self::NotFound => "not_found".fmt(f),
        }
    }
}

/// Error returned by [`ImageBackend::get`].
///
/// `NotFound` is a normal outcome for images the backend has never seen;
/// everything else is a transport or authorization failure.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("image is not known to the backend")]
    NotFound,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// The image-scanning backend capability consumed by the decision engine.
#[async_trait::async_trait]
pub trait ImageBackend: Send + Sync {
    /// Looks up image metadata by full tag.
    async fn get(&self, credential: &Credential, image: &str) -> Result<Image, LookupError>;

    /// Asks the backend to begin analyzing `image`. Idempotent for images the
    /// backend already knows.
    async fn analyze(&self, credential: &Credential, image: &str) -> Result<()>;

    /// Evaluates `digest` against a policy bundle, reporting whether the
    /// evaluation status is exactly `"pass"`.
    async fn check_policy(
        &self,
        credential: &Credential,
        digest: &str,
        tag: &str,
        policy_bundle_id: Option<&str>,
    ) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_for_finds_configured_user() {
        let auth = AuthConfiguration {
            users: vec![
                Credential {
                    username: "admin".to_string(),
                    password: "secret".to_string(),
                },
                Credential {
                    username: "ops".to_string(),
                    password: "hunter2".to_string(),
                },
            ],
        };

        assert_eq!(auth.credential_for("ops").map(|c| &*c.username), Some("ops"));
        assert!(auth.credential_for("nobody").is_none());
    }

    #[test]
    fn credential_debug_does_not_leak_password() {
        let credential = Credential {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn analysis_status_accepts_backend_spellings() {
        for (raw, expected) in [
            ("\"analyzed\"", AnalysisStatus::Analyzed),
            ("\"analyzing\"", AnalysisStatus::Analyzing),
            ("\"not_analyzed\"", AnalysisStatus::Analyzing),
            ("\"analysis_failed\"", AnalysisStatus::AnalysisFailed),
        ] {
            let status: AnalysisStatus = serde_json::from_str(raw).unwrap();
            assert_eq!(status, expected, "{raw}");
        }
    }
}
