use crate::{Credential, ImageBackend, LookupError, Mode};
use std::fmt;
use tracing::{debug, warn};

/// The decision for a single image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageVerdict {
    pub image: String,
    pub allowed: bool,
    pub reason: Reason,
}

impl fmt::Display for ImageVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.allowed { "allowed" } else { "denied" };
        write!(f, "image {:?} {}: {}", self.image, outcome, self.reason)
    }
}

/// Why an image was allowed or denied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reason {
    PolicyPassed,
    PolicyFailed,
    Analyzed,
    NotAnalyzed,
    LookupFailed(String),
    CheckFailed(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyPassed => "passed policy evaluation".fmt(f),
            Self::PolicyFailed => "failed policy evaluation".fmt(f),
            Self::Analyzed => "analyzed by the backend".fmt(f),
            Self::NotAnalyzed => "not analyzed by the backend".fmt(f),
            Self::LookupFailed(error) => write!(f, "image lookup failed: {error}"),
            Self::CheckFailed(error) => write!(f, "policy evaluation failed: {error}"),
        }
    }
}

/// Applies `mode` to a single image.
///
/// When the backend has no record of the image and `request_analysis` is set,
/// an analysis request is dispatched; its outcome is logged and never affects
/// the verdict.
pub async fn evaluate_image<B: ImageBackend>(
    backend: &B,
    credential: &Credential,
    mode: Mode,
    policy_bundle_id: Option<&str>,
    image: &str,
    request_analysis: bool,
) -> ImageVerdict {
    let breakglass = mode == Mode::BreakGlass;

    let found = match backend.get(credential, image).await {
        Ok(found) => found,
        Err(LookupError::NotFound) => {
            if request_analysis {
                match backend.analyze(credential, image).await {
                    Ok(()) => debug!(image, "analysis requested"),
                    Err(error) => warn!(%error, image, "analysis request failed"),
                }
            }
            return ImageVerdict {
                image: image.to_string(),
                allowed: breakglass,
                reason: Reason::NotAnalyzed,
            };
        }
        Err(LookupError::Backend(error)) => {
            warn!(%error, image, "image lookup failed");
            return ImageVerdict {
                image: image.to_string(),
                allowed: breakglass,
                reason: Reason::LookupFailed(error.to_string()),
            };
        }
    };

    if mode == Mode::AnalysisGate {
        // A backend record suffices: the image has been (or is being) analyzed.
        return ImageVerdict {
            image: image.to_string(),
            allowed: true,
            reason: Reason::Analyzed,
        };
    }

    match backend
        .check_policy(credential, &found.digest, image, policy_bundle_id)
        .await
    {
        Ok(true) => ImageVerdict {
            image: image.to_string(),
            allowed: true,
            reason: Reason::PolicyPassed,
        },
        Ok(false) => ImageVerdict {
            image: image.to_string(),
            allowed: breakglass,
            reason: Reason::PolicyFailed,
        },
        Err(error) => {
            warn!(%error, image, digest = %found.digest, "policy check failed");
            ImageVerdict {
                image: image.to_string(),
                allowed: breakglass,
                reason: Reason::CheckFailed(error.to_string()),
            }
        }
    }
}
