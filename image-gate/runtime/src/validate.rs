use crate::config::ControllerConfiguration;
use image_gate_core::{
    evaluate_image, select, AuthConfiguration, ImageBackend, ImageVerdict, Metadata, Mode,
    NamespaceLookup, ResourceSelectorType,
};
use image_gate_k8s::extract_images;
use kube::core::DynamicObject;
use std::fmt;
use tracing::{debug, info, warn};

type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;

/// The admission decision engine, bound to one configuration snapshot for the
/// duration of a single request.
pub struct Hook<'a, B, N> {
    pub config: &'a ControllerConfiguration,
    pub auth: &'a AuthConfiguration,
    pub backend: &'a B,
    pub namespaces: &'a N,
}

impl<B: ImageBackend, N: NamespaceLookup> Hook<'_, B, N> {
    /// Validates one admission request, mapping every backend condition onto
    /// a deterministic allow or deny.
    pub async fn admit(&self, req: &AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(req);

        if !self.config.validator.enabled {
            debug!(uid = %req.uid, "validator disabled; admitting");
            return rsp;
        }

        let object = match req.object.as_ref() {
            Some(object) => object,
            None => return rsp,
        };

        let images = extract_images(&req.kind, &object.data);
        if images.is_empty() {
            debug!(uid = %req.uid, kind = %req.kind.kind, "no images to validate; admitting");
            return rsp;
        }

        let metadata = Metadata {
            labels: object.metadata.labels.clone().unwrap_or_default(),
            annotations: object.metadata.annotations.clone().unwrap_or_default(),
        };
        let namespace = self.namespace_metadata(req).await;

        let verdict = self
            .validate(&images, &metadata, namespace.as_ref())
            .await;
        info!(
            uid = %req.uid,
            kind = %req.kind.kind,
            name = %req.name,
            namespace = req.namespace.as_deref().unwrap_or_default(),
            allowed = verdict.allowed,
            %verdict,
            "validated workload"
        );

        let mut rsp = rsp;
        if verdict.allowed {
            rsp.result.message = verdict.message;
            rsp
        } else {
            rsp.deny(verdict.message)
        }
    }

    /// Resolves namespace metadata only when a namespace selector is
    /// configured. A failed lookup means namespace selectors cannot match
    /// this request; other selector types are unaffected.
    async fn namespace_metadata(&self, req: &AdmissionRequest) -> Option<Metadata> {
        let wanted = self
            .config
            .policy_selectors
            .iter()
            .any(|s| s.resource_selector.kind == ResourceSelectorType::Namespace);
        if !wanted {
            return None;
        }

        let name = req.namespace.as_deref()?;
        match self.namespaces.namespace_metadata(name).await {
            Ok(metadata) => Some(metadata),
            Err(error) => {
                warn!(%error, namespace = name, "failed to resolve namespace metadata");
                None
            }
        }
    }

    async fn validate(
        &self,
        images: &[String],
        metadata: &Metadata,
        namespace: Option<&Metadata>,
    ) -> Verdict {
        let (index, selector) =
            match select(&self.config.policy_selectors, images, metadata, namespace) {
                Some(found) => found,
                None => {
                    return Verdict::denied(format!(
                        "no policy selector matched the workload (image {:?})",
                        images[0]
                    ))
                }
            };
        debug!(
            index,
            mode = %selector.mode,
            username = %selector.policy_reference.username,
            "matched policy selector"
        );

        let credential = match self
            .auth
            .credential_for(&selector.policy_reference.username)
        {
            Some(credential) => credential,
            None => {
                return Verdict::denied(format!(
                    "no credential configured for user {:?}",
                    selector.policy_reference.username
                ))
            }
        };

        let mode = selector.mode;
        let bundle = selector.policy_reference.policy_bundle_id.as_deref();
        let request_analysis = self.config.validator.request_analysis;

        let mut results = Vec::with_capacity(images.len());
        for image in images {
            let result = evaluate_image(
                self.backend,
                credential,
                mode,
                bundle,
                image,
                request_analysis,
            )
            .await;
            let denied = !result.allowed;
            results.push(result);

            // BreakGlass keeps going so every image is looked up for its
            // side effects; the gated modes stop at the first denial.
            if denied && mode != Mode::BreakGlass {
                break;
            }
        }

        Verdict::from_results(results)
    }
}

/// Aggregate outcome of one admission request: allowed only if every
/// evaluated image was allowed.
struct Verdict {
    allowed: bool,
    message: String,
}

impl Verdict {
    fn denied(message: String) -> Self {
        Self {
            allowed: false,
            message,
        }
    }

    fn from_results(results: Vec<ImageVerdict>) -> Self {
        let allowed = results.iter().all(|r| r.allowed);

        // The first denial leads the message; the other results follow.
        let mut parts = Vec::with_capacity(results.len());
        if let Some(denied) = results.iter().find(|r| !r.allowed) {
            parts.push(denied.to_string());
        }
        parts.extend(results.iter().filter(|r| r.allowed).map(|r| r.to_string()));

        Self {
            allowed,
            message: parts.join("; "),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}
