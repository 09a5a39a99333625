use crate::{config::ControllerConfiguration, validate::Hook};
use futures::future;
use hyper::{body::Buf, http, Body, Request, Response};
use image_gate_anchore::ApiImageBackend;
use image_gate_core::AuthConfiguration;
use image_gate_k8s::NamespaceClient;
use kube::core::DynamicObject;
use std::{sync::Arc, task};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Serves the validating webhook endpoint.
#[derive(Clone)]
pub struct Admission {
    config: watch::Receiver<Arc<ControllerConfiguration>>,
    auth: watch::Receiver<Arc<AuthConfiguration>>,
    namespaces: NamespaceClient,
    http: reqwest::Client,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;

// === impl Admission ===

impl hyper::service::Service<Request<Body>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(&mut self, _cx: &mut task::Context<'_>) -> task::Poll<Result<(), Error>> {
        task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::empty())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            let bytes = hyper::body::aggregate(req.into_body()).await?;
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(
        config: watch::Receiver<Arc<ControllerConfiguration>>,
        auth: watch::Receiver<Arc<AuthConfiguration>>,
        namespaces: NamespaceClient,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            auth,
            namespaces,
            http,
        }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        // One snapshot of each document governs the whole request, so a
        // mid-request reload cannot produce inconsistent selections.
        let config = self.config.borrow().clone();
        let auth = self.auth.borrow().clone();

        let backend = ApiImageBackend::new(self.http.clone(), &config.anchore_endpoint);
        Hook {
            config: &config,
            auth: &auth,
            backend: &backend,
            namespaces: &self.namespaces,
        }
        .admit(&req)
        .await
    }
}

fn json_response(rsp: Review) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}
