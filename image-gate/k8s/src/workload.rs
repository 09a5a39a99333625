use k8s_openapi::api::core::v1::PodSpec;
use kube::core::GroupVersionKind;

/// Workload kinds that embed a pod spec at a known path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WorkloadKind {
    Pod,
    Deployment,
    DaemonSet,
    ReplicaSet,
    StatefulSet,
    Job,
    CronJob,
}

impl WorkloadKind {
    /// Maps a GroupVersionKind onto a known workload kind. The version is
    /// ignored so that e.g. batch/v1beta1 CronJobs resolve like batch/v1.
    fn from_gvk(gvk: &GroupVersionKind) -> Option<Self> {
        match (gvk.group.as_str(), gvk.kind.as_str()) {
            ("", "Pod") => Some(Self::Pod),
            ("apps", "Deployment") => Some(Self::Deployment),
            ("apps", "DaemonSet") => Some(Self::DaemonSet),
            ("apps", "ReplicaSet") => Some(Self::ReplicaSet),
            ("apps", "StatefulSet") => Some(Self::StatefulSet),
            ("batch", "Job") => Some(Self::Job),
            ("batch", "CronJob") => Some(Self::CronJob),
            _ => None,
        }
    }

    fn pod_spec_path(self) -> &'static [&'static str] {
        match self {
            Self::Pod => &["spec"],
            Self::Deployment
            | Self::DaemonSet
            | Self::ReplicaSet
            | Self::StatefulSet
            | Self::Job => &["spec", "template", "spec"],
            Self::CronJob => &["spec", "jobTemplate", "spec", "template", "spec"],
        }
    }
}

/// Extracts the ordered container image references embedded in an admitted
/// object: regular containers first, then init containers, each in
/// declaration order.
///
/// Kinds outside the workload table yield an empty list, as do objects whose
/// pod spec is missing or unparseable.
pub fn extract_images(gvk: &GroupVersionKind, object: &serde_json::Value) -> Vec<String> {
    let kind = match WorkloadKind::from_gvk(gvk) {
        Some(kind) => kind,
        None => return Vec::new(),
    };

    let mut value = object;
    for segment in kind.pod_spec_path() {
        value = match value.get(segment) {
            Some(next) => next,
            None => return Vec::new(),
        };
    }

    let spec: PodSpec = match serde_json::from_value(value.clone()) {
        Ok(spec) => spec,
        Err(error) => {
            tracing::warn!(%error, kind = %gvk.kind, "unparseable pod spec");
            return Vec::new();
        }
    };

    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .filter_map(|container| container.image.clone())
        .collect()
}
