use anyhow::{Context, Result};
use image_gate_core::PolicySelector;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::watch;
use tracing::{info, warn};

/// Process-wide validator configuration, replaced wholesale on reload.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfiguration {
    #[serde(default)]
    pub validator: ValidatorConfiguration,

    /// Base URL of the image scanning service.
    #[serde(default)]
    pub anchore_endpoint: String,

    /// Ordered selector list; the first match governs a workload.
    #[serde(default)]
    pub policy_selectors: Vec<PolicySelector>,
}

#[derive(Copy, Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorConfiguration {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub request_analysis: bool,
}

/// Reads a configuration document, accepting JSON or YAML by extension.
pub(crate) fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", path.display())),
        _ => serde_yaml::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", path.display())),
    }
}

/// Loads `path` and publishes a fresh snapshot whenever the file changes.
///
/// The initial load is fatal on error; a failed reload keeps the previous
/// snapshot. The returned watcher must be kept alive for events to flow.
pub(crate) fn watch<T>(path: &Path) -> Result<(watch::Receiver<Arc<T>>, RecommendedWatcher)>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let path: PathBuf = path
        .canonicalize()
        .with_context(|| format!("cannot watch {}", path.display()))?;
    let initial = load::<T>(&path)?;
    let (tx, rx) = watch::channel(Arc::new(initial));

    let reload = path.clone();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                warn!(%error, "configuration watch error");
                return;
            }
        };
        if !event.paths.iter().any(|p| p == &reload) {
            return;
        }
        match load::<T>(&reload) {
            Ok(next) => {
                info!(path = %reload.display(), "configuration reloaded");
                let _ = tx.send(Arc::new(next));
            }
            Err(error) => {
                warn!(%error, path = %reload.display(), "failed to reload configuration; keeping previous snapshot");
            }
        }
    })?;

    // Watch the containing directory: editors and kubelet volume updates
    // replace the file rather than writing it in place.
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    Ok((rx, watcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_gate_core::{AuthConfiguration, Mode, ResourceSelectorType};
    use std::time::Duration;

    const CONTROLLER_YAML: &str = "\
validator:
  enabled: true
  requestAnalysis: true
anchoreEndpoint: http://anchore:8228/v1
policySelectors:
  - resourceSelector:
      type: Namespace
      selectorKeyRegex: owner
      selectorValueRegex: ^team-a$
    mode: breakglass
    policyReference:
      username: admin
  - resourceSelector:
      type: Image
      selectorKeyRegex: .*
      selectorValueRegex: .*
    mode: policy
    policyReference:
      username: admin
      policyBundleId: 2c53a13c-1765-11e8-82ef-23527761d060
";

    const CONTROLLER_JSON: &str = r#"{
        "validator": {"enabled": true, "requestAnalysis": false},
        "anchoreEndpoint": "http://anchore:8228/v1",
        "policySelectors": [
            {
                "resourceSelector": {
                    "type": "Image",
                    "selectorKeyRegex": ".*",
                    "selectorValueRegex": ".*"
                },
                "mode": "analysis",
                "policyReference": {"username": "admin"}
            }
        ]
    }"#;

    const ACCESS_YAML: &str = "\
users:
  - username: admin
    password: admin-password
  - username: ops
    password: ops-password
";

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn controller_configuration_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "controller.yaml", CONTROLLER_YAML);

        let config: ControllerConfiguration = load(&path).unwrap();
        assert!(config.validator.enabled);
        assert!(config.validator.request_analysis);
        assert_eq!(config.anchore_endpoint, "http://anchore:8228/v1");
        assert_eq!(config.policy_selectors.len(), 2);
        assert_eq!(
            config.policy_selectors[0].resource_selector.kind,
            ResourceSelectorType::Namespace
        );
        assert_eq!(config.policy_selectors[0].mode, Mode::BreakGlass);
        assert_eq!(
            config.policy_selectors[1]
                .policy_reference
                .policy_bundle_id
                .as_deref(),
            Some("2c53a13c-1765-11e8-82ef-23527761d060")
        );
    }

    #[test]
    fn controller_configuration_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "controller.json", CONTROLLER_JSON);

        let config: ControllerConfiguration = load(&path).unwrap();
        assert!(config.validator.enabled);
        assert!(!config.validator.request_analysis);
        assert_eq!(config.policy_selectors.len(), 1);
        assert_eq!(config.policy_selectors[0].mode, Mode::AnalysisGate);
    }

    #[test]
    fn access_configuration_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "access.yaml", ACCESS_YAML);

        let auth: AuthConfiguration = load(&path).unwrap();
        assert_eq!(auth.users.len(), 2);
        assert_eq!(
            auth.credential_for("ops").map(|c| c.password.as_str()),
            Some("ops-password")
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        assert!(load::<ControllerConfiguration>(&path).is_err());
    }

    #[test]
    fn malformed_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "controller.yaml", "validator: [not, a, struct]");
        assert!(load::<ControllerConfiguration>(&path).is_err());
    }

    #[tokio::test]
    async fn reload_publishes_a_new_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "controller.yaml", CONTROLLER_YAML);

        let (mut rx, _watcher) = watch::<ControllerConfiguration>(&path).unwrap();
        assert!(rx.borrow().validator.enabled);

        let disabled = CONTROLLER_YAML.replace("enabled: true", "enabled: false");
        std::fs::write(&path, disabled).unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("no reload within 5s")
            .expect("sender dropped");
        assert!(!rx.borrow().validator.enabled);
    }

    #[tokio::test]
    async fn failed_reload_keeps_the_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "controller.yaml", CONTROLLER_YAML);

        let (rx, _watcher) = watch::<ControllerConfiguration>(&path).unwrap();
        std::fs::write(&path, "{{{ not yaml").unwrap();

        // Give the watcher a moment to observe the write.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.borrow().validator.enabled);
        assert_eq!(rx.borrow().policy_selectors.len(), 2);
    }
}
