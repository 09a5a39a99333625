use crate::{
    admission::Admission,
    config::{self, ControllerConfiguration},
};
use anyhow::{bail, Result};
use clap::Parser;
use image_gate_core::AuthConfiguration;
use image_gate_k8s::NamespaceClient;
use std::path::PathBuf;
use tokio::time::Duration;

/// Per-call backend timeout. Admission requests inherit it through the shared
/// HTTP client: a timed-out lookup surfaces as a transport error and is
/// mapped by the gating mode like any other backend failure.
const BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[clap(
    name = "image-gate",
    about = "An admission controller gating workload images on scan results"
)]
pub struct Args {
    #[clap(long, default_value = "image_gate=info,warn", env = "IMAGE_GATE_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Path to the controller configuration file.
    #[clap(long, default_value = "/etc/image-gate/controller.yaml")]
    controller_config: PathBuf,

    /// Path to the backend access configuration file.
    #[clap(long, default_value = "/etc/image-gate/access.yaml")]
    access_config: PathBuf,
}

impl Args {
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            server,
            admin,
            admission_controller_disabled,
            controller_config,
            access_config,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin)
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // A failure to load either document at startup is fatal; reload
        // failures after startup keep the previous snapshot.
        let (config_rx, _controller_watch) =
            config::watch::<ControllerConfiguration>(&controller_config)?;
        let (auth_rx, _access_watch) = config::watch::<AuthConfiguration>(&access_config)?;

        let http = reqwest::Client::builder().timeout(BACKEND_TIMEOUT).build()?;
        let namespaces = NamespaceClient::new(runtime.client());

        let runtime =
            runtime.spawn_server(move || Admission::new(config_rx, auth_rx, namespaces, http));

        // Block on the shutdown signal, then wait for background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("aborted");
        }

        Ok(())
    }
}
