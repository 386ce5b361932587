use thiserror::Error;

/// A declared service could not be brought up. Fatal to the session.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("failed to start service '{service}' from image '{image}'")]
    Start {
        service: String,
        image: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to remove stale container '{service}' left by an earlier session")]
    Stale {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("container name '{service}' is taken by a container testrig did not start")]
    NameTaken { service: String },

    #[error("service '{service}' was not ready after {attempts} attempt(s)")]
    NotReady { service: String, attempts: u32 },

    #[error("interrupted while provisioning service '{service}'")]
    Interrupted { service: String },
}

impl ProvisioningError {
    /// Name of the service that failed.
    pub fn service(&self) -> &str {
        match self {
            Self::Start { service, .. }
            | Self::Stale { service, .. }
            | Self::NameTaken { service }
            | Self::NotReady { service, .. }
            | Self::Interrupted { service } => service,
        }
    }
}

/// A handle could not be stopped. Logged and collected, never propagated.
#[derive(Error, Debug)]
#[error("failed to stop service '{service}'")]
pub struct TeardownError {
    pub service: String,
    #[source]
    pub source: anyhow::Error,
}
