use std::collections::BTreeMap;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use super::{AurClient, AurError};
use crate::models::{AurPackage, UpdateInfo};

/// A request that can be run in the background with [`AurClient::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AurRequest {
    Search(String),
    SearchByMaintainer(String),
    SearchByName(String),
    Info(Vec<String>),
    Orphans,
    /// Installed name to installed version.
    CheckUpdates(BTreeMap<String, String>),
}

/// The single terminal event each dispatched request produces.
#[derive(Debug)]
pub enum AurEvent {
    Completed {
        request: AurRequest,
        packages: Vec<AurPackage>,
    },
    UpdatesChecked {
        request: AurRequest,
        updates: Vec<UpdateInfo>,
    },
    Failed {
        request: AurRequest,
        error: AurError,
    },
}

impl AurEvent {
    pub fn request(&self) -> &AurRequest {
        match self {
            Self::Completed { request, .. }
            | Self::UpdatesChecked { request, .. }
            | Self::Failed { request, .. } => request,
        }
    }
}

impl AurClient {
    /// Run `request` on the tokio runtime and send exactly one [`AurEvent`]
    /// to `tx` when it finishes.
    ///
    /// Requests are independent: dispatching the same request twice makes two
    /// HTTP calls and sends two events. A dropped receiver is not an error.
    pub fn dispatch(&self, request: AurRequest, tx: UnboundedSender<AurEvent>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            let event = match client.run(&request).await {
                Ok(Outcome::Packages(packages)) => AurEvent::Completed { request, packages },
                Ok(Outcome::Updates(updates)) => AurEvent::UpdatesChecked { request, updates },
                Err(error) => AurEvent::Failed { request, error },
            };
            if tx.send(event).is_err() {
                tracing::debug!("AUR event receiver dropped");
            }
        })
    }

    async fn run(&self, request: &AurRequest) -> Result<Outcome, AurError> {
        let packages = match request {
            AurRequest::Search(q) => self.search(q).await?,
            AurRequest::SearchByMaintainer(m) => self.search_by_maintainer(m).await?,
            AurRequest::SearchByName(n) => self.search_by_name(n).await?,
            AurRequest::Info(names) => self.info(names).await?,
            AurRequest::Orphans => self.orphans().await?,
            AurRequest::CheckUpdates(installed) => {
                return Ok(Outcome::Updates(self.check_for_updates(installed).await?))
            }
        };
        Ok(Outcome::Packages(packages))
    }
}

enum Outcome {
    Packages(Vec<AurPackage>),
    Updates(Vec<UpdateInfo>),
}
