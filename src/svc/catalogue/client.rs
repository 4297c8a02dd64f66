//! # Kubernetes-backed catalogue client
//!
//! Production [`CatalogueClient`] implementation, wrapping a [`kube::Client`]
//! and the event recorder. This is the only place that actually talks to the
//! cluster API.

use kube::{Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::svc::{
    catalogue::{CatalogueClient, ClientError, IftPatchBase, IftgPatchBase},
    crd::{FeatureRef, InstalledFeature, InstalledFeatureGroup},
    k8s::{recorder, resource},
};

// -----------------------------------------------------------------------------
// KubeCatalogueClient structure

/// bounded so a storm of follow-up reconciles cannot grow memory unbounded;
/// the watch loop is expected to drain this promptly.
const RECONCILE_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct KubeCatalogueClient {
    kube: Client,
    schedule: mpsc::Sender<FeatureRef>,
}

impl KubeCatalogueClient {
    /// builds a new client, returning the receiving end of the follow-up
    /// reconcile queue alongside it.
    pub fn new(kube: Client) -> (Self, mpsc::Receiver<FeatureRef>) {
        let (schedule, receiver) = mpsc::channel(RECONCILE_QUEUE_CAPACITY);
        (Self { kube, schedule }, receiver)
    }

    fn ifts(&self, namespace: &str) -> Api<InstalledFeature> {
        Api::namespaced(self.kube.to_owned(), namespace)
    }

    fn iftgs(&self, namespace: &str) -> Api<InstalledFeatureGroup> {
        Api::namespaced(self.kube.to_owned(), namespace)
    }
}

fn not_found(key: &FeatureRef, err: kube::Error) -> ClientError {
    match &err {
        kube::Error::Api(err) if err.code == 404 => ClientError::NotFound(key.to_owned()),
        _ => ClientError::Kube(err),
    }
}

#[async_trait::async_trait]
impl CatalogueClient for KubeCatalogueClient {
    #[tracing::instrument(skip(self))]
    async fn load_ift(&self, key: &FeatureRef) -> Result<InstalledFeature, ClientError> {
        self.ifts(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|err| not_found(key, err))
    }

    #[tracing::instrument(skip(self, ift))]
    async fn save_ift(&self, ift: &InstalledFeature) -> Result<InstalledFeature, ClientError> {
        let (namespace, _) = resource::namespaced_name(ift);
        self.ifts(&namespace)
            .replace(&ift.name_any(), &Default::default(), ift)
            .await
            .map_err(ClientError::Kube)
    }

    #[tracing::instrument(skip(self, ift, base))]
    async fn patch_ift_status(
        &self,
        ift: &InstalledFeature,
        base: IftPatchBase,
    ) -> Result<(), ClientError> {
        let patch = base.apply(ift)?;
        resource::patch_status(self.kube.to_owned(), ift.to_owned(), patch).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn load_iftg(&self, key: &FeatureRef) -> Result<InstalledFeatureGroup, ClientError> {
        self.iftgs(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|err| not_found(key, err))
    }

    #[tracing::instrument(skip(self, iftg))]
    async fn save_iftg(
        &self,
        iftg: &InstalledFeatureGroup,
    ) -> Result<InstalledFeatureGroup, ClientError> {
        let (namespace, _) = resource::namespaced_name(iftg);
        self.iftgs(&namespace)
            .replace(&iftg.name_any(), &Default::default(), iftg)
            .await
            .map_err(ClientError::Kube)
    }

    #[tracing::instrument(skip(self, iftg, base))]
    async fn patch_iftg_status(
        &self,
        iftg: &InstalledFeatureGroup,
        base: IftgPatchBase,
    ) -> Result<(), ClientError> {
        let patch = base.apply(iftg)?;
        resource::patch_status(self.kube.to_owned(), iftg.to_owned(), patch).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn reconcile_feature(&self, key: &FeatureRef) {
        if let Err(err) = self.schedule.try_send(key.to_owned()) {
            warn!(
                namespace = &key.namespace,
                name = &key.name,
                error = err.to_string(),
                "Could not schedule follow-up reconciliation for feature",
            );
        }
    }

    #[tracing::instrument(skip(self, obj, message))]
    async fn info_event(&self, obj: &InstalledFeature, reason: &str, message: String) {
        if let Err(err) = recorder::normal(self.kube.to_owned(), obj, &reason, &message).await {
            warn!(error = err.to_string(), "Could not record info event");
        }
    }

    #[tracing::instrument(skip(self, obj, message))]
    async fn warn_event(&self, obj: &InstalledFeature, reason: &str, message: String) {
        if let Err(err) = recorder::warning(self.kube.to_owned(), obj, &reason, &message).await {
            warn!(error = err.to_string(), "Could not record warning event");
        }
    }
}
