//! # Catalogue module
//!
//! This module abstracts every read, write, status-patch and event emission
//! performed against [`InstalledFeature`]/[`InstalledFeatureGroup`] objects
//! behind a single, mockable [`CatalogueClient`] trait. It is the only seam
//! that touches the cluster API; every reconcile handler is unit-testable
//! against [`fake::FakeCatalogueClient`].

use async_trait::async_trait;
use serde::Serialize;

use crate::svc::{
    crd::{FeatureRef, InstalledFeature, InstalledFeatureGroup},
    k8s::resource,
};

pub mod client;
pub mod fake;

// -----------------------------------------------------------------------------
// ClientError enumeration

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("feature '{0}' not found")]
    NotFound(FeatureRef),
    #[error("kubernetes api error, {0}")]
    Kube(#[from] kube::Error),
    #[error("failed to compute status patch, {0}")]
    Diff(#[from] serde_json::Error),
    #[error("failed to apply status patch, {0}")]
    Patch(#[from] json_patch::PatchError),
}

// -----------------------------------------------------------------------------
// StatusPatch

/// a snapshot of an object taken strictly before its `status` is mutated,
/// used to compute a minimal status-only patch.
///
/// Calling [`StatusPatch::begin`] anywhere other than immediately before
/// mutating `.status` silently produces an empty or wrong patch; packaging
/// the snapshot as an owned value rather than a loose "diff these two"
/// function call makes that ordering structural instead of advisory.
pub struct StatusPatch<T>(T);

impl<T> StatusPatch<T>
where
    T: Serialize + Clone,
{
    /// snapshots `obj` before any further mutation of its status.
    pub fn begin(obj: &T) -> Self {
        Self(obj.clone())
    }

    /// computes the json patch between the snapshot and `mutated`.
    pub fn apply(&self, mutated: &T) -> Result<json_patch::Patch, serde_json::Error> {
        resource::diff(&self.0, mutated)
    }
}

pub type IftPatchBase = StatusPatch<InstalledFeature>;
pub type IftgPatchBase = StatusPatch<InstalledFeatureGroup>;

// -----------------------------------------------------------------------------
// CatalogueClient trait

#[async_trait]
pub trait CatalogueClient: Send + Sync {
    async fn load_ift(&self, key: &FeatureRef) -> Result<InstalledFeature, ClientError>;

    async fn save_ift(&self, ift: &InstalledFeature) -> Result<InstalledFeature, ClientError>;

    fn ift_patch_base(&self, ift: &InstalledFeature) -> IftPatchBase {
        StatusPatch::begin(ift)
    }

    async fn patch_ift_status(
        &self,
        ift: &InstalledFeature,
        base: IftPatchBase,
    ) -> Result<(), ClientError>;

    async fn load_iftg(&self, key: &FeatureRef) -> Result<InstalledFeatureGroup, ClientError>;

    async fn save_iftg(
        &self,
        iftg: &InstalledFeatureGroup,
    ) -> Result<InstalledFeatureGroup, ClientError>;

    fn iftg_patch_base(&self, iftg: &InstalledFeatureGroup) -> IftgPatchBase {
        StatusPatch::begin(iftg)
    }

    async fn patch_iftg_status(
        &self,
        iftg: &InstalledFeatureGroup,
        base: IftgPatchBase,
    ) -> Result<(), ClientError>;

    /// schedules a follow-up reconcile of the given feature.
    async fn reconcile_feature(&self, key: &FeatureRef);

    async fn info_event(&self, obj: &InstalledFeature, reason: &str, message: String);

    async fn warn_event(&self, obj: &InstalledFeature, reason: &str, message: String);
}
