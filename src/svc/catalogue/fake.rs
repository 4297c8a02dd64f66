//! # In-memory catalogue client, for tests
//!
//! Records call order in addition to storing objects, so reconcile handler
//! tests can assert both on the resulting state and on what was actually
//! invoked (e.g. that `reconcile_feature` was requested for a given key).

use std::collections::HashMap;

use kube::ResourceExt;
use tokio::sync::Mutex;

use crate::svc::catalogue::{CatalogueClient, ClientError, IftPatchBase, IftgPatchBase};
use crate::svc::crd::{FeatureRef, InstalledFeature, InstalledFeatureGroup};

#[derive(Default)]
pub struct FakeCatalogueClient {
    ifts: Mutex<HashMap<FeatureRef, InstalledFeature>>,
    iftgs: Mutex<HashMap<FeatureRef, InstalledFeatureGroup>>,
    pub calls: Mutex<Vec<String>>,
    pub reconciled: Mutex<Vec<FeatureRef>>,
    pub info_events: Mutex<Vec<(String, String)>>,
    pub warn_events: Mutex<Vec<(String, String)>>,
    fail_next_ift_patch: Mutex<Option<FeatureRef>>,
}

impl FakeCatalogueClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// arms a one-shot stale-version conflict for the next `patch_ift_status`
    /// call against `key`, simulating a rejected cluster-API patch.
    pub async fn fail_next_ift_patch(&self, key: FeatureRef) {
        *self.fail_next_ift_patch.lock().await = Some(key);
    }

    pub async fn with_ift(self, ift: InstalledFeature) -> Self {
        let key = FeatureRef::new(
            ift.namespace().expect("test fixtures to be namespaced"),
            ift.name_any(),
        );
        self.ifts.lock().await.insert(key, ift);
        self
    }

    pub async fn with_iftg(self, iftg: InstalledFeatureGroup) -> Self {
        let key = FeatureRef::new(
            iftg.namespace().expect("test fixtures to be namespaced"),
            iftg.name_any(),
        );
        self.iftgs.lock().await.insert(key, iftg);
        self
    }

    pub async fn get_ift(&self, key: &FeatureRef) -> Option<InstalledFeature> {
        self.ifts.lock().await.get(key).cloned()
    }

    pub async fn get_iftg(&self, key: &FeatureRef) -> Option<InstalledFeatureGroup> {
        self.iftgs.lock().await.get(key).cloned()
    }

    async fn record(&self, call: impl Into<String>) {
        self.calls.lock().await.push(call.into());
    }
}

#[async_trait::async_trait]
impl CatalogueClient for FakeCatalogueClient {
    async fn load_ift(&self, key: &FeatureRef) -> Result<InstalledFeature, ClientError> {
        self.record(format!("load_ift({key})")).await;
        self.ifts
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(key.to_owned()))
    }

    async fn save_ift(&self, ift: &InstalledFeature) -> Result<InstalledFeature, ClientError> {
        let key = FeatureRef::new(
            ift.namespace().expect("fixture to be namespaced"),
            ift.name_any(),
        );
        self.record(format!("save_ift({key})")).await;
        self.ifts.lock().await.insert(key, ift.to_owned());
        Ok(ift.to_owned())
    }

    async fn patch_ift_status(
        &self,
        ift: &InstalledFeature,
        base: IftPatchBase,
    ) -> Result<(), ClientError> {
        let key = FeatureRef::new(
            ift.namespace().expect("fixture to be namespaced"),
            ift.name_any(),
        );

        let mut fail = self.fail_next_ift_patch.lock().await;
        if fail.as_ref() == Some(&key) {
            *fail = None;
            drop(fail);
            return Err(ClientError::Kube(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "the object has been modified; please apply your changes to the latest version and try again".to_string(),
                reason: "Conflict".to_string(),
                code: 409,
            })));
        }
        drop(fail);

        let patch = base.apply(ift)?;
        self.record(format!("patch_ift_status({key})")).await;

        let mut ifts = self.ifts.lock().await;
        let stored = ifts.get(&key).cloned().unwrap_or_else(|| ift.to_owned());
        let mut value = serde_json::to_value(&stored).map_err(ClientError::Diff)?;
        json_patch::patch(&mut value, &patch)?;
        ifts.insert(key, serde_json::from_value(value).map_err(ClientError::Diff)?);
        Ok(())
    }

    async fn load_iftg(&self, key: &FeatureRef) -> Result<InstalledFeatureGroup, ClientError> {
        self.record(format!("load_iftg({key})")).await;
        self.iftgs
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(key.to_owned()))
    }

    async fn save_iftg(
        &self,
        iftg: &InstalledFeatureGroup,
    ) -> Result<InstalledFeatureGroup, ClientError> {
        let key = FeatureRef::new(
            iftg.namespace().expect("fixture to be namespaced"),
            iftg.name_any(),
        );
        self.record(format!("save_iftg({key})")).await;
        self.iftgs.lock().await.insert(key, iftg.to_owned());
        Ok(iftg.to_owned())
    }

    async fn patch_iftg_status(
        &self,
        iftg: &InstalledFeatureGroup,
        base: IftgPatchBase,
    ) -> Result<(), ClientError> {
        let patch = base.apply(iftg)?;
        let key = FeatureRef::new(
            iftg.namespace().expect("fixture to be namespaced"),
            iftg.name_any(),
        );
        self.record(format!("patch_iftg_status({key})")).await;

        let mut iftgs = self.iftgs.lock().await;
        let stored = iftgs.get(&key).cloned().unwrap_or_else(|| iftg.to_owned());
        let mut value = serde_json::to_value(&stored).map_err(ClientError::Diff)?;
        json_patch::patch(&mut value, &patch)?;
        iftgs.insert(key, serde_json::from_value(value).map_err(ClientError::Diff)?);
        Ok(())
    }

    async fn reconcile_feature(&self, key: &FeatureRef) {
        self.record(format!("reconcile_feature({key})")).await;
        self.reconciled.lock().await.push(key.to_owned());
    }

    async fn info_event(&self, _obj: &InstalledFeature, reason: &str, message: String) {
        self.record(format!("info_event({reason})")).await;
        self.info_events
            .lock()
            .await
            .push((reason.to_string(), message));
    }

    async fn warn_event(&self, _obj: &InstalledFeature, reason: &str, message: String) {
        self.record(format!("warn_event({reason})")).await;
        self.warn_events
            .lock()
            .await
            .push((reason.to_string(), message));
    }
}
