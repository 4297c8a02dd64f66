//! # Dependent notifier (C4)
//!
//! Walks the subject's `status.depending-features` back-links and updates
//! each dependent's `missing-dependencies` list to reflect whether the
//! subject is alive, deleting, or gone.

use std::sync::Arc;

use tracing::debug;

use crate::svc::{
    catalogue::{CatalogueClient, ClientError},
    crd::{FeatureRef, InstalledFeature},
    k8s::resource,
    reconcile::ReconcileError,
};

/// removes `feature` from `list` if present, reporting whether it was there.
fn clear_missing(list: &mut Vec<FeatureRef>, feature: &FeatureRef) -> bool {
    let before = list.len();
    list.retain(|f| f != feature);
    list.len() != before
}

/// idempotently adds `feature` to `list`, using [`FeatureRef`] equality.
fn mark_missing(list: &mut Vec<FeatureRef>, feature: &FeatureRef) {
    if !list.contains(feature) {
        list.push(feature.to_owned());
    }
}

/// notifies every feature depending on `ift`, mutating their
/// `missing-dependencies` lists. Returns whether `ift` itself was mutated
/// (stale back-links removed from its own `depending-features`).
pub async fn notify(
    catalogue: &Arc<dyn CatalogueClient>,
    ift: &mut InstalledFeature,
) -> Result<bool, ReconcileError> {
    let (namespace, name) = resource::namespaced_name(ift);
    let subject = FeatureRef::new(namespace, name);
    let deleting = resource::deleted(ift);

    let dependents = ift
        .status
        .as_ref()
        .map(|status| status.depending_features.to_owned())
        .unwrap_or_default();

    if dependents.is_empty() {
        return Ok(false);
    }

    let mut stale = Vec::new();
    let mut load_failed = false;

    for dependent_ref in &dependents {
        debug!(dependent = %dependent_ref, "Notify dependent feature");

        let dependent = match catalogue.load_ift(dependent_ref).await {
            Ok(dependent) => dependent,
            Err(ClientError::NotFound(_)) => {
                stale.push(dependent_ref.to_owned());
                continue;
            }
            Err(_) => {
                load_failed = true;
                continue;
            }
        };

        let base = catalogue.ift_patch_base(&dependent);
        let mut dependent = dependent;
        let status = dependent.status.get_or_insert_with(Default::default);

        if deleting {
            mark_missing(&mut status.missing_dependencies, &subject);
        } else {
            clear_missing(&mut status.missing_dependencies, &subject);
        }

        catalogue.patch_ift_status(&dependent, base).await?;

        if deleting && resource::deleted(&dependent) {
            catalogue.reconcile_feature(dependent_ref).await;
        }
    }

    if load_failed {
        return Err(ReconcileError::Reconcile(format!(
            "failed to load one or more dependents of '{subject}'"
        )));
    }

    if stale.is_empty() {
        return Ok(false);
    }

    if let Some(status) = ift.status.as_mut() {
        status
            .depending_features
            .retain(|f| !stale.contains(f));
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kube::Resource;

    use super::*;
    use crate::svc::catalogue::fake::FakeCatalogueClient;
    use crate::svc::crd::{InstalledFeatureSpec, InstalledFeatureStatus};

    fn ift(namespace: &str, name: &str) -> InstalledFeature {
        let mut ift = InstalledFeature::new(
            name,
            InstalledFeatureSpec {
                group: None,
                kind: "feature".into(),
                version: "1".into(),
                provider: "acme".into(),
                description: "".into(),
                uri: "".into(),
                depends: vec![],
                conflicts: vec![],
            },
        );
        ift.meta_mut().namespace = Some(namespace.to_string());
        ift
    }

    #[tokio::test]
    async fn clears_missing_dependency_on_alive_subject() {
        let mut a = ift("default", "a");
        a.status = Some(InstalledFeatureStatus {
            depending_features: vec![FeatureRef::new("default", "b")],
            ..Default::default()
        });

        let mut b = ift("default", "b");
        b.status = Some(InstalledFeatureStatus {
            missing_dependencies: vec![FeatureRef::new("default", "a")],
            ..Default::default()
        });

        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&b).await.expect("seed dependent");
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        let changed = notify(&catalogue, &mut a).await.expect("notify to succeed");
        assert!(!changed);

        let b = fake
            .get_ift(&FeatureRef::new("default", "b"))
            .await
            .expect("dependent to still exist");
        assert!(b.status.unwrap().missing_dependencies.is_empty());
    }

    #[tokio::test]
    async fn drops_stale_back_link_when_dependent_gone() {
        let mut a = ift("default", "a");
        a.status = Some(InstalledFeatureStatus {
            depending_features: vec![FeatureRef::new("default", "gone")],
            ..Default::default()
        });

        let fake: Arc<dyn CatalogueClient> = Arc::new(FakeCatalogueClient::new());
        let changed = notify(&fake, &mut a).await.expect("notify to succeed");

        assert!(changed);
        assert!(a.status.unwrap().depending_features.is_empty());
    }
}
