//! # Dependency resolver (C3)
//!
//! For every feature the subject declares in `spec.depends`, locates it,
//! keeps the dependency's `depending-features` back-link in agreement, and
//! records absent or deleting dependencies on the subject's own
//! `missing-dependencies` list.

use std::sync::Arc;

use tracing::debug;

use crate::svc::{
    catalogue::CatalogueClient,
    crd::{FeatureRef, InstalledFeature},
    k8s::resource,
    reconcile::ReconcileError,
};

/// idempotently adds `feature` to `list`, using [`FeatureRef`] equality.
fn mark_missing(list: &mut Vec<FeatureRef>, feature: &FeatureRef) {
    if !list.contains(feature) {
        list.push(feature.to_owned());
    }
}

/// resolves every declared dependency of `ift`, mutating its
/// `status.missing-dependencies` list and the back-links on the
/// dependencies themselves.
///
/// Returns whether `ift`'s own status was mutated. Does not itself decide the
/// error-requeue policy for a non-empty `missing-dependencies` set after the
/// loop — the caller (C2) inspects the resulting status and emits the
/// "Feature has missing dependencies" warning.
pub async fn resolve(
    catalogue: &Arc<dyn CatalogueClient>,
    ift: &mut InstalledFeature,
) -> Result<bool, ReconcileError> {
    let (namespace, name) = resource::namespaced_name(ift);
    let subject = FeatureRef::new(namespace, name);
    let deleting = resource::deleted(ift);
    let mut changed = false;

    for dep in ift.spec.depends.to_owned() {
        debug!(dependency = %dep, "Resolve declared dependency");

        let dependency = match catalogue.load_ift(&dep).await {
            Ok(dependency) => dependency,
            Err(_) => {
                mark_missing(&mut ift.status.get_or_insert_with(Default::default).missing_dependencies, &dep);
                changed = true;
                continue;
            }
        };

        if resource::deleted(&dependency) {
            mark_missing(&mut ift.status.get_or_insert_with(Default::default).missing_dependencies, &dep);
            changed = true;
            continue;
        }

        if !deleting {
            let base = catalogue.ift_patch_base(&dependency);
            let mut dependency = dependency;
            let status = dependency.status.get_or_insert_with(Default::default);

            if !status.depending_features.contains(&subject) {
                status.depending_features.push(subject.to_owned());
                catalogue.patch_ift_status(&dependency, base).await?;
            }
        }

        catalogue.reconcile_feature(&dep).await;
    }

    Ok(changed)
}

#[cfg(test)]
mod tests {
    use kube::Resource;

    use super::*;
    use crate::svc::catalogue::fake::FakeCatalogueClient;

    fn ift(namespace: &str, name: &str) -> InstalledFeature {
        let mut ift = InstalledFeature::new(
            name,
            crate::svc::crd::InstalledFeatureSpec {
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
    async fn marks_missing_dependency_as_missing() {
        let mut a = ift("default", "a");
        a.spec.depends = vec![FeatureRef::new("default", "other")];

        let catalogue: Arc<dyn CatalogueClient> = Arc::new(FakeCatalogueClient::new());
        let changed = resolve(&catalogue, &mut a).await.expect("resolve to succeed");

        assert!(changed);
        assert_eq!(
            a.status.unwrap().missing_dependencies,
            vec![FeatureRef::new("default", "other")]
        );
    }

    #[tokio::test]
    async fn registers_back_link_on_existing_dependency() {
        let mut a = ift("default", "a");
        a.spec.depends = vec![FeatureRef::new("default", "b")];
        let b = ift("default", "b");

        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&b).await.expect("seed dependency");
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        let changed = resolve(&catalogue, &mut a).await.expect("resolve to succeed");
        assert!(!changed);

        let b = fake
            .get_ift(&FeatureRef::new("default", "b"))
            .await
            .expect("dependency to still exist");
        assert_eq!(
            b.status.unwrap().depending_features,
            vec![FeatureRef::new("default", "a")]
        );

        assert_eq!(
            fake.reconciled.lock().await.as_slice(),
            &[FeatureRef::new("default", "b")]
        );
    }
}
