//! # Group membership manager (C5)
//!
//! Keeps the IFTG named by `spec.group` in agreement with the subject IFT:
//! present in `status.features` while alive, removed once deleting.

use std::sync::Arc;

use tracing::debug;

use crate::svc::{
    catalogue::CatalogueClient,
    crd::{FeatureRef, InstalledFeature},
    k8s::resource,
    reconcile::ReconcileError,
};

/// reconciles group membership for `ift`. Returns whether the IFTG's status
/// was patched (the subject itself is never mutated by this handler).
pub async fn reconcile(
    catalogue: &Arc<dyn CatalogueClient>,
    ift: &InstalledFeature,
) -> Result<bool, ReconcileError> {
    let group = match &ift.spec.group {
        Some(group) => group.to_owned(),
        None => return Ok(false),
    };

    debug!(group = %group, "Reconcile group membership");

    let (namespace, name) = resource::namespaced_name(ift);
    let subject = FeatureRef::new(namespace, name);
    let deleting = resource::deleted(ift);

    let iftg = catalogue.load_iftg(&group).await?;
    let base = catalogue.iftg_patch_base(&iftg);
    let mut iftg = iftg;
    let status = iftg.status.get_or_insert_with(Default::default);

    let position = status.features.iter().position(|f| f == &subject);

    match (position, deleting) {
        (Some(_), false) => return Ok(false),
        (Some(index), true) => {
            // swap-with-last-then-truncate: order is not semantically
            // significant, and the truncated vec is written back below
            // (unlike the source, which in at least one revision discards it).
            status.features.swap_remove(index);
        }
        (None, false) => status.features.push(subject),
        (None, true) => return Ok(false),
    }

    catalogue.patch_iftg_status(&iftg, base).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use kube::Resource;

    use super::*;
    use crate::svc::catalogue::fake::FakeCatalogueClient;
    use crate::svc::crd::{
        InstalledFeatureGroup, InstalledFeatureGroupSpec, InstalledFeatureGroupStatus,
        InstalledFeatureSpec,
    };

    fn ift(namespace: &str, name: &str, group: Option<FeatureRef>) -> InstalledFeature {
        let mut ift = InstalledFeature::new(
            name,
            InstalledFeatureSpec {
                group,
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

    fn iftg(namespace: &str, name: &str) -> InstalledFeatureGroup {
        let mut iftg = InstalledFeatureGroup::new(
            name,
            InstalledFeatureGroupSpec {
                provider: "acme".into(),
                description: "".into(),
                uri: "".into(),
            },
        );
        iftg.meta_mut().namespace = Some(namespace.to_string());
        iftg
    }

    #[tokio::test]
    async fn appends_to_group_when_absent_and_alive() {
        let a = ift("default", "a", Some(FeatureRef::new("default", "g")));
        let g = iftg("default", "g");

        let fake = std::sync::Arc::new(FakeCatalogueClient::new());
        fake.save_iftg(&g).await.expect("seed group");
        let catalogue: std::sync::Arc<dyn CatalogueClient> = fake.clone();

        let changed = reconcile(&catalogue, &a).await.expect("reconcile to succeed");
        assert!(changed);

        let g = fake
            .get_iftg(&FeatureRef::new("default", "g"))
            .await
            .expect("group to still exist");
        assert_eq!(
            g.status.unwrap().features,
            vec![FeatureRef::new("default", "a")]
        );
    }

    #[tokio::test]
    async fn writes_back_truncated_list_on_removal() {
        let mut a = ift("default", "a", Some(FeatureRef::new("default", "g")));
        a.meta_mut().deletion_timestamp = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
            chrono::Utc::now(),
        ));

        let mut g = iftg("default", "g");
        g.status = Some(InstalledFeatureGroupStatus {
            features: vec![FeatureRef::new("default", "a"), FeatureRef::new("default", "b")],
            ..Default::default()
        });

        let fake = std::sync::Arc::new(FakeCatalogueClient::new());
        fake.save_iftg(&g).await.expect("seed group");
        let catalogue: std::sync::Arc<dyn CatalogueClient> = fake.clone();

        let changed = reconcile(&catalogue, &a).await.expect("reconcile to succeed");
        assert!(changed);

        let g = fake
            .get_iftg(&FeatureRef::new("default", "g"))
            .await
            .expect("group to still exist");
        assert_eq!(
            g.status.unwrap().features,
            vec![FeatureRef::new("default", "b")]
        );
    }
}
