//! # Reconcile module
//!
//! This module implements the reconcile pass for [`InstalledFeature`] and the
//! trivial sibling pass for [`InstalledFeatureGroup`]: finalizer toggle and
//! phase persistence only, no dependency graph.

use std::{
    fmt::{self, Display, Formatter},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::{stream, StreamExt};
use kube::{
    runtime::{controller, watcher, Controller},
    Api, Resource,
};
use tokio::sync::mpsc;

use crate::svc::{
    catalogue::{CatalogueClient, ClientError},
    crd::{FeatureRef, InstalledFeature, InstalledFeatureGroup, FINALIZER},
    k8s::{self, resource, Context, ControllerBuilder},
};

pub mod dependency;
pub mod dependent;
pub mod group;
pub mod phase;

// -----------------------------------------------------------------------------
// Reason enumeration

/// the event reason attached to every event emitted during a pass, classified
/// once at the top of the pass from the object's own state.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Reason {
    Create,
    Update,
    Delete,
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

fn classify<T>(obj: &T, finalizer_present: bool) -> Reason
where
    T: Resource,
{
    if resource::deleted(obj) {
        Reason::Delete
    } else if !finalizer_present {
        Reason::Create
    } else {
        Reason::Update
    }
}

// -----------------------------------------------------------------------------
// ReconcileError enum

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("catalogue client error, {0}")]
    Catalogue(#[from] ClientError),
    #[error("failed to reconcile resource, {0}")]
    Reconcile(String),
    #[error("feature has missing dependencies: {0}")]
    MissingDependencies(String),
}

impl From<kube::Error> for ReconcileError {
    fn from(err: kube::Error) -> Self {
        Self::Catalogue(ClientError::Kube(err))
    }
}

impl From<controller::Error<Self, watcher::Error>> for ReconcileError {
    fn from(err: controller::Error<ReconcileError, watcher::Error>) -> Self {
        Self::Reconcile(err.to_string())
    }
}

fn features_list(features: &[FeatureRef]) -> String {
    features
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// -----------------------------------------------------------------------------
// InstalledFeature reconciler

/// watches [`InstalledFeature`] objects. Besides the usual watch stream, it
/// can carry the receiving end of the catalogue client's follow-up reconcile
/// queue (see [`crate::svc::catalogue::client::KubeCatalogueClient`]): every
/// `ReconcileFeature` request collapses into a full rescan trigger, since
/// the dependency graph is cheap to re-walk and `kube`'s controller-runtime
/// has no cheaper "reconcile just this other key" primitive.
#[derive(Default)]
pub struct IftReconciler {
    trigger: Mutex<Option<mpsc::Receiver<FeatureRef>>>,
}

impl IftReconciler {
    pub fn new(trigger: mpsc::Receiver<FeatureRef>) -> Self {
        Self {
            trigger: Mutex::new(Some(trigger)),
        }
    }
}

impl ControllerBuilder<InstalledFeature> for IftReconciler {
    fn build(&self, ctx: Arc<Context>) -> Controller<InstalledFeature> {
        let controller = Controller::new(Api::all(ctx.kube.to_owned()), Default::default());

        let trigger = self
            .trigger
            .lock()
            .expect("reconcile trigger mutex poisoned")
            .take();

        match trigger {
            Some(rx) => {
                let triggers = stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|key| (key, rx))
                });
                controller.reconcile_all_on(triggers.map(|_| ()))
            }
            None => controller,
        }
    }
}

impl IftReconciler {
    /// runs the full C3 → C4 → C5 → C6 pipeline over `ift`, regardless of
    /// whether it is being created, updated, or deleted — the handlers
    /// themselves branch on `resource::deleted`.
    async fn pass(
        catalogue: &Arc<dyn CatalogueClient>,
        ift: Arc<InstalledFeature>,
    ) -> Result<(), ReconcileError> {
        let (namespace, name) = resource::namespaced_name(ift.as_ref());
        let subject = FeatureRef::new(namespace.to_owned(), name.to_owned());
        let finalizer_present = k8s::finalizer::contains(ift.as_ref(), FINALIZER);
        let reason = classify(ift.as_ref(), finalizer_present);

        let mut ift = (*ift).to_owned();

        // snapshot taken before C3/C4 mutate `ift.status` in place, so the
        // end-of-pass status patch (step 7) sees those mutations in its diff
        // instead of silently losing them — see resource::diff's contract.
        let base = catalogue.ift_patch_base(&ift);

        // ---------------------------------------------------------------------
        // Step 3: dependency resolver (C3)
        if let Err(err) = dependency::resolve(catalogue, &mut ift).await {
            catalogue
                .warn_event(
                    &ift,
                    &reason.to_string(),
                    format!("Could not update the dependencies of {subject}"),
                )
                .await;
            return Err(err);
        }

        let missing = ift
            .status
            .as_ref()
            .map(|status| status.missing_dependencies.to_owned())
            .unwrap_or_default();

        // A non-empty MissingDependencies list forces a requeue, but the rest
        // of the pass still runs to completion: the subject's status (phase,
        // the missing-dependencies list itself) must be persisted regardless,
        // so the error is deferred until after C4 → C5 → C6 have had their say.
        let mut deferred_error = None;

        if !missing.is_empty() {
            let list = features_list(&missing);
            catalogue
                .warn_event(
                    &ift,
                    &reason.to_string(),
                    format!("Feature has missing dependencies: {list}"),
                )
                .await;
            deferred_error = Some(ReconcileError::MissingDependencies(list));
        }

        // ---------------------------------------------------------------------
        // Step 4: dependent notifier (C4)
        if let Err(err) = dependent::notify(catalogue, &mut ift).await {
            catalogue
                .warn_event(
                    &ift,
                    &reason.to_string(),
                    format!("Could not handle the dependent features of {subject}"),
                )
                .await;
            return Err(err);
        }

        // ---------------------------------------------------------------------
        // Step 5: group membership (C5)
        if let Err(err) = group::reconcile(catalogue, &ift).await {
            catalogue
                .warn_event(
                    &ift,
                    &reason.to_string(),
                    format!("Could not handle the group relation of {subject}"),
                )
                .await;
            return Err(err);
        }

        // ---------------------------------------------------------------------
        // Step 6: finalizer toggle (C6, infallible)
        let (mut ift, finalizer_changed) = phase::toggle_finalizer(ift);

        // ---------------------------------------------------------------------
        // Step 7: phase + persistence (C6)
        if finalizer_changed {
            ift = match catalogue.save_ift(&ift).await {
                Ok(saved) => saved,
                Err(err) => {
                    catalogue
                        .warn_event(
                            &ift,
                            &reason.to_string(),
                            format!("Could not save the feature {namespace}/{name}: {err}"),
                        )
                        .await;
                    return Err(err.into());
                }
            };
        }

        let mut mutated = finalizer_changed;

        if let Some((phase, message)) = phase::derive_ift_phase(&ift) {
            let status = ift.status.get_or_insert_with(Default::default);
            status.phase = phase;
            status.message = message;

            if let Err(err) = catalogue.patch_ift_status(&ift, base).await {
                catalogue
                    .warn_event(
                        &ift,
                        &reason.to_string(),
                        format!("Could not save the status of feature {namespace}/{name}: {err}"),
                    )
                    .await;
                return Err(err.into());
            }

            mutated = true;
        }

        if let Some(err) = deferred_error {
            return Err(err);
        }

        // ---------------------------------------------------------------------
        // Step 8: success, only announced when this pass actually changed
        // something about the subject itself — an idempotent pass over an
        // already-converged object produces no patch and no event.
        if mutated {
            catalogue
                .info_event(
                    &ift,
                    &reason.to_string(),
                    format!("Changed feature {namespace}/{name}"),
                )
                .await;
        }

        Ok(())
    }
}

#[async_trait]
impl k8s::Reconciler<InstalledFeature> for IftReconciler {
    type Error = ReconcileError;

    async fn upsert(ctx: Arc<Context>, obj: Arc<InstalledFeature>) -> Result<(), Self::Error> {
        Self::pass(&ctx.catalogue, obj).await
    }

    async fn delete(ctx: Arc<Context>, obj: Arc<InstalledFeature>) -> Result<(), Self::Error> {
        Self::pass(&ctx.catalogue, obj).await
    }
}

// -----------------------------------------------------------------------------
// InstalledFeatureGroup reconciler
//
// trivial sibling: finalizer + phase only, no C3-C5 dependency graph.

#[derive(Clone, Default, Debug)]
pub struct IftgReconciler {}

impl ControllerBuilder<InstalledFeatureGroup> for IftgReconciler {
    fn build(&self, ctx: Arc<Context>) -> Controller<InstalledFeatureGroup> {
        Controller::new(Api::all(ctx.kube.to_owned()), Default::default())
    }
}

impl IftgReconciler {
    async fn pass(
        catalogue: &Arc<dyn CatalogueClient>,
        iftg: Arc<InstalledFeatureGroup>,
    ) -> Result<(), ReconcileError> {
        let (namespace, name) = resource::namespaced_name(iftg.as_ref());
        let (mut iftg, finalizer_changed) = phase::toggle_finalizer((*iftg).to_owned());

        if finalizer_changed {
            iftg = catalogue.save_iftg(&iftg).await?;
        }

        if let Some((phase, message)) = phase::derive_iftg_phase(&iftg) {
            let base = catalogue.iftg_patch_base(&iftg);
            let status = iftg.status.get_or_insert_with(Default::default);
            status.phase = phase;
            status.message = message;
            catalogue.patch_iftg_status(&iftg, base).await?;
        }

        tracing::info!(namespace = %namespace, name = %name, "Changed feature group");
        Ok(())
    }
}

#[async_trait]
impl k8s::Reconciler<InstalledFeatureGroup> for IftgReconciler {
    type Error = ReconcileError;

    async fn upsert(ctx: Arc<Context>, obj: Arc<InstalledFeatureGroup>) -> Result<(), Self::Error> {
        Self::pass(&ctx.catalogue, obj).await
    }

    async fn delete(ctx: Arc<Context>, obj: Arc<InstalledFeatureGroup>) -> Result<(), Self::Error> {
        Self::pass(&ctx.catalogue, obj).await
    }
}

#[cfg(test)]
mod tests {
    use kube::{Resource, ResourceExt};

    use super::*;
    use crate::svc::catalogue::fake::FakeCatalogueClient;
    use crate::svc::crd::{
        FeatureRef, InstalledFeatureGroupSpec, InstalledFeatureGroupStatus, InstalledFeatureSpec,
        InstalledFeatureStatus, Phase, FINALIZER,
    };

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
    async fn s1_create_with_finalizer() {
        let a = ift("default", "basic-feature");
        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&a).await.expect("seed subject");
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        IftReconciler::pass(&catalogue, Arc::new(a))
            .await
            .expect("pass to succeed");

        let a = fake
            .get_ift(&FeatureRef::new("default", "basic-feature"))
            .await
            .expect("subject to still exist");

        assert!(a.finalizers().contains(&FINALIZER.to_string()));
        assert_eq!(a.status.unwrap().phase, Phase::Provisioned);

        let info = fake.info_events.lock().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].1, "Changed feature default/basic-feature");
    }

    #[tokio::test]
    async fn s2_depends_on_missing() {
        let mut a = ift("default", "a");
        a.spec.depends = vec![FeatureRef::new("default", "other")];

        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&a).await.expect("seed subject");
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        let result = IftReconciler::pass(&catalogue, Arc::new(a)).await;
        assert!(result.is_err());

        let a = fake
            .get_ift(&FeatureRef::new("default", "a"))
            .await
            .expect("subject to still exist");
        assert_eq!(
            a.status.as_ref().unwrap().missing_dependencies,
            vec![FeatureRef::new("default", "other")]
        );
        assert_eq!(a.status.unwrap().phase, Phase::Pending);

        let warnings = fake.warn_events.lock().await;
        assert!(warnings
            .iter()
            .any(|(_, message)| message.starts_with("Feature has missing dependencies")));
    }

    #[tokio::test]
    async fn s3_depends_on_existing() {
        let mut a = ift("default", "a");
        a.spec.depends = vec![FeatureRef::new("default", "b")];
        let b = ift("default", "b");

        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&a).await.expect("seed subject");
        fake.save_ift(&b).await.expect("seed dependency");
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        IftReconciler::pass(&catalogue, Arc::new(a))
            .await
            .expect("pass to succeed");

        let a = fake
            .get_ift(&FeatureRef::new("default", "a"))
            .await
            .expect("subject to still exist");
        assert!(a.status.as_ref().unwrap().missing_dependencies.is_empty());
        assert_eq!(a.status.unwrap().phase, Phase::Provisioned);

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

    #[tokio::test]
    async fn s6_group_wiring() {
        let mut a = ift("default", "a");
        a.spec.group = Some(FeatureRef::new("default", "g"));

        let mut g = InstalledFeatureGroup::new(
            "g",
            InstalledFeatureGroupSpec {
                provider: "acme".into(),
                description: "".into(),
                uri: "".into(),
            },
        );
        g.meta_mut().namespace = Some("default".to_string());
        g.status = Some(InstalledFeatureGroupStatus::default());

        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&a).await.expect("seed subject");
        fake.save_iftg(&g).await.expect("seed group");
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        IftReconciler::pass(&catalogue, Arc::new(a))
            .await
            .expect("pass to succeed");

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
    async fn s4_dependency_begins_deletion() {
        let mut a = ift("default", "a");
        a.spec.depends = vec![FeatureRef::new("default", "b")];

        let mut b = ift("default", "b");
        b.meta_mut().deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );

        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&a).await.expect("seed subject");
        fake.save_ift(&b).await.expect("seed dependency");
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        let result = IftReconciler::pass(&catalogue, Arc::new(a)).await;
        assert!(result.is_err());

        let a = fake
            .get_ift(&FeatureRef::new("default", "a"))
            .await
            .expect("subject to still exist");
        assert_eq!(
            a.status.as_ref().unwrap().missing_dependencies,
            vec![FeatureRef::new("default", "b")]
        );
        assert_eq!(a.status.unwrap().phase, Phase::Pending);

        let warnings = fake.warn_events.lock().await;
        assert!(warnings
            .iter()
            .any(|(_, message)| message.starts_with("Feature has missing dependencies")));
    }

    #[tokio::test]
    async fn s5_subject_deletion_with_dependent_alive() {
        let mut a = ift("default", "a");
        a.meta_mut().finalizers = Some(vec![FINALIZER.to_string()]);
        a.meta_mut().deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        a.status = Some(InstalledFeatureStatus {
            depending_features: vec![FeatureRef::new("default", "b")],
            ..Default::default()
        });

        let b = ift("default", "b");

        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&a).await.expect("seed subject");
        fake.save_ift(&b).await.expect("seed dependent");
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        IftReconciler::pass(&catalogue, Arc::new(a))
            .await
            .expect("pass to succeed");

        let b = fake
            .get_ift(&FeatureRef::new("default", "b"))
            .await
            .expect("dependent to still exist");
        assert_eq!(
            b.status.unwrap().missing_dependencies,
            vec![FeatureRef::new("default", "a")]
        );
    }

    #[tokio::test]
    async fn s7_status_patch_conflict() {
        let a = ift("default", "basic-feature");

        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&a).await.expect("seed subject");
        fake.fail_next_ift_patch(FeatureRef::new("default", "basic-feature"))
            .await;
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        let result = IftReconciler::pass(&catalogue, Arc::new(a)).await;
        assert!(result.is_err());

        let warnings = fake.warn_events.lock().await;
        assert!(warnings
            .iter()
            .any(|(_, message)| message.starts_with("Could not save the status of feature")));
    }

    #[tokio::test]
    async fn idempotent_second_pass_emits_no_further_changes() {
        let mut a = ift("default", "a");
        a.meta_mut().finalizers = Some(vec![FINALIZER.to_string()]);
        a.status = Some(InstalledFeatureStatus {
            phase: Phase::Provisioned,
            ..Default::default()
        });

        let fake = Arc::new(FakeCatalogueClient::new());
        fake.save_ift(&a).await.expect("seed subject");
        let catalogue: Arc<dyn CatalogueClient> = fake.clone();

        IftReconciler::pass(&catalogue, Arc::new(a))
            .await
            .expect("pass to succeed");

        let calls = fake.calls.lock().await;
        assert!(!calls.iter().any(|c| c.starts_with("patch_ift_status")));
        assert!(!calls.iter().any(|c| c.starts_with("save_ift")));
    }
}
