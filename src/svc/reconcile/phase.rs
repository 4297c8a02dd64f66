//! # Finalizer & phase controller (C6)
//!
//! Two pure computations, run in sequence at the end of a reconcile pass:
//! the finalizer toggle (in-memory, infallible) and the phase/message
//! derivation that gets persisted.

use crate::svc::crd::{InstalledFeature, InstalledFeatureGroup, Phase, FINALIZER};

/// toggles the controller-owned finalizer to match the object's deletion
/// state. Returns whether the finalizer list was mutated.
pub fn toggle_finalizer<T>(obj: T) -> (T, bool)
where
    T: kube::Resource + Clone,
{
    use crate::svc::k8s::{finalizer, resource};

    let deleting = resource::deleted(&obj);
    let present = finalizer::contains(&obj, FINALIZER);

    match (present, deleting) {
        (false, false) => (finalizer::add(obj, FINALIZER), true),
        (true, true) => (finalizer::remove(obj, FINALIZER), true),
        _ => (obj, false),
    }
}

/// computes the derived `(phase, message)` for an IFT from its own status,
/// per spec.md §4.6 step 3. Returns `None` if nothing should change.
///
/// A never-observed status (the object has no `status` subresource yet) is
/// treated as the empty default, matching spec.md's "initial observed state
/// is empty string, treated as needs promotion" — it is not a reason to skip
/// the computation.
pub fn derive_ift_phase(ift: &InstalledFeature) -> Option<(Phase, String)> {
    let status = ift.status.clone().unwrap_or_default();

    if !status.missing_dependencies.is_empty() {
        return Some((Phase::Pending, "dependencies are missing".to_string()));
    }

    if !status.conflicting_features.is_empty() {
        return Some((
            Phase::Pending,
            "there are conflicting features".to_string(),
        ));
    }

    if status.phase != Phase::Provisioned {
        return Some((Phase::Provisioned, String::new()));
    }

    None
}

/// the IFTG sibling of [`derive_ift_phase`]: groups have no dependency graph
/// of their own, so the only transition is the initial promotion to
/// `provisioned` once observed.
pub fn derive_iftg_phase(iftg: &InstalledFeatureGroup) -> Option<(Phase, String)> {
    let status = iftg.status.clone().unwrap_or_default();

    if status.phase != Phase::Provisioned {
        return Some((Phase::Provisioned, String::new()));
    }

    None
}

#[cfg(test)]
mod tests {
    use kube::ResourceExt;

    use super::*;
    use crate::svc::crd::{InstalledFeatureSpec, InstalledFeatureStatus};

    fn ift() -> InstalledFeature {
        InstalledFeature::new(
            "a",
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
        )
    }

    #[test]
    fn adds_finalizer_on_fresh_object() {
        let (obj, changed) = toggle_finalizer(ift());
        assert!(changed);
        assert!(obj.finalizers().contains(&FINALIZER.to_string()));
    }

    #[test]
    fn pending_when_missing_dependencies() {
        let mut a = ift();
        a.status = Some(InstalledFeatureStatus {
            missing_dependencies: vec![crate::svc::crd::FeatureRef::new("default", "b")],
            ..Default::default()
        });

        let (phase, message) = derive_ift_phase(&a).expect("phase to change");
        assert_eq!(phase, Phase::Pending);
        assert_eq!(message, "dependencies are missing");
    }

    #[test]
    fn provisioned_when_clear() {
        let mut a = ift();
        a.status = Some(InstalledFeatureStatus::default());

        let (phase, _) = derive_ift_phase(&a).expect("phase to change");
        assert_eq!(phase, Phase::Provisioned);
    }

    #[test]
    fn idempotent_once_provisioned() {
        let mut a = ift();
        a.status = Some(InstalledFeatureStatus {
            phase: Phase::Provisioned,
            ..Default::default()
        });

        assert!(derive_ift_phase(&a).is_none());
    }
}
