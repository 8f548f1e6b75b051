//! Selective merge of an SvnServer's pod template into a StatefulSet.
//!
//! Only what the server specifies is written. Everything else on the
//! workload (fields set by other controllers, API defaults) is left alone.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, PersistentVolumeClaim, Volume};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use svnop_core::{SvnServer, CONTAINER_NAME_SVN, VOLUME_NAME_CONFIG, VOLUME_NAME_REPOS};

use crate::desired::svn_container;

/// Patch `ss` in place so it reflects `server`.
///
/// The `repos` claim template, `config` volume and `svn` container are located
/// by name and appended when missing. The image falls back to `default_image`.
pub fn override_with_pod_template(server: &SvnServer, ss: &mut StatefulSet, default_image: &str) {
    let pt = &server.spec.pod_template;
    let spec = ss.spec.get_or_insert_with(Default::default);

    let claims = spec.volume_claim_templates.get_or_insert_with(Vec::new);
    let claim = slot_by_name(
        claims,
        VOLUME_NAME_REPOS,
        |c| c.metadata.name.as_deref(),
        || PersistentVolumeClaim {
            metadata: ObjectMeta { name: Some(VOLUME_NAME_REPOS.to_string()), ..Default::default() },
            ..Default::default()
        },
    );
    *claim = server.spec.volume_claim_template.clone();
    claim.metadata.name = Some(VOLUME_NAME_REPOS.to_string());

    let pod = spec.template.spec.get_or_insert_with(Default::default);
    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    let volume = slot_by_name(volumes, VOLUME_NAME_CONFIG, |v| Some(v.name.as_str()), || Volume {
        name: VOLUME_NAME_CONFIG.to_string(),
        ..Default::default()
    });
    *volume = Volume {
        name: VOLUME_NAME_CONFIG.to_string(),
        config_map: Some(ConfigMapVolumeSource { name: Some(server.name_any()), ..Default::default() }),
        ..Default::default()
    };

    let container = slot_by_name(&mut pod.containers, CONTAINER_NAME_SVN, |c| Some(c.name.as_str()), || {
        svn_container(default_image)
    });
    let image = pt.image.as_deref().filter(|i| !i.is_empty()).unwrap_or(default_image);
    container.image = Some(image.to_string());

    if !pt.node_selector.is_empty() {
        pod.node_selector = Some(pt.node_selector.clone());
    }
    if let Some(sa) = pt.service_account_name.as_ref().filter(|s| !s.is_empty()) {
        pod.service_account_name = Some(sa.clone());
    }
    if !pt.image_pull_secrets.is_empty() {
        pod.image_pull_secrets = Some(pt.image_pull_secrets.clone());
    }
    if let Some(affinity) = &pt.affinity {
        pod.affinity = Some(affinity.clone());
    }
    if !pt.tolerations.is_empty() {
        pod.tolerations = Some(pt.tolerations.clone());
    }
}

/// Locate the element named `name`, appending `make()` when there is none.
fn slot_by_name<'a, T>(
    items: &'a mut Vec<T>,
    name: &str,
    key: impl Fn(&T) -> Option<&str>,
    make: impl FnOnce() -> T,
) -> &'a mut T {
    let idx = match items.iter().position(|it| key(it) == Some(name)) {
        Some(idx) => idx,
        None => {
            items.push(make());
            items.len() - 1
        }
    };
    &mut items[idx]
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Affinity, Container, LocalObjectReference, NodeAffinity, PersistentVolumeClaimSpec, PodSpec, Toleration,
    };
    use std::collections::BTreeMap;
    use svnop_core::SvnServerSpec;

    fn server() -> SvnServer {
        let mut s = SvnServer::new("alpha", SvnServerSpec::default());
        s.metadata.namespace = Some("team".into());
        s
    }

    fn pod(ss: &StatefulSet) -> &PodSpec {
        ss.spec.as_ref().and_then(|s| s.template.spec.as_ref()).unwrap()
    }

    fn existing() -> StatefulSet {
        let mut ss = StatefulSet::default();
        let spec = ss.spec.get_or_insert_with(Default::default);
        spec.template.spec = Some(PodSpec {
            containers: vec![
                Container { name: "sidecar".into(), image: Some("busybox".into()), ..Default::default() },
                Container { name: "svn".into(), image: Some("old".into()), args: Some(vec!["-v".into()]), ..Default::default() },
            ],
            node_selector: Some(BTreeMap::from([("zone".to_string(), "a".to_string())])),
            service_account_name: Some("keep-me".into()),
            ..Default::default()
        });
        ss
    }

    #[test]
    fn empty_shell_gets_all_three_slots() {
        let mut ss = StatefulSet::default();
        override_with_pod_template(&server(), &mut ss, "svn:1");
        let p = pod(&ss);
        assert_eq!(p.containers.len(), 1);
        assert_eq!(p.volumes.as_ref().map(Vec::len), Some(1));
        let claims = ss.spec.as_ref().and_then(|s| s.volume_claim_templates.as_ref()).unwrap();
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn existing_container_is_patched_in_place() {
        let mut ss = existing();
        override_with_pod_template(&server(), &mut ss, "svn:1");
        let p = pod(&ss);
        let names: Vec<_> = p.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["sidecar", "svn"]);
        assert_eq!(p.containers[1].image.as_deref(), Some("svn:1"));
        // fields we do not own survive
        assert_eq!(p.containers[1].args, Some(vec!["-v".to_string()]));
        assert_eq!(p.containers[0].image.as_deref(), Some("busybox"));
    }

    #[test]
    fn unspecified_template_fields_leave_workload_untouched() {
        let mut ss = existing();
        override_with_pod_template(&server(), &mut ss, "svn:1");
        let p = pod(&ss);
        assert_eq!(p.node_selector, Some(BTreeMap::from([("zone".to_string(), "a".to_string())])));
        assert_eq!(p.service_account_name.as_deref(), Some("keep-me"));
        assert!(p.affinity.is_none());
        assert!(p.tolerations.is_none());
        assert!(p.image_pull_secrets.is_none());
    }

    #[test]
    fn specified_template_fields_overwrite() {
        let mut s = server();
        let pt = &mut s.spec.pod_template;
        pt.image = Some("svn:custom".into());
        pt.node_selector = BTreeMap::from([("disk".to_string(), "ssd".to_string())]);
        pt.service_account_name = Some("svn-sa".into());
        pt.image_pull_secrets = vec![LocalObjectReference { name: Some("regcred".into()) }];
        pt.affinity = Some(Affinity { node_affinity: Some(NodeAffinity::default()), ..Default::default() });
        pt.tolerations = vec![Toleration { key: Some("dedicated".into()), ..Default::default() }];

        let mut ss = existing();
        override_with_pod_template(&s, &mut ss, "svn:1");
        let p = pod(&ss);
        assert_eq!(p.containers[1].image.as_deref(), Some("svn:custom"));
        assert_eq!(p.node_selector, Some(BTreeMap::from([("disk".to_string(), "ssd".to_string())])));
        assert_eq!(p.service_account_name.as_deref(), Some("svn-sa"));
        assert_eq!(p.image_pull_secrets.as_ref().map(Vec::len), Some(1));
        assert!(p.affinity.as_ref().and_then(|a| a.node_affinity.as_ref()).is_some());
        assert_eq!(p.tolerations.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn empty_image_override_falls_back_to_default() {
        let mut s = server();
        s.spec.pod_template.image = Some(String::new());
        let mut ss = StatefulSet::default();
        override_with_pod_template(&s, &mut ss, "svn:default");
        assert_eq!(pod(&ss).containers[0].image.as_deref(), Some("svn:default"));
    }

    #[test]
    fn claim_template_is_replaced_and_renamed() {
        let mut s = server();
        s.spec.volume_claim_template = PersistentVolumeClaim {
            metadata: ObjectMeta { name: Some("whatever".into()), ..Default::default() },
            spec: Some(PersistentVolumeClaimSpec { storage_class_name: Some("fast".into()), ..Default::default() }),
            ..Default::default()
        };
        let mut ss = StatefulSet::default();
        ss.spec.get_or_insert_with(Default::default).volume_claim_templates = Some(vec![
            PersistentVolumeClaim { metadata: ObjectMeta { name: Some("cache".into()), ..Default::default() }, ..Default::default() },
            PersistentVolumeClaim { metadata: ObjectMeta { name: Some("repos".into()), ..Default::default() }, ..Default::default() },
        ]);
        override_with_pod_template(&s, &mut ss, "svn:1");
        let claims = ss.spec.unwrap().volume_claim_templates.unwrap();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].metadata.name.as_deref(), Some("cache"));
        assert_eq!(claims[1].metadata.name.as_deref(), Some("repos"));
        assert_eq!(claims[1].spec.as_ref().and_then(|s| s.storage_class_name.as_deref()), Some("fast"));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut once = existing();
        override_with_pod_template(&server(), &mut once, "svn:1");
        let mut twice = once.clone();
        override_with_pod_template(&server(), &mut twice, "svn:1");
        assert_eq!(once, twice);
    }
}
