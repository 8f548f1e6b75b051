//! Desired shapes of the objects owned by an SvnServer.

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, HTTPGetAction, PodTemplateSpec, Probe, Service, ServicePort, ServiceSpec,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use svnop_core::{
    labels_for, SvnServer, CONTAINER_NAME_SVN, HTTP_PORT, HTTP_PORT_NAME, VOLUME_NAME_CONFIG, VOLUME_NAME_REPOS,
    VOLUME_PATH_CONFIG, VOLUME_PATH_REPOS,
};
use svnop_render::{Generator, RenderError};

use crate::merge::override_with_pod_template;

/// Name, namespace, labels and controller reference shared by every owned object.
pub fn owned_meta(server: &SvnServer) -> ObjectMeta {
    let name = server.name_any();
    ObjectMeta {
        labels: Some(labels_for(&name)),
        name: Some(name),
        namespace: server.namespace(),
        owner_references: server.controller_owner_ref(&()).map(|r| vec![r]),
        ..Default::default()
    }
}

/// Headless Service fronting the StatefulSet.
pub fn service_for(server: &SvnServer) -> Service {
    Service {
        metadata: owned_meta(server),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(HTTP_PORT_NAME.to_string()),
                port: HTTP_PORT,
                ..Default::default()
            }]),
            selector: Some(labels_for(&server.name_any())),
            cluster_ip: Some("None".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Fresh single-replica StatefulSet with the server's pod template merged in.
pub fn stateful_set_for(server: &SvnServer, default_image: &str) -> StatefulSet {
    let name = server.name_any();
    let labels = labels_for(&name);
    let mut ss = StatefulSet {
        metadata: owned_meta(server),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: None,
            },
            service_name: name,
            ..Default::default()
        }),
        ..Default::default()
    };
    override_with_pod_template(server, &mut ss, default_image);
    ss
}

pub fn config_map_for(server: &SvnServer, generator: &Generator) -> Result<ConfigMap, RenderError> {
    Ok(ConfigMap {
        metadata: owned_meta(server),
        data: Some(generator.render()?.into_data()),
        ..Default::default()
    })
}

pub(crate) fn svn_container(image: &str) -> Container {
    let http_get = || Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/".to_string()),
            port: IntOrString::Int(HTTP_PORT),
            ..Default::default()
        }),
        ..Default::default()
    };
    Container {
        name: CONTAINER_NAME_SVN.to_string(),
        image: Some(image.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: HTTP_PORT,
            name: Some(HTTP_PORT_NAME.to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(http_get()),
        liveness_probe: Some(http_get()),
        volume_mounts: Some(vec![
            VolumeMount { name: VOLUME_NAME_REPOS.to_string(), mount_path: VOLUME_PATH_REPOS.to_string(), ..Default::default() },
            VolumeMount { name: VOLUME_NAME_CONFIG.to_string(), mount_path: VOLUME_PATH_CONFIG.to_string(), ..Default::default() },
        ]),
        ..Default::default()
    }
}
