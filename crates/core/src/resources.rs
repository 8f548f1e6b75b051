//! Custom resources: one server and the repositories, groups and users that point at it.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{Affinity, LocalObjectReference, PersistentVolumeClaim, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::store::ServerScoped;

/// SvnServer describes one hosted Subversion instance and its workload template.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "svnop.dev",
    version = "v1alpha1",
    kind = "SvnServer",
    plural = "svnservers",
    shortname = "svn",
    namespaced,
    status = "SvnServerStatus",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SvnServerSpec {
    #[serde(default)]
    pub pod_template: PodTemplate,

    /// Claim template for the repository volume. Its name is always forced to `repos`.
    #[serde(default)]
    pub volume_claim_template: PersistentVolumeClaim,
}

/// Scheduling and image overrides. Unset fields leave the workload untouched.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    /// Falls back to the operator's default image when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SvnServerStatus {
    /// Bounded transition history, see [`crate::add_condition`].
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "svnop.dev",
    version = "v1alpha1",
    kind = "SvnRepository",
    plural = "svnrepositories",
    shortname = "svnrepo",
    namespaced,
    printcolumn = r#"{"name":"Server", "type":"string", "jsonPath":".spec.svnServer"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SvnRepositorySpec {
    pub svn_server: String,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "svnop.dev",
    version = "v1alpha1",
    kind = "SvnGroup",
    plural = "svngroups",
    namespaced,
    printcolumn = r#"{"name":"Server", "type":"string", "jsonPath":".spec.svnServer"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SvnGroupSpec {
    pub svn_server: String,
    #[serde(default)]
    pub permissions: Vec<GroupPermission>,
}

/// A grant: access level of the owning group on one repository.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct GroupPermission {
    pub repository: String,
    #[serde(default)]
    pub permission: Permission,
}

/// Access level as written into the authz file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
pub enum Permission {
    #[default]
    #[serde(rename = "")]
    NoAccess,
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::NoAccess => "",
            Permission::Read => "r",
            Permission::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "svnop.dev",
    version = "v1alpha1",
    kind = "SvnUser",
    plural = "svnusers",
    namespaced,
    printcolumn = r#"{"name":"Server", "type":"string", "jsonPath":".spec.svnServer"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SvnUserSpec {
    pub svn_server: String,
    #[serde(default)]
    pub groups: Vec<GroupMembership>,
    /// Pre-hashed credential, copied verbatim into the htpasswd file.
    #[serde(default)]
    pub encrypted_password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct GroupMembership {
    pub name: String,
}

impl ServerScoped for SvnRepository {
    fn server_name(&self) -> &str { &self.spec.svn_server }
}

impl ServerScoped for SvnGroup {
    fn server_name(&self) -> &str { &self.spec.svn_server }
}

impl ServerScoped for SvnUser {
    fn server_name(&self) -> &str { &self.spec.svn_server }
}
