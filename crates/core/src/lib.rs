//! svnop core: custom resources, condition history and the store seam.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

pub mod conditions;
pub mod resources;
pub mod store;

pub use conditions::{add_condition, Condition, ConditionType, CONDITION_HISTORY_LIMIT};
pub use resources::{
    GroupMembership, GroupPermission, Permission, PodTemplate, SvnGroup, SvnGroupSpec, SvnRepository,
    SvnRepositorySpec, SvnServer, SvnServerSpec, SvnServerStatus, SvnUser, SvnUserSpec,
};
pub use store::{Object, ServerScoped, Store, StoreError, StoreResult};

/// API group shared by all svnop kinds.
pub const API_GROUP: &str = "svnop.dev";

pub const VOLUME_NAME_REPOS: &str = "repos";
pub const VOLUME_PATH_REPOS: &str = "/svn";
pub const VOLUME_NAME_CONFIG: &str = "config";
pub const VOLUME_PATH_CONFIG: &str = "/etc/svn-config/";

pub const CONTAINER_NAME_SVN: &str = "svn";
pub const HTTP_PORT_NAME: &str = "http";
pub const HTTP_PORT: i32 = 80;

pub const LABEL_APP_KEY: &str = "app";
pub const LABEL_APP_VALUE: &str = "subversion";
pub const LABEL_INSTANCE_NAME_KEY: &str = "svnop.dev/name";

pub const CONFIG_MAP_KEY_AUTH_USER_FILE: &str = "AuthUserFile";
pub const CONFIG_MAP_KEY_AUTHZ_SVN_ACCESS_FILE: &str = "AuthzSVNAccessFile";
pub const CONFIG_MAP_KEY_REPOS: &str = "Repos";

/// Selection labels applied to every object owned by a server.
pub fn labels_for(server_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP_KEY.to_string(), LABEL_APP_VALUE.to_string()),
        (LABEL_INSTANCE_NAME_KEY.to_string(), server_name.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_carry_app_and_instance() {
        let l = labels_for("alpha");
        assert_eq!(l.len(), 2);
        assert_eq!(l.get("app").map(String::as_str), Some("subversion"));
        assert_eq!(l.get("svnop.dev/name").map(String::as_str), Some("alpha"));
    }

    #[test]
    fn every_kind_lives_in_the_api_group() {
        use kube::Resource;
        for group in [SvnServer::group(&()), SvnRepository::group(&()), SvnGroup::group(&()), SvnUser::group(&())] {
            assert_eq!(group, API_GROUP);
        }
        assert!(LABEL_INSTANCE_NAME_KEY.starts_with(API_GROUP));
    }
}
