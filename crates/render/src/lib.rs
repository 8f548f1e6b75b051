//! svnop render: joins repositories, groups and users into the three files
//! mod_authz_svn / mod_auth_basic read from the config volume.
//!
//! Output is byte-exact: the server process parses it as-is.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::Serialize;
use svnop_core::{
    Permission, CONFIG_MAP_KEY_AUTHZ_SVN_ACCESS_FILE, CONFIG_MAP_KEY_AUTH_USER_FILE, CONFIG_MAP_KEY_REPOS,
};

pub mod projection;

pub use projection::build_generator;

/// One repository with the groups allowed on it, in group order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub permissions: Vec<GroupGrant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupGrant {
    pub group: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub encrypted_password: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("rendering repository list: {0}")]
    Repos(#[from] serde_yaml::Error),
}

/// Flattened projections ready to render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generator {
    pub repositories: Vec<Repository>,
    pub groups: Vec<Group>,
    pub users: Vec<User>,
}

/// The three rendered artifacts, keyed the way the ConfigMap stores them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub auth_user_file: String,
    pub authz_svn_access_file: String,
    pub repos: String,
}

impl Rendered {
    pub fn into_data(self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (CONFIG_MAP_KEY_AUTH_USER_FILE.to_string(), self.auth_user_file),
            (CONFIG_MAP_KEY_AUTHZ_SVN_ACCESS_FILE.to_string(), self.authz_svn_access_file),
            (CONFIG_MAP_KEY_REPOS.to_string(), self.repos),
        ])
    }
}

#[derive(Serialize)]
struct ReposConfig<'a> {
    repositories: Vec<RepoEntry<'a>>,
}

#[derive(Serialize)]
struct RepoEntry<'a> {
    name: &'a str,
}

impl Generator {
    /// `AuthzSVNAccessFile`: a `[groups]` section followed by one section per repository.
    /// Unlisted principals are denied with `* = `.
    pub fn authz_svn_access_file(&self) -> String {
        let mut body = String::from("[groups]\n");
        for g in &self.groups {
            body.push_str(&format!("{} = {}\n", g.name, g.users.join(", ")));
        }
        for r in &self.repositories {
            body.push_str(&format!("[{}:/]\n* = \n", r.name));
            for p in &r.permissions {
                body.push_str(&format!("@{} = {}\n", p.group, p.permission));
            }
        }
        wrap(body)
    }

    /// `AuthUserFile`: htpasswd lines `name:hash`.
    pub fn auth_user_file(&self) -> String {
        let body: String = self.users.iter().map(|u| format!("{}:{}\n", u.name, u.encrypted_password)).collect();
        wrap(body)
    }

    /// `Repos`: YAML list of repository names. Empty input renders `repositories: []`.
    pub fn repos_config(&self) -> Result<String, RenderError> {
        let cfg = ReposConfig { repositories: self.repositories.iter().map(|r| RepoEntry { name: &r.name }).collect() };
        Ok(serde_yaml::to_string(&cfg)?)
    }

    pub fn render(&self) -> Result<Rendered, RenderError> {
        Ok(Rendered {
            auth_user_file: self.auth_user_file(),
            authz_svn_access_file: self.authz_svn_access_file(),
            repos: self.repos_config()?,
        })
    }
}

fn wrap(body: String) -> String {
    format!("\n{}\n", body)
}
