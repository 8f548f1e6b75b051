//! Entity join: grants per repository, members per group, credentials per user.

use std::collections::HashMap;

use kube::ResourceExt;
use svnop_core::{SvnGroup, SvnRepository, SvnUser};
use tracing::debug;

use crate::{Generator, Group, GroupGrant, Repository, User};

/// Build the renderer input from rows already scoped to one server.
///
/// Input order is significant and preserved everywhere. Names are expected to
/// be unique per kind; if one repeats, the later row wins and keeps the slot of
/// the first occurrence.
pub fn build_generator(repos: &[SvnRepository], groups: &[SvnGroup], users: &[SvnUser]) -> Generator {
    let repos = last_write_wins(repos);
    let groups = last_write_wins(groups);
    let users = last_write_wins(users);
    debug!(repos = repos.len(), groups = groups.len(), users = users.len(), "building svn config projection");
    Generator {
        repositories: build_repositories(&repos, &groups),
        groups: build_groups(&groups, &users),
        users: build_users(&users),
    }
}

fn build_repositories(repos: &[&SvnRepository], groups: &[&SvnGroup]) -> Vec<Repository> {
    repos
        .iter()
        .map(|r| {
            let name = r.name_any();
            let mut permissions = Vec::new();
            for g in groups {
                for p in g.spec.permissions.iter().filter(|p| p.repository == name) {
                    permissions.push(GroupGrant { group: g.name_any(), permission: p.permission });
                }
            }
            Repository { name, permissions }
        })
        .collect()
}

fn build_groups(groups: &[&SvnGroup], users: &[&SvnUser]) -> Vec<Group> {
    groups
        .iter()
        .map(|g| {
            let name = g.name_any();
            let users = users
                .iter()
                .filter(|u| u.spec.groups.iter().any(|m| m.name == name))
                .map(|u| u.name_any())
                .collect();
            Group { name, users }
        })
        .collect()
}

fn build_users(users: &[&SvnUser]) -> Vec<User> {
    users
        .iter()
        .map(|u| User { name: u.name_any(), encrypted_password: u.spec.encrypted_password.clone() })
        .collect()
}

fn last_write_wins<K: ResourceExt>(items: &[K]) -> Vec<&K> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<&K> = Vec::with_capacity(items.len());
    for item in items {
        match slots.get(&item.name_any()) {
            Some(&idx) => out[idx] = item,
            None => {
                slots.insert(item.name_any(), out.len());
                out.push(item);
            }
        }
    }
    out
}
