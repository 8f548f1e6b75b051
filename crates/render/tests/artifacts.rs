#![forbid(unsafe_code)]

use svnop_core::Permission;
use svnop_render::{Generator, Group, GroupGrant, Repository, User};

fn group(name: &str, users: &[&str]) -> Group {
    Group { name: name.to_string(), users: users.iter().map(|u| u.to_string()).collect() }
}

fn repo(name: &str, grants: &[(&str, Permission)]) -> Repository {
    Repository {
        name: name.to_string(),
        permissions: grants.iter().map(|(g, p)| GroupGrant { group: g.to_string(), permission: *p }).collect(),
    }
}

fn user(name: &str, hash: &str) -> User {
    User { name: name.to_string(), encrypted_password: hash.to_string() }
}

#[test]
fn authz_empty_config_still_has_groups_section() {
    let g = Generator::default();
    assert_eq!(g.authz_svn_access_file(), "\n[groups]\n\n");
}

#[test]
fn authz_group_without_members_keeps_trailing_space() {
    let g = Generator { groups: vec![group("ops", &[])], ..Default::default() };
    assert_eq!(g.authz_svn_access_file(), "\n[groups]\nops = \n\n");
}

#[test]
fn authz_members_are_comma_space_separated() {
    let g = Generator {
        groups: vec![group("core", &["ann", "bob", "cy"]), group("docs", &["dee"]), group("idle", &[])],
        ..Default::default()
    };
    assert_eq!(g.authz_svn_access_file(), "\n[groups]\ncore = ann, bob, cy\ndocs = dee\nidle = \n\n");
}

#[test]
fn authz_worked_example() {
    let g = Generator {
        groups: vec![group("g1", &["a", "b"])],
        repositories: vec![repo("r1", &[("g1", Permission::Read)])],
        users: vec![],
    };
    assert_eq!(g.authz_svn_access_file(), "\n[groups]\ng1 = a, b\n[r1:/]\n* = \n@g1 = r\n\n");
}

#[test]
fn authz_repository_without_grants_denies_everyone() {
    let g = Generator {
        groups: vec![group("eng", &["ann"])],
        repositories: vec![repo("vault", &[])],
        users: vec![],
    };
    assert_eq!(g.authz_svn_access_file(), "\n[groups]\neng = ann\n[vault:/]\n* = \n\n");
}

#[test]
fn authz_explicit_no_access_still_emits_line() {
    let g = Generator {
        groups: vec![group("guests", &["gil"])],
        repositories: vec![repo("site", &[("guests", Permission::NoAccess)])],
        users: vec![],
    };
    assert_eq!(g.authz_svn_access_file(), "\n[groups]\nguests = gil\n[site:/]\n* = \n@guests = \n\n");
}

#[test]
fn authz_multiple_repositories_in_input_order() {
    let g = Generator {
        groups: vec![group("front", &["fay", "flo"]), group("back", &["bea"])],
        repositories: vec![
            repo("web", &[("front", Permission::ReadWrite), ("back", Permission::Read)]),
            repo("api", &[("front", Permission::NoAccess), ("back", Permission::ReadWrite)]),
            repo("infra", &[("back", Permission::Read)]),
        ],
        users: vec![],
    };
    let expected = "\n[groups]\nfront = fay, flo\nback = bea\n\
[web:/]\n* = \n@front = rw\n@back = r\n\
[api:/]\n* = \n@front = \n@back = rw\n\
[infra:/]\n* = \n@back = r\n\n";
    assert_eq!(g.authz_svn_access_file(), expected);
}

#[test]
fn auth_user_file_empty_is_two_newlines() {
    assert_eq!(Generator::default().auth_user_file(), "\n\n");
}

#[test]
fn auth_user_file_worked_example() {
    let g = Generator { users: vec![user("u1", "hash1"), user("u2", "hash2")], ..Default::default() };
    assert_eq!(g.auth_user_file(), "\nu1:hash1\nu2:hash2\n\n");
}

#[test]
fn auth_user_file_keeps_bcrypt_hash_verbatim() {
    let hash = "$2y$05$Qm9vZ0xvbmdTYWx0U3RyaW5nLi4uLi4uLi4uLi4uLi4uLi4uLi4u";
    let g = Generator { users: vec![user("ops-bot", hash)], ..Default::default() };
    assert_eq!(g.auth_user_file(), format!("\nops-bot:{}\n\n", hash));
}

#[test]
fn repos_config_empty_is_flow_sequence() {
    assert_eq!(Generator::default().repos_config().unwrap(), "repositories: []\n");
}

#[test]
fn repos_config_lists_names_in_order() {
    let g = Generator { repositories: vec![repo("zeta", &[]), repo("alpha", &[])], ..Default::default() };
    assert_eq!(g.repos_config().unwrap(), "repositories:\n- name: zeta\n- name: alpha\n");
}
