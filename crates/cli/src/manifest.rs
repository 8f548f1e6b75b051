//! Offline manifests: multi-document YAML holding svnop objects.

use anyhow::{anyhow, Context, Result};
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value;
use svnop_core::{ServerScoped, SvnGroup, SvnRepository, SvnServer, SvnUser};
use tracing::debug;

#[derive(Debug, Default)]
pub struct Manifest {
    pub servers: Vec<SvnServer>,
    pub repositories: Vec<SvnRepository>,
    pub groups: Vec<SvnGroup>,
    pub users: Vec<SvnUser>,
}

/// Rows belonging to one server, in file order.
#[derive(Debug, Default)]
pub struct Scoped {
    pub repositories: Vec<SvnRepository>,
    pub groups: Vec<SvnGroup>,
    pub users: Vec<SvnUser>,
}

/// Parse every document; unknown kinds are skipped, blank documents ignored.
pub fn parse(text: &str) -> Result<Manifest> {
    let mut m = Manifest::default();
    for (i, doc) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let n = i + 1;
        let v = Value::deserialize(doc).with_context(|| format!("document {}: invalid YAML", n))?;
        if v.is_null() {
            continue;
        }
        let kind = v.get("kind").and_then(Value::as_str).map(str::to_owned);
        match kind.as_deref() {
            Some("SvnServer") => m.servers.push(decode(v, n)?),
            Some("SvnRepository") => m.repositories.push(decode(v, n)?),
            Some("SvnGroup") => m.groups.push(decode(v, n)?),
            Some("SvnUser") => m.users.push(decode(v, n)?),
            Some(other) => debug!(kind = %other, doc = n, "skipping foreign kind"),
            None => return Err(anyhow!("document {}: missing kind", n)),
        }
    }
    Ok(m)
}

fn decode<K: DeserializeOwned>(v: Value, n: usize) -> Result<K> {
    serde_yaml::from_value(v).with_context(|| format!("document {}", n))
}

impl Manifest {
    /// Keep the rows referencing `server`. With `namespace` set, rows in
    /// another namespace are dropped; rows without one always match.
    pub fn scoped(self, server: &str, namespace: Option<&str>) -> Scoped {
        Scoped {
            repositories: keep(self.repositories, server, namespace),
            groups: keep(self.groups, server, namespace),
            users: keep(self.users, server, namespace),
        }
    }
}

fn keep<K: ServerScoped + ResourceExt>(rows: Vec<K>, server: &str, namespace: Option<&str>) -> Vec<K> {
    rows.into_iter()
        .filter(|o| o.server_name() == server)
        .filter(|o| match (namespace, o.namespace()) {
            (Some(want), Some(have)) => want == have,
            _ => true,
        })
        .collect()
}
