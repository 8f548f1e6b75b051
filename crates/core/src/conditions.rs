//! Bounded condition history kept on the server status.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum number of conditions retained on a server.
pub const CONDITION_HISTORY_LIMIT: usize = 10;

const RFC3339_STRICT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum ConditionType {
    #[default]
    Synced,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    #[serde(default)]
    pub reason: String,
    /// RFC 3339. Entries written by other actors may not parse.
    #[serde(default)]
    pub transition_time: String,
}

impl Condition {
    /// A `Synced` transition stamped with `at`.
    pub fn synced_at(at: DateTime<Utc>) -> Self {
        Self {
            type_: ConditionType::Synced,
            reason: "successfully synced".to_string(),
            transition_time: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Strict RFC 3339: upper-case `T` separator, then `Z` or a numeric offset.
    /// Lower-case designators and space separators do not parse.
    fn parsed_time(&self) -> Option<DateTime<FixedOffset>> {
        let ts = self.transition_time.as_str();
        if ts.as_bytes().get(10) != Some(&b'T') {
            return None;
        }
        let normalized = match ts.strip_suffix('Z') {
            Some(head) => format!("{}+00:00", head),
            None => ts.to_string(),
        };
        DateTime::parse_from_str(&normalized, RFC3339_STRICT).ok()
    }
}

/// Append `new` to the history, evicting the oldest entries beyond the limit.
///
/// Below the limit the history is returned in append order. On overflow the
/// whole history is re-sorted by transition time before trimming, so entries
/// appended out of order are reordered at that point. Unparseable times sort
/// before every valid one and are therefore evicted first.
pub fn add_condition(mut conds: Vec<Condition>, new: Condition) -> Vec<Condition> {
    conds.push(new);
    let len = conds.len();
    if len <= CONDITION_HISTORY_LIMIT {
        return conds;
    }
    // `None < Some(_)`, which puts invalid timestamps first.
    conds.sort_by_cached_key(Condition::parsed_time);
    conds.split_off(len - CONDITION_HISTORY_LIMIT)
}
