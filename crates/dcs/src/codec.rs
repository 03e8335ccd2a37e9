//! Mapping between the domain structures and the flat string annotation maps
//! persisted on the coordination resources.
//!
//! Timestamps and TTLs are decimal-string unix seconds; the structured
//! payloads (`dbstate`, `delete-members`) are JSON blobs inside the flat
//! map. Decode failures surface as [`Error::Codec`] rather than being
//! silently dropped.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::resource::Resource;
use crate::types::{DBState, HaConfig, Leader, MemberToDelete, Switchover};

/// Holder name on the leader resource; also the outgoing-leader name on a
/// switchover resource.
pub const LEADER_KEY: &str = "leader";

/// When the current holder first acquired the lease.
pub const ACQUIRE_TIME_KEY: &str = "acquire-time";

/// When the holder last renewed.
pub const RENEW_TIME_KEY: &str = "renew-time";

/// Lease TTL in seconds.
pub const TTL_KEY: &str = "ttl";

/// JSON-encoded [`DBState`] attached by the holder.
pub const DB_STATE_KEY: &str = "dbstate";

/// Whether HA management is enabled, `"true"`/`"false"`.
pub const ENABLE_KEY: &str = "enable";

/// Maximum replication lag tolerated on switchover.
pub const MAX_LAG_KEY: &str = "maxLagOnSwitchover";

/// JSON-encoded map of member name to [`MemberToDelete`].
pub const DELETE_MEMBERS_KEY: &str = "delete-members";

/// When a switchover was requested.
pub const SCHEDULED_AT_KEY: &str = "scheduled-at";

/// Target candidate on a switchover resource.
pub const CANDIDATE_KEY: &str = "candidate";

/// Max-lag threshold applied when neither the resource nor the
/// configuration specifies one.
pub const DEFAULT_MAX_LAG_ON_SWITCHOVER: i64 = 1_048_576;

fn parse_i64(key: &'static str, value: &str) -> Result<i64, Error> {
    value.parse().map_err(|_| Error::Codec {
        key,
        reason: format!("expected decimal seconds, got {value:?}"),
    })
}

/// Reads an integer annotation; missing or empty decodes to zero.
fn annotation_i64(annotations: &BTreeMap<String, String>, key: &'static str) -> Result<i64, Error> {
    match annotations.get(key).map(String::as_str) {
        None | Some("") => Ok(0),
        Some(value) => parse_i64(key, value),
    }
}

/// Decodes the leader lease record from its resource. An empty or missing
/// holder annotation decodes to an empty name, which callers treat as "no
/// leader".
pub fn decode_leader(resource: &Resource) -> Result<Leader, Error> {
    let annotations = &resource.annotations;
    let db_state = match annotations.get(DB_STATE_KEY).map(String::as_str) {
        None | Some("") => None,
        Some(raw) => Some(serde_json::from_str(raw).map_err(|e| Error::Codec {
            key: DB_STATE_KEY,
            reason: e.to_string(),
        })?),
    };

    Ok(Leader {
        name: annotations.get(LEADER_KEY).cloned().unwrap_or_default(),
        acquire_time: annotation_i64(annotations, ACQUIRE_TIME_KEY)?,
        renew_time: annotation_i64(annotations, RENEW_TIME_KEY)?,
        ttl: annotation_i64(annotations, TTL_KEY)?,
        db_state,
        resource: resource.clone(),
    })
}

/// Writes a full lease claim: holder, fresh acquire/renew stamps, TTL and
/// the claimant's replication state. A `None` state removes any payload a
/// previous holder left behind.
pub fn encode_lease(
    annotations: &mut BTreeMap<String, String>,
    holder: &str,
    acquire_time: i64,
    renew_time: i64,
    ttl: i64,
    db_state: Option<&DBState>,
) -> Result<(), Error> {
    annotations.insert(LEADER_KEY.to_string(), holder.to_string());
    annotations.insert(ACQUIRE_TIME_KEY.to_string(), acquire_time.to_string());
    encode_lease_renewal(annotations, renew_time, ttl, db_state)
}

/// Writes a lease renewal: renew stamp, TTL and replication state. The
/// holder and acquire time are left as recorded.
pub fn encode_lease_renewal(
    annotations: &mut BTreeMap<String, String>,
    renew_time: i64,
    ttl: i64,
    db_state: Option<&DBState>,
) -> Result<(), Error> {
    annotations.insert(RENEW_TIME_KEY.to_string(), renew_time.to_string());
    annotations.insert(TTL_KEY.to_string(), ttl.to_string());
    match db_state {
        Some(state) => {
            let raw = serde_json::to_string(state).map_err(|e| Error::Codec {
                key: DB_STATE_KEY,
                reason: e.to_string(),
            })?;
            annotations.insert(DB_STATE_KEY.to_string(), raw);
        }
        None => {
            annotations.remove(DB_STATE_KEY);
        }
    }
    Ok(())
}

/// Clears the holder and TTL state, leaving the resource (and the lease
/// history stamps) in place.
pub fn encode_lease_release(annotations: &mut BTreeMap<String, String>) {
    annotations.insert(LEADER_KEY.to_string(), String::new());
    annotations.insert(TTL_KEY.to_string(), "0".to_string());
}

/// Decodes the HA policy from its resource. `default_ttl` and
/// `default_enabled` apply when the corresponding annotation is missing; a
/// missing `delete-members` annotation decodes to an empty map.
pub fn decode_ha_config(
    resource: &Resource,
    default_ttl: i64,
    default_enabled: bool,
) -> Result<HaConfig, Error> {
    let annotations = &resource.annotations;

    let ttl = match annotations.get(TTL_KEY).map(String::as_str) {
        None | Some("") => default_ttl,
        Some(value) => parse_i64(TTL_KEY, value)?,
    };

    let enabled = match annotations.get(ENABLE_KEY).map(String::as_str) {
        None | Some("") => default_enabled,
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            return Err(Error::Codec {
                key: ENABLE_KEY,
                reason: format!("expected \"true\" or \"false\", got {other:?}"),
            });
        }
    };

    let max_lag_on_switchover = match annotations.get(MAX_LAG_KEY).map(String::as_str) {
        None | Some("") => DEFAULT_MAX_LAG_ON_SWITCHOVER,
        Some(value) => parse_i64(MAX_LAG_KEY, value)?,
    };

    let delete_members: BTreeMap<String, MemberToDelete> =
        match annotations.get(DELETE_MEMBERS_KEY).map(String::as_str) {
            None | Some("") => BTreeMap::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| Error::Codec {
                key: DELETE_MEMBERS_KEY,
                reason: e.to_string(),
            })?,
        };

    Ok(HaConfig {
        ttl,
        max_lag_on_switchover,
        enabled,
        delete_members,
        resource: Some(resource.clone()),
    })
}

/// Writes the HA policy annotations.
pub fn encode_ha_config(
    annotations: &mut BTreeMap<String, String>,
    config: &HaConfig,
) -> Result<(), Error> {
    annotations.insert(TTL_KEY.to_string(), config.ttl.to_string());
    annotations.insert(ENABLE_KEY.to_string(), config.enabled.to_string());
    annotations.insert(
        MAX_LAG_KEY.to_string(),
        config.max_lag_on_switchover.to_string(),
    );
    let raw = serde_json::to_string(&config.delete_members).map_err(|e| Error::Codec {
        key: DELETE_MEMBERS_KEY,
        reason: e.to_string(),
    })?;
    annotations.insert(DELETE_MEMBERS_KEY.to_string(), raw);
    Ok(())
}

/// Decodes a switchover request from its resource.
pub fn decode_switchover(resource: &Resource) -> Result<Switchover, Error> {
    let annotations = &resource.annotations;
    Ok(Switchover {
        scheduled_at: annotation_i64(annotations, SCHEDULED_AT_KEY)?,
        leader: annotations.get(LEADER_KEY).cloned().unwrap_or_default(),
        candidate: annotations.get(CANDIDATE_KEY).cloned().unwrap_or_default(),
    })
}

/// Writes a switchover request's annotations.
pub fn encode_switchover(
    annotations: &mut BTreeMap<String, String>,
    scheduled_at: i64,
    leader: &str,
    candidate: &str,
) {
    annotations.insert(SCHEDULED_AT_KEY.to_string(), scheduled_at.to_string());
    annotations.insert(LEADER_KEY.to_string(), leader.to_string());
    annotations.insert(CANDIDATE_KEY.to_string(), candidate.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource_with(annotations: &[(&str, &str)]) -> Resource {
        Resource {
            name: "test".to_string(),
            annotations: annotations
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..Resource::default()
        }
    }

    #[test]
    fn db_state_round_trip() {
        let state = DBState {
            op_timestamp: 1000,
            extra: [("timeline".to_string(), "1".to_string())].into(),
        };

        let mut annotations = BTreeMap::new();
        encode_lease(&mut annotations, "pod-0", 100, 101, 5, Some(&state)).unwrap();

        let resource = Resource {
            annotations,
            ..Resource::default()
        };
        let leader = decode_leader(&resource).unwrap();
        assert_eq!(leader.db_state, Some(state));
    }

    #[test]
    fn decode_leader_reads_all_fields() {
        let resource = resource_with(&[
            ("leader", "pod-0"),
            ("acquire-time", "100"),
            ("renew-time", "101"),
            ("ttl", "0"),
            ("dbstate", r#"{"op_timestamp":1000,"extra":{"timeline":"1"}}"#),
        ]);

        let leader = decode_leader(&resource).unwrap();
        assert_eq!(leader.name, "pod-0");
        assert_eq!(leader.acquire_time, 100);
        assert_eq!(leader.renew_time, 101);
        assert_eq!(leader.ttl, 0);
        assert_eq!(leader.db_state.unwrap().op_timestamp, 1000);
    }

    #[test]
    fn decode_leader_tolerates_bare_resource() {
        let leader = decode_leader(&resource_with(&[])).unwrap();
        assert!(leader.name.is_empty());
        assert_eq!(leader.ttl, 0);
        assert!(leader.db_state.is_none());
    }

    #[test]
    fn malformed_db_state_is_a_codec_error() {
        let resource = resource_with(&[("dbstate", "{not json")]);
        let err = decode_leader(&resource).unwrap_err();
        assert!(matches!(err, Error::Codec { key: "dbstate", .. }));
    }

    #[test]
    fn malformed_timestamp_is_a_codec_error() {
        let resource = resource_with(&[("renew-time", "yesterday")]);
        let err = decode_leader(&resource).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec {
                key: "renew-time",
                ..
            }
        ));
    }

    #[test]
    fn release_clears_holder_and_ttl() {
        let mut annotations = BTreeMap::new();
        encode_lease(&mut annotations, "pod-0", 100, 100, 5, None).unwrap();
        encode_lease_release(&mut annotations);

        assert_eq!(annotations["leader"], "");
        assert_eq!(annotations["ttl"], "0");
        // History stamps survive the release.
        assert_eq!(annotations["acquire-time"], "100");
    }

    #[test]
    fn renewal_drops_stale_db_state() {
        let state = DBState {
            op_timestamp: 7,
            extra: BTreeMap::new(),
        };
        let mut annotations = BTreeMap::new();
        encode_lease(&mut annotations, "pod-0", 100, 100, 5, Some(&state)).unwrap();

        encode_lease_renewal(&mut annotations, 110, 5, None).unwrap();
        assert!(!annotations.contains_key("dbstate"));
    }

    #[test]
    fn ha_config_defaults_apply() {
        let resource = resource_with(&[("enable", "true")]);
        let config = decode_ha_config(&resource, 30, false).unwrap();

        assert!(config.enabled);
        assert_eq!(config.ttl, 30);
        assert_eq!(config.max_lag_on_switchover, DEFAULT_MAX_LAG_ON_SWITCHOVER);
        assert!(config.delete_members.is_empty());
        assert!(config.resource.is_some());
    }

    #[test]
    fn ha_config_round_trip() {
        let mut config = HaConfig {
            ttl: 10,
            max_lag_on_switchover: 100,
            enabled: false,
            ..HaConfig::default()
        };
        config.delete_members.insert(
            "pod-0".to_string(),
            MemberToDelete {
                uid: "u0".to_string(),
                is_finished: true,
            },
        );

        let mut annotations = BTreeMap::new();
        encode_ha_config(&mut annotations, &config).unwrap();

        let decoded = decode_ha_config(
            &Resource {
                annotations,
                ..Resource::default()
            },
            30,
            true,
        )
        .unwrap();

        assert_eq!(decoded.ttl, 10);
        assert_eq!(decoded.max_lag_on_switchover, 100);
        assert!(!decoded.enabled);
        assert_eq!(decoded.delete_members, config.delete_members);
    }

    #[test]
    fn malformed_delete_members_is_a_codec_error() {
        let resource = resource_with(&[("delete-members", r#"{"uid":"oops"}"#)]);
        let err = decode_ha_config(&resource, 30, true).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec {
                key: "delete-members",
                ..
            }
        ));
    }

    #[test]
    fn switchover_round_trip() {
        let mut annotations = BTreeMap::new();
        encode_switchover(&mut annotations, 100, "pod-0", "pod-1");

        let switchover = decode_switchover(&Resource {
            annotations,
            ..Resource::default()
        })
        .unwrap();

        assert_eq!(switchover.scheduled_at, 100);
        assert_eq!(switchover.leader, "pod-0");
        assert_eq!(switchover.candidate, "pod-1");
    }
}
