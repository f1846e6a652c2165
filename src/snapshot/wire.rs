// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Positional tuple encoding of a snapshot as served by a master's status
//! endpoint:
//!
//! ```text
//! (stamp, stamp_local, masteruri, mastername,
//!  publishers, subscribers, services, topicTypes, nodes, serviceProviders)
//! ```

use crate::error::SyncError;
use crate::rpc::Value;

use super::RegistrySnapshot;

const TUPLE_ARITY: usize = 10;

fn malformed(msg: impl Into<String>) -> SyncError {
    SyncError::MalformedSnapshot(msg.into())
}

fn list<'a>(value: &'a Value, field: &str) -> Result<&'a [Value], SyncError> {
    value
        .as_array()
        .ok_or_else(|| malformed(format!("{} must be a list, got {}", field, value.type_name())))
}

fn string<'a>(value: &'a Value, field: &str) -> Result<&'a str, SyncError> {
    value
        .as_str()
        .ok_or_else(|| malformed(format!("{} must be a string, got {}", field, value.type_name())))
}

fn stamp(value: &Value, field: &str) -> Result<f64, SyncError> {
    value
        .as_f64()
        .ok_or_else(|| malformed(format!("{} must be numeric, got {}", field, value.type_name())))
}

/// Entry of fixed arity inside one of the tuple's lists.
fn entry<'a>(value: &'a Value, field: &str, arity: usize) -> Result<&'a [Value], SyncError> {
    let items = list(value, field)?;
    if items.len() != arity {
        return Err(malformed(format!(
            "{} entries must have {} fields, got {}",
            field,
            arity,
            items.len()
        )));
    }
    Ok(items)
}

/// `(name, [member, ...])` pairs.
fn name_lists<'a>(value: &'a Value, field: &str) -> Result<Vec<(&'a str, Vec<&'a str>)>, SyncError> {
    list(value, field)?
        .iter()
        .map(|item| {
            let pair = entry(item, field, 2)?;
            let name = string(&pair[0], field)?;
            let members = list(&pair[1], field)?
                .iter()
                .map(|m| string(m, field))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((name, members))
        })
        .collect()
}

fn optional_string(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}

/// pids arrive as ints, as strings, or not at all for remote nodes.
fn optional_pid(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RegistrySnapshot {
    /// Parse the positional snapshot tuple.
    ///
    /// Fails with [`SyncError::MalformedSnapshot`] on wrong arity or types.
    /// The trailing `"local"`/`"remote"` markers are not trusted; locality is
    /// recomputed from the URIs.
    pub fn from_wire(raw: &Value) -> Result<RegistrySnapshot, SyncError> {
        let tuple = list(raw, "snapshot")?;
        if tuple.len() != TUPLE_ARITY {
            return Err(malformed(format!(
                "expected {} fields, got {}",
                TUPLE_ARITY,
                tuple.len()
            )));
        }

        let master_uri = string(&tuple[2], "masteruri")?;
        let master_name = string(&tuple[3], "mastername")?;
        let mut snapshot = RegistrySnapshot::new(master_uri, Some(master_name.to_string()));
        snapshot.timestamp = stamp(&tuple[0], "stamp")?;
        snapshot.timestamp_local = stamp(&tuple[1], "stamp_local")?;

        for (topic, nodes) in name_lists(&tuple[4], "publishers")? {
            for node in nodes {
                snapshot.add_publisher(topic, node);
            }
        }
        for (topic, nodes) in name_lists(&tuple[5], "subscribers")? {
            for node in nodes {
                snapshot.add_subscriber(topic, node);
            }
        }
        for (service, providers) in name_lists(&tuple[6], "services")? {
            for node in providers {
                snapshot.add_service_provider(service, node);
            }
        }
        for item in list(&tuple[7], "topicTypes")? {
            let pair = entry(item, "topicTypes", 2)?;
            let topic = string(&pair[0], "topicTypes")?;
            snapshot.set_topic_type(topic, optional_string(&pair[1]).unwrap_or_default());
        }
        for item in list(&tuple[8], "nodes")? {
            let fields = entry(item, "nodes", 5)?;
            let name = string(&fields[0], "nodes")?;
            let owner = string(&fields[2], "nodes")?;
            snapshot.set_node(name, optional_string(&fields[1]), owner, optional_pid(&fields[3]));
        }
        for item in list(&tuple[9], "serviceProviders")? {
            let fields = entry(item, "serviceProviders", 5)?;
            let name = string(&fields[0], "serviceProviders")?;
            let owner = string(&fields[2], "serviceProviders")?;
            snapshot.set_service(name, optional_string(&fields[1]), owner, optional_string(&fields[3]));
        }

        Ok(snapshot)
    }

    /// Encode into the positional tuple served by a status endpoint.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let name_list = |name: &str, members: &std::collections::BTreeSet<String>| {
            Value::Array(vec![
                Value::from(name),
                Value::Array(members.iter().map(|m| Value::from(m.as_str())).collect()),
            ])
        };
        let locality = |local: bool| Value::from(if local { "local" } else { "remote" });

        let publishers = self
            .topics()
            .filter(|t| !t.publishers.is_empty())
            .map(|t| name_list(&t.name, &t.publishers))
            .collect();
        let subscribers = self
            .topics()
            .filter(|t| !t.subscribers.is_empty())
            .map(|t| name_list(&t.name, &t.subscribers))
            .collect();
        let services = self
            .services()
            .map(|s| name_list(&s.name, &s.providers))
            .collect();
        let topic_types = self
            .topics()
            .map(|t| {
                Value::Array(vec![
                    Value::from(t.name.as_str()),
                    Value::from(t.topic_type.clone().unwrap_or_default()),
                ])
            })
            .collect();
        let nodes = self
            .nodes()
            .map(|n| {
                Value::Array(vec![
                    Value::from(n.name.as_str()),
                    Value::from(n.uri.clone().unwrap_or_default()),
                    Value::from(n.master_uri.as_str()),
                    n.pid.map_or(Value::Nil, Value::Int),
                    locality(n.local),
                ])
            })
            .collect();
        let service_providers = self
            .services()
            .map(|s| {
                Value::Array(vec![
                    Value::from(s.name.as_str()),
                    Value::from(s.uri.clone().unwrap_or_default()),
                    Value::from(s.master_uri.as_str()),
                    Value::from(s.service_type.clone().unwrap_or_default()),
                    locality(s.local),
                ])
            })
            .collect();

        Value::Array(vec![
            Value::from(self.timestamp.to_string()),
            Value::from(self.timestamp_local.to_string()),
            Value::from(self.master_uri()),
            Value::from(self.master_name()),
            Value::Array(publishers),
            Value::Array(subscribers),
            Value::Array(services),
            Value::Array(topic_types),
            Value::Array(nodes),
            Value::Array(service_providers),
        ])
    }
}
