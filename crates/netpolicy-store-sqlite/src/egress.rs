// netpolicy-store-sqlite/src/egress.rs
// ============================================================================
// Module: SQLite Egress Store
// Description: Egress destination and egress policy persistence.
// Purpose: Store named external destinations and the policies that use them.
// Dependencies: netpolicy-core, rand, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Destination rules are stored as a JSON array next to the destination
//! metadata. Egress policies reference destinations through a restricting
//! foreign key, and sources of type `app` or `space` get a group tag in the
//! same transaction that inserts the policy.

// ============================================================================//
// SECTION: Imports
// ============================================================================//

use netpolicy_core::AppLifecycle;
use netpolicy_core::EgressDestination;
use netpolicy_core::EgressPolicy;
use netpolicy_core::EgressRule;
use netpolicy_core::EgressSource;
use netpolicy_core::EgressStore;
use netpolicy_core::GroupRef;
use netpolicy_core::GroupType;
use netpolicy_core::ResolvedEgressPolicy;
use netpolicy_core::StoreError;
use netpolicy_core::validate_destinations;
use netpolicy_core::validate_egress_policies;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;

use crate::store::POLICIES_VERSION_KEY;
use crate::store::SqlitePolicyStore;
use crate::store::SqliteStoreError;
use crate::store::bump_marker;
use crate::store::placeholders;
use crate::store::text_values;
use crate::tags;

// ============================================================================//
// SECTION: Store
// ============================================================================//

impl EgressStore for SqlitePolicyStore {
    fn create_destinations(
        &self,
        destinations: &[EgressDestination],
    ) -> Result<Vec<EgressDestination>, StoreError> {
        validate_destinations(destinations)?;
        self.write(|tx| {
            let mut created = Vec::with_capacity(destinations.len());
            for destination in destinations {
                if let Some(existing) = destination_by_name(tx, &destination.name)? {
                    if existing.same_content(destination) {
                        created.push(existing);
                        continue;
                    }
                    return Err(duplicate_name(&destination.name));
                }
                let mut stored = destination.clone();
                stored.guid = generate_guid();
                tx.execute(
                    "INSERT INTO destinations (guid, name, description, rules_json) VALUES (?1, \
                     ?2, ?3, ?4)",
                    params![stored.guid, stored.name, stored.description, encode_rules(&stored)?],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                created.push(stored);
            }
            bump_marker(tx, POLICIES_VERSION_KEY)?;
            Ok(created)
        })
        .map_err(StoreError::from)
    }

    fn update_destinations(
        &self,
        destinations: &[EgressDestination],
    ) -> Result<Vec<EgressDestination>, StoreError> {
        validate_destinations(destinations)?;
        self.write(|tx| {
            for destination in destinations {
                if destination_by_guid(tx, &destination.guid)?.is_none() {
                    return Err(SqliteStoreError::NotFound(format!(
                        "destination guid not found: {}",
                        destination.guid
                    )));
                }
                if let Some(existing) = destination_by_name(tx, &destination.name)?
                    && existing.guid != destination.guid
                {
                    return Err(duplicate_name(&destination.name));
                }
                tx.execute(
                    "UPDATE destinations SET name = ?2, description = ?3, rules_json = ?4 WHERE \
                     guid = ?1",
                    params![
                        destination.guid,
                        destination.name,
                        destination.description,
                        encode_rules(destination)?
                    ],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            }
            bump_marker(tx, POLICIES_VERSION_KEY)?;
            Ok(destinations.to_vec())
        })
        .map_err(StoreError::from)
    }

    fn delete_destination(&self, guid: &str) -> Result<EgressDestination, StoreError> {
        self.write(|tx| {
            let Some(destination) = destination_by_guid(tx, guid)? else {
                return Err(SqliteStoreError::NotFound(format!(
                    "destination guid not found: {guid}"
                )));
            };
            let references: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM egress_policies WHERE destination_guid = ?1",
                    params![guid],
                    |row| row.get(0),
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            if references > 0 {
                return Err(SqliteStoreError::Conflict("destination still in use".to_string()));
            }
            tx.execute("DELETE FROM destinations WHERE guid = ?1", params![guid])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            bump_marker(tx, POLICIES_VERSION_KEY)?;
            Ok(destination)
        })
        .map_err(StoreError::from)
    }

    fn destinations(
        &self,
        guids: &[String],
        names: &[String],
    ) -> Result<Vec<EgressDestination>, StoreError> {
        let mut clauses = Vec::new();
        if !guids.is_empty() {
            clauses.push(format!("guid IN ({})", placeholders(guids.len())));
        }
        if !names.is_empty() {
            clauses.push(format!("name IN ({})", placeholders(names.len())));
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" OR "))
        };
        let sql = format!(
            "SELECT guid, name, description, rules_json FROM destinations{filter} ORDER BY name"
        );
        let values = text_values(guids.iter().chain(names));
        self.read(|tx| select_destinations(tx, &sql, values)).map_err(StoreError::from)
    }

    fn create_egress_policies(
        &self,
        policies: &[EgressPolicy],
    ) -> Result<Vec<EgressPolicy>, StoreError> {
        validate_egress_policies(policies)?;
        let width = self.width();
        self.write(|tx| {
            let mut missing: Vec<&str> = Vec::new();
            for policy in policies {
                if destination_by_guid(tx, &policy.destination_guid)?.is_none()
                    && !missing.contains(&policy.destination_guid.as_str())
                {
                    missing.push(policy.destination_guid.as_str());
                }
            }
            if !missing.is_empty() {
                return Err(SqliteStoreError::NotFound(format!(
                    "destination guids not found: [{}]",
                    missing.join(", ")
                )));
            }
            let mut created = Vec::with_capacity(policies.len());
            for policy in policies {
                if policy.source.group_type != GroupType::Default {
                    let group = GroupRef::new(policy.source.id.as_str(), policy.source.group_type);
                    tags::acquire_or_get(tx, &group, width)?;
                }
                let mut stored = policy.clone();
                stored.guid = generate_guid();
                tx.execute(
                    "INSERT INTO egress_policies (guid, source_id, source_type, destination_guid, \
                     app_lifecycle) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        stored.guid,
                        stored.source.id,
                        stored.source.group_type.as_str(),
                        stored.destination_guid,
                        stored.app_lifecycle.as_str()
                    ],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                created.push(stored);
            }
            bump_marker(tx, POLICIES_VERSION_KEY)?;
            Ok(created)
        })
        .map_err(StoreError::from)
    }

    fn delete_egress_policy(&self, guid: &str) -> Result<EgressPolicy, StoreError> {
        self.write(|tx| {
            let policies = select_egress_policies(tx, Some("e.guid = ?"), vec![Value::Text(
                guid.to_string(),
            )])?;
            let Some(resolved) = policies.into_iter().next() else {
                return Err(SqliteStoreError::NotFound(format!(
                    "egress policy guid not found: {guid}"
                )));
            };
            tx.execute("DELETE FROM egress_policies WHERE guid = ?1", params![guid])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let source = &resolved.policy.source;
            if source.group_type != GroupType::Default {
                tags::release_if_unreferenced(
                    tx,
                    &GroupRef::new(source.id.as_str(), source.group_type),
                )?;
            }
            bump_marker(tx, POLICIES_VERSION_KEY)?;
            Ok(resolved.policy)
        })
        .map_err(StoreError::from)
    }

    fn egress_policies(&self) -> Result<Vec<ResolvedEgressPolicy>, StoreError> {
        self.read(|tx| select_egress_policies(tx, None, Vec::new())).map_err(StoreError::from)
    }

    fn egress_policies_by_source_and_defaults(
        &self,
        source_ids: &[String],
    ) -> Result<Vec<ResolvedEgressPolicy>, StoreError> {
        let clause = if source_ids.is_empty() {
            "e.source_type = 'default'".to_string()
        } else {
            format!(
                "e.source_id IN ({}) OR e.source_type = 'default'",
                placeholders(source_ids.len())
            )
        };
        let values = text_values(source_ids.iter());
        self.read(|tx| select_egress_policies(tx, Some(&clause), values))
            .map_err(StoreError::from)
    }
}

// ============================================================================//
// SECTION: Helpers
// ============================================================================//

/// Raw joined egress policy row.
type EgressRow = (String, String, String, String, String, String, String, String);

/// Selects egress policies joined with their destinations.
fn select_egress_policies(
    tx: &Transaction<'_>,
    clause: Option<&str>,
    values: Vec<Value>,
) -> Result<Vec<ResolvedEgressPolicy>, SqliteStoreError> {
    let filter = clause.map(|clause| format!(" WHERE {clause}")).unwrap_or_default();
    let sql = format!(
        "SELECT e.guid, e.source_id, e.source_type, e.app_lifecycle, d.guid, d.name, \
         d.description, d.rules_json FROM egress_policies e JOIN destinations d ON d.guid = \
         e.destination_guid{filter} ORDER BY e.source_id, d.name, e.guid"
    );
    let mut statement = tx.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows: Vec<EgressRow> = statement
        .query_map(params_from_iter(values), |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let mut resolved = Vec::with_capacity(rows.len());
    for (guid, source_id, source_type, lifecycle, dest_guid, name, description, rules) in rows {
        let group_type: GroupType = source_type.parse()?;
        let app_lifecycle: AppLifecycle = lifecycle.parse()?;
        let source_tag = if group_type == GroupType::Default {
            None
        } else {
            tags::tag_for(tx, &source_id)?
        };
        resolved.push(ResolvedEgressPolicy {
            policy: EgressPolicy {
                guid,
                source: EgressSource {
                    id: source_id,
                    group_type,
                },
                destination_guid: dest_guid.clone(),
                app_lifecycle,
            },
            destination: EgressDestination {
                guid: dest_guid,
                name,
                description,
                rules: decode_rules(&rules)?,
            },
            source_tag,
        });
    }
    Ok(resolved)
}

/// Runs a destination query and decodes the rows.
fn select_destinations(
    tx: &Transaction<'_>,
    sql: &str,
    values: Vec<Value>,
) -> Result<Vec<EgressDestination>, SqliteStoreError> {
    let mut statement = tx.prepare(sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = statement
        .query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    rows.into_iter()
        .map(|(guid, name, description, rules)| -> Result<EgressDestination, SqliteStoreError> {
            Ok(EgressDestination {
                guid,
                name,
                description,
                rules: decode_rules(&rules)?,
            })
        })
        .collect()
}

/// Loads one destination by guid.
fn destination_by_guid(
    tx: &Transaction<'_>,
    guid: &str,
) -> Result<Option<EgressDestination>, SqliteStoreError> {
    Ok(select_destinations(
        tx,
        "SELECT guid, name, description, rules_json FROM destinations WHERE guid = ?",
        vec![Value::Text(guid.to_string())],
    )?
    .into_iter()
    .next())
}

/// Loads one destination by name.
fn destination_by_name(
    tx: &Transaction<'_>,
    name: &str,
) -> Result<Option<EgressDestination>, SqliteStoreError> {
    let guid: Option<String> = tx
        .query_row("SELECT guid FROM destinations WHERE name = ?1", params![name], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match guid {
        Some(guid) => destination_by_guid(tx, &guid),
        None => Ok(None),
    }
}

/// Serializes destination rules for storage.
fn encode_rules(destination: &EgressDestination) -> Result<String, SqliteStoreError> {
    serde_json::to_string(&destination.rules)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Deserializes stored destination rules.
fn decode_rules(rules_json: &str) -> Result<Vec<EgressRule>, SqliteStoreError> {
    serde_json::from_str(rules_json).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

/// Builds the duplicate-name conflict.
fn duplicate_name(name: &str) -> SqliteStoreError {
    SqliteStoreError::Conflict(format!(
        "duplicate name error: entry with name '{name}' already exists"
    ))
}

/// Generates a random version 4 UUID string.
fn generate_guid() -> String {
    let (a, b, c, d, e): (u32, u16, u16, u16, u64) = rand::random();
    format!(
        "{a:08x}-{b:04x}-{:04x}-{:04x}-{:012x}",
        (c & 0x0fff) | 0x4000,
        (d & 0x3fff) | 0x8000,
        e & 0xffff_ffff_ffff
    )
}
