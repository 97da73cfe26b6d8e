// netpolicy-store-sqlite/src/security_groups.rs
// ============================================================================
// Module: SQLite ASG Store
// Description: Application security group catalog persistence.
// Purpose: Replace the ASG catalog atomically and serve it by space.
// Dependencies: netpolicy-core, rusqlite
// ============================================================================

//! ## Overview
//! The catalog is replaced wholesale by the syncer. Rows whose guid survives
//! a replacement keep their autoincrement id, which doubles as the
//! pagination cursor, so host agents paging through the list never skip or
//! repeat a group when a sync lands mid-iteration.

// ============================================================================//
// SECTION: Imports
// ============================================================================//

use std::collections::BTreeSet;

use netpolicy_core::Page;
use netpolicy_core::Pagination;
use netpolicy_core::SecurityGroup;
use netpolicy_core::SecurityGroupStore;
use netpolicy_core::StoreError;
use rusqlite::Transaction;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;

use crate::store::ASG_SYNC_MARKER_KEY;
use crate::store::SqlitePolicyStore;
use crate::store::SqliteStoreError;
use crate::store::placeholders;
use crate::store::read_marker;
use crate::store::text_values;
use crate::store::write_marker;

// ============================================================================//
// SECTION: Constants
// ============================================================================//

/// Binding lifecycle label for staging spaces.
const STAGING: &str = "staging";
/// Binding lifecycle label for running spaces.
const RUNNING: &str = "running";

// ============================================================================//
// SECTION: Store
// ============================================================================//

impl SecurityGroupStore for SqlitePolicyStore {
    fn bulk_upsert_asgs(&self, groups: &[SecurityGroup]) -> Result<(), StoreError> {
        self.write(|tx| {
            let incoming: BTreeSet<&str> = groups.iter().map(|group| group.guid.as_str()).collect();
            for group in groups {
                upsert_group(tx, group)?;
            }
            let stored = stored_guids(tx)?;
            for guid in stored.iter().filter(|guid| !incoming.contains(guid.as_str())) {
                tx.execute("DELETE FROM security_groups WHERE guid = ?1", params![guid])
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            }
            Ok(())
        })
        .map_err(StoreError::from)
    }

    fn by_space_guids(
        &self,
        space_guids: &[String],
        page: Page,
    ) -> Result<(Vec<SecurityGroup>, Pagination), StoreError> {
        let space_filter = if space_guids.is_empty() {
            String::new()
        } else {
            format!(
                " OR EXISTS (SELECT 1 FROM security_group_spaces b WHERE b.security_group_id = \
                 sg.id AND b.space_guid IN ({}))",
                placeholders(space_guids.len())
            )
        };
        let limit = if page.limit == 0 { -1 } else { i64::from(page.limit) + 1 };
        let sql = format!(
            "SELECT sg.id, sg.guid, sg.name, sg.rules, sg.staging_default, sg.running_default \
             FROM security_groups sg WHERE sg.id >= ? AND (sg.staging_default = 1 OR \
             sg.running_default = 1{space_filter}) ORDER BY sg.id LIMIT ?"
        );
        let mut values = vec![Value::Integer(page.from)];
        values.extend(text_values(space_guids.iter()));
        values.push(Value::Integer(limit));
        self.read(|tx| {
            let mut statement =
                tx.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let mut rows = statement
                .query_map(params_from_iter(values), |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        SecurityGroup {
                            guid: row.get(1)?,
                            name: row.get(2)?,
                            rules_json: row.get(3)?,
                            staging_default: row.get(4)?,
                            running_default: row.get(5)?,
                            staging_space_guids: BTreeSet::new(),
                            running_space_guids: BTreeSet::new(),
                        },
                    ))
                })
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let mut next = 0;
            let page_size = usize::try_from(page.limit).unwrap_or(usize::MAX);
            if page_size > 0 && rows.len() > page_size {
                let overflow = rows.split_off(page_size);
                next = overflow.first().map_or(0, |(id, _)| *id);
            }
            let mut groups = Vec::with_capacity(rows.len());
            for (id, mut group) in rows {
                load_bindings(tx, id, &mut group)?;
                groups.push(group);
            }
            Ok((groups, Pagination {
                next,
            }))
        })
        .map_err(StoreError::from)
    }

    fn asg_sync_marker(&self) -> Result<Option<i64>, StoreError> {
        self.read(|tx| read_marker(tx, ASG_SYNC_MARKER_KEY)).map_err(StoreError::from)
    }

    fn set_asg_sync_marker(&self, marker_ms: i64) -> Result<(), StoreError> {
        self.write(|tx| write_marker(tx, ASG_SYNC_MARKER_KEY, marker_ms)).map_err(StoreError::from)
    }
}

// ============================================================================//
// SECTION: Helpers
// ============================================================================//

/// Inserts or updates one group, keeping its row id, and rewrites its bindings.
fn upsert_group(tx: &Transaction<'_>, group: &SecurityGroup) -> Result<(), SqliteStoreError> {
    tx.execute(
        "INSERT INTO security_groups (guid, name, rules, staging_default, running_default) \
         VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(guid) DO UPDATE SET name = excluded.name, rules \
         = excluded.rules, staging_default = excluded.staging_default, running_default = \
         excluded.running_default",
        params![
            group.guid,
            group.name,
            group.rules_json,
            group.staging_default,
            group.running_default
        ],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let id: i64 = tx
        .query_row("SELECT id FROM security_groups WHERE guid = ?1", params![group.guid], |row| {
            row.get(0)
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute("DELETE FROM security_group_spaces WHERE security_group_id = ?1", params![id])
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let bindings = group
        .staging_space_guids
        .iter()
        .map(|space| (space, STAGING))
        .chain(group.running_space_guids.iter().map(|space| (space, RUNNING)));
    for (space, lifecycle) in bindings {
        tx.execute(
            "INSERT INTO security_group_spaces (security_group_id, space_guid, lifecycle) VALUES \
             (?1, ?2, ?3)",
            params![id, space, lifecycle],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    }
    Ok(())
}

/// Returns every stored guid.
fn stored_guids(tx: &Transaction<'_>) -> Result<Vec<String>, SqliteStoreError> {
    let mut statement = tx
        .prepare("SELECT guid FROM security_groups")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    statement
        .query_map(params![], |row| row.get::<_, String>(0))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))
}

/// Fills the space bindings of one group.
fn load_bindings(
    tx: &Transaction<'_>,
    id: i64,
    group: &mut SecurityGroup,
) -> Result<(), SqliteStoreError> {
    let mut statement = tx
        .prepare(
            "SELECT space_guid, lifecycle FROM security_group_spaces WHERE security_group_id = ?1",
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = statement
        .query_map(params![id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    for (space, lifecycle) in rows {
        match lifecycle.as_str() {
            STAGING => {
                group.staging_space_guids.insert(space);
            }
            RUNNING => {
                group.running_space_guids.insert(space);
            }
            other => {
                return Err(SqliteStoreError::Invalid(format!(
                    "unknown binding lifecycle '{other}'"
                )));
            }
        }
    }
    Ok(())
}
