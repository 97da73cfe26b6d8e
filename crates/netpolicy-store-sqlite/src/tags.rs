// netpolicy-store-sqlite/src/tags.rs
// ============================================================================
// Module: Tag Allocator
// Description: Transactional issue, retirement, and reclamation of group tags.
// Purpose: Give every referenced workload group exactly one stable tag.
// Dependencies: netpolicy-core, rusqlite
// ============================================================================

//! ## Overview
//! Tags live in the `groups` table, keyed by the tag value with a unique
//! group id. Allocation runs inside the caller's write transaction, so two
//! first references to the same group resolve to one row. A group whose last
//! reference disappears is marked retired rather than deleted; its tag comes
//! back on the next reference. Retired application groups are reclaimed only
//! once every never-used value is taken.

// ============================================================================//
// SECTION: Imports
// ============================================================================//

use netpolicy_core::GroupRef;
use netpolicy_core::GroupType;
use netpolicy_core::Tag;
use netpolicy_core::TagRecord;
use netpolicy_core::TagWidth;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;

use crate::store::SqliteStoreError;
use crate::store::tag_from_column;

// ============================================================================//
// SECTION: Allocation
// ============================================================================//

/// Returns the tag for `group`, minting one when the group is new.
///
/// The boolean is true when a new tag was minted.
///
/// # Errors
///
/// Returns [`SqliteStoreError::TypeConflict`] when the id is tagged under
/// another type and [`SqliteStoreError::TagExhausted`] when no value is free.
pub fn acquire_or_get(
    tx: &Transaction<'_>,
    group: &GroupRef,
    width: TagWidth,
) -> Result<(Tag, bool), SqliteStoreError> {
    let existing: Option<(i64, String, bool)> = tx
        .query_row(
            "SELECT tag, type, retired FROM groups WHERE guid = ?1",
            params![group.id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    if let Some((tag, group_type, retired)) = existing {
        if group_type != group.group_type.as_str() {
            return Err(SqliteStoreError::TypeConflict(format!(
                "group '{}' is already tagged as type '{group_type}'",
                group.id
            )));
        }
        if retired {
            tx.execute("UPDATE groups SET retired = 0 WHERE tag = ?1", params![tag])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        return Ok((tag_from_column(tag)?, false));
    }
    let value = match lowest_free(tx, width)? {
        Some(value) => value,
        None => {
            reclaim_retired(tx)?;
            lowest_free(tx, width)?.ok_or_else(|| {
                SqliteStoreError::TagExhausted(format!(
                    "no tags available at tag length {}",
                    width.bytes()
                ))
            })?
        }
    };
    tx.execute(
        "INSERT INTO groups (tag, guid, type, retired) VALUES (?1, ?2, ?3, 0)",
        params![value, group.id, group.group_type.as_str()],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok((tag_from_column(value)?, true))
}

/// Marks a group retired when nothing references it anymore.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Db`] when the update fails.
pub fn release_if_unreferenced(
    tx: &Transaction<'_>,
    group: &GroupRef,
) -> Result<(), SqliteStoreError> {
    tx.execute(
        "UPDATE groups SET retired = 1 WHERE guid = ?1 AND type = ?2 AND NOT EXISTS (SELECT 1 \
         FROM policies WHERE source_id = ?1 OR destination_id = ?1) AND NOT EXISTS (SELECT 1 \
         FROM egress_policies WHERE source_id = ?1)",
        params![group.id, group.group_type.as_str()],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

/// Lists every live group with its tag.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] when the read fails or a row is malformed.
pub fn live_tags(tx: &Transaction<'_>) -> Result<Vec<TagRecord>, SqliteStoreError> {
    let mut statement = tx
        .prepare("SELECT guid, type, tag FROM groups WHERE retired = 0 ORDER BY tag")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = statement
        .query_map(params![], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    rows.into_iter()
        .map(|(id, group_type, tag)| -> Result<TagRecord, SqliteStoreError> {
            let group_type: GroupType = group_type.parse()?;
            Ok(TagRecord {
                group: GroupRef::new(id, group_type),
                tag: tag_from_column(tag)?,
            })
        })
        .collect()
}

/// Returns the tag of `id` when one has been issued, live or retired.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Db`] when the read fails.
pub fn tag_for(tx: &Transaction<'_>, id: &str) -> Result<Option<Tag>, SqliteStoreError> {
    let value: Option<i64> = tx
        .query_row("SELECT tag FROM groups WHERE guid = ?1", params![id], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    value.map(tag_from_column).transpose()
}

// ============================================================================//
// SECTION: Helpers
// ============================================================================//

/// Finds the lowest unused tag value within the width.
fn lowest_free(tx: &Transaction<'_>, width: TagWidth) -> Result<Option<i64>, SqliteStoreError> {
    let max = i64::from(width.max_tag());
    tx.query_row(
        "SELECT CASE WHEN NOT EXISTS (SELECT 1 FROM groups WHERE tag = 1) THEN 1 ELSE (SELECT \
         MIN(g.tag + 1) FROM groups g WHERE g.tag + 1 <= ?1 AND NOT EXISTS (SELECT 1 FROM groups \
         h WHERE h.tag = g.tag + 1)) END",
        params![max],
        |row| row.get::<_, Option<i64>>(0),
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))
}

/// Deletes retired application groups that nothing references.
fn reclaim_retired(tx: &Transaction<'_>) -> Result<usize, SqliteStoreError> {
    tx.execute(
        "DELETE FROM groups WHERE retired = 1 AND type = ?1 AND NOT EXISTS (SELECT 1 FROM \
         policies p WHERE p.source_id = groups.guid OR p.destination_id = groups.guid) AND NOT \
         EXISTS (SELECT 1 FROM egress_policies e WHERE e.source_id = groups.guid)",
        params![GroupType::App.as_str()],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))
}
