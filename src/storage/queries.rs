//! Database queries for memory and relationship operations

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{MemoryGraphError, Result};
use crate::types::{Direction, Memory, MemoryUpdate, Relationship, RelationshipType};

const MEMORY_COLUMNS: &str = "id, memory_type, title, content, summary, tags, importance, \
                              context, created_at, updated_at, version";

const RELATIONSHIP_COLUMNS: &str = "id, from_memory_id, to_memory_id, relationship_type, \
                                    strength, confidence, context, created_at";

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse a memory from a database row
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let memory_type_str: String = row.get("memory_type")?;
    let tags_str: String = row.get("tags")?;
    let context_str: String = row.get("context")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let memory_type = memory_type_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(MemoryGraphError::InvalidInput(e)),
        )
    })?;

    Ok(Memory {
        id: row.get("id")?,
        memory_type,
        title: row.get("title")?,
        content: row.get("content")?,
        summary: row.get("summary")?,
        tags: parse_json(5, &tags_str)?,
        importance: row.get("importance")?,
        context: parse_json(7, &context_str)?,
        created_at: parse_timestamp(8, &created_at)?,
        updated_at: parse_timestamp(9, &updated_at)?,
        version: row.get("version")?,
    })
}

/// Parse a relationship from a database row
pub fn relationship_from_row(row: &Row) -> rusqlite::Result<Relationship> {
    let relationship_type: String = row.get("relationship_type")?;
    let created_at: String = row.get("created_at")?;

    Ok(Relationship {
        id: row.get("id")?,
        from_memory_id: row.get("from_memory_id")?,
        to_memory_id: row.get("to_memory_id")?,
        relationship_type: RelationshipType::from(relationship_type),
        strength: row.get("strength")?,
        confidence: row.get("confidence")?,
        context: row.get("context")?,
        created_at: parse_timestamp(7, &created_at)?,
    })
}

/// Insert a memory, or overwrite the row with the same id
pub fn upsert_memory(conn: &Connection, memory: &Memory) -> Result<()> {
    let tags_json = serde_json::to_string(&memory.tags)?;
    let context_json = serde_json::to_string(&memory.context)?;

    // ON CONFLICT ... DO UPDATE rather than INSERT OR REPLACE: a replace is a
    // delete + insert and would cascade-delete the memory's relationships.
    conn.execute(
        "INSERT INTO memories (id, memory_type, title, content, summary, tags, importance,
                               context, created_at, updated_at, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            memory_type = excluded.memory_type,
            title = excluded.title,
            content = excluded.content,
            summary = excluded.summary,
            tags = excluded.tags,
            importance = excluded.importance,
            context = excluded.context,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            version = excluded.version",
        params![
            memory.id,
            memory.memory_type.as_str(),
            memory.title,
            memory.content,
            memory.summary,
            tags_json,
            memory.importance,
            context_json,
            memory.created_at.to_rfc3339(),
            memory.updated_at.to_rfc3339(),
            memory.version,
        ],
    )?;
    Ok(())
}

/// Get a memory by ID
pub fn get_memory(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {} FROM memories WHERE id = ?1", MEMORY_COLUMNS);
    let memory = conn
        .query_row(&sql, params![id], memory_from_row)
        .optional()?;
    Ok(memory)
}

/// Keyset scan of memories; returns the page and whether more rows follow
pub fn scan_memories(
    conn: &Connection,
    after: Option<&str>,
    limit: usize,
) -> Result<(Vec<Memory>, bool)> {
    let sql = format!(
        "SELECT {} FROM memories WHERE (?1 IS NULL OR id > ?1) ORDER BY id LIMIT ?2",
        MEMORY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    // Fetch one extra row to learn whether another page exists
    let mut memories = stmt
        .query_map(params![after, (limit + 1) as i64], memory_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let has_more = memories.len() > limit;
    memories.truncate(limit);
    Ok((memories, has_more))
}

/// Keyset scan of relationships; returns the page and whether more rows follow
pub fn scan_relationships(
    conn: &Connection,
    after: Option<&str>,
    limit: usize,
) -> Result<(Vec<Relationship>, bool)> {
    let sql = format!(
        "SELECT {} FROM relationships WHERE (?1 IS NULL OR id > ?1) ORDER BY id LIMIT ?2",
        RELATIONSHIP_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut relationships = stmt
        .query_map(params![after, (limit + 1) as i64], relationship_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let has_more = relationships.len() > limit;
    relationships.truncate(limit);
    Ok((relationships, has_more))
}

pub fn count_memories(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
    Ok(count as u64)
}

pub fn count_relationships(conn: &Connection) -> Result<u64> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Insert a relationship, or overwrite the row with the same id
pub fn upsert_relationship(conn: &Connection, relationship: &Relationship) -> Result<()> {
    for endpoint in [&relationship.from_memory_id, &relationship.to_memory_id] {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM memories WHERE id = ?1)",
            params![endpoint],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(MemoryGraphError::Constraint(format!(
                "relationship {} references missing memory {}",
                relationship.id, endpoint
            )));
        }
    }

    conn.execute(
        "INSERT INTO relationships (id, from_memory_id, to_memory_id, relationship_type,
                                    strength, confidence, context, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            from_memory_id = excluded.from_memory_id,
            to_memory_id = excluded.to_memory_id,
            relationship_type = excluded.relationship_type,
            strength = excluded.strength,
            confidence = excluded.confidence,
            context = excluded.context,
            created_at = excluded.created_at",
        params![
            relationship.id,
            relationship.from_memory_id,
            relationship.to_memory_id,
            relationship.relationship_type.as_str(),
            relationship.strength,
            relationship.confidence,
            relationship.context,
            relationship.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Get a relationship by ID
pub fn get_relationship(conn: &Connection, id: &str) -> Result<Option<Relationship>> {
    let sql = format!(
        "SELECT {} FROM relationships WHERE id = ?1",
        RELATIONSHIP_COLUMNS
    );
    let relationship = conn
        .query_row(&sql, params![id], relationship_from_row)
        .optional()?;
    Ok(relationship)
}

/// Single-hop neighbours of a memory
pub fn get_related(
    conn: &Connection,
    memory_id: &str,
    direction: Direction,
    types: Option<&[RelationshipType]>,
) -> Result<Vec<(Relationship, Memory)>> {
    let filter = match direction {
        Direction::Outgoing => "from_memory_id = ?1",
        Direction::Incoming => "to_memory_id = ?1",
        Direction::Both => "(from_memory_id = ?1 OR to_memory_id = ?1)",
    };
    let sql = format!(
        "SELECT {} FROM relationships WHERE {} ORDER BY id",
        RELATIONSHIP_COLUMNS, filter
    );

    let mut stmt = conn.prepare(&sql)?;
    let relationships = stmt
        .query_map(params![memory_id], relationship_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut related = Vec::with_capacity(relationships.len());
    for relationship in relationships {
        if let Some(types) = types {
            if !types.contains(&relationship.relationship_type) {
                continue;
            }
        }
        let neighbor_id = match relationship.other_end(memory_id) {
            Some(id) => id.to_string(),
            None => continue,
        };
        if let Some(neighbor) = get_memory(conn, &neighbor_id)? {
            related.push((relationship, neighbor));
        }
    }

    Ok(related)
}

/// Apply a partial update to a stored memory
pub fn update_memory(conn: &Connection, id: &str, update: MemoryUpdate) -> Result<Memory> {
    let mut memory =
        get_memory(conn, id)?.ok_or_else(|| MemoryGraphError::NotFound(id.to_string()))?;
    memory.apply_update(update)?;
    upsert_memory(conn, &memory)?;
    Ok(memory)
}

/// Delete a memory; relationships go with it via ON DELETE CASCADE
pub fn delete_memory(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

pub fn delete_relationship(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM relationships WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::types::MemoryType;

    fn memory(id: &str, memory_type: MemoryType) -> Memory {
        let mut m = Memory::new(memory_type, format!("title {}", id), "content")
            .with_tags(["rust", "sqlite"]);
        m.id = id.to_string();
        m.context.languages = vec!["rust".to_string()];
        m
    }

    #[test]
    fn test_upsert_and_get_roundtrip() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_transaction(|conn| {
                let original = memory("a", MemoryType::CodePattern);
                upsert_memory(conn, &original)?;
                let loaded = get_memory(conn, "a")?.unwrap();
                assert_eq!(loaded, original);
                assert!(get_memory(conn, "missing")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_upsert_keeps_relationships() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_transaction(|conn| {
                upsert_memory(conn, &memory("a", MemoryType::Problem))?;
                upsert_memory(conn, &memory("b", MemoryType::Solution))?;
                upsert_relationship(conn, &Relationship::new("b", "a", RelationshipType::Solves))?;

                // Re-writing an endpoint must not cascade
                upsert_memory(conn, &memory("a", MemoryType::Problem))?;
                assert_eq!(count_relationships(conn)?, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_relationship_missing_endpoint_is_constraint() {
        let storage = Storage::open_in_memory().unwrap();
        let err = storage
            .with_transaction(|conn| {
                upsert_memory(conn, &memory("a", MemoryType::Problem))?;
                upsert_relationship(conn, &Relationship::new("a", "nope", RelationshipType::Causes))
            })
            .unwrap_err();
        assert!(matches!(err, MemoryGraphError::Constraint(_)));
    }

    #[test]
    fn test_scan_pages() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_transaction(|conn| {
                for id in ["a", "b", "c"] {
                    upsert_memory(conn, &memory(id, MemoryType::General))?;
                }
                let (page, more) = scan_memories(conn, None, 2)?;
                assert_eq!(page.len(), 2);
                assert!(more);
                let (page, more) = scan_memories(conn, Some("b"), 2)?;
                assert_eq!(page.len(), 1);
                assert_eq!(page[0].id, "c");
                assert!(!more);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_cascades() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_transaction(|conn| {
                upsert_memory(conn, &memory("a", MemoryType::Problem))?;
                upsert_memory(conn, &memory("b", MemoryType::Solution))?;
                upsert_relationship(conn, &Relationship::new("b", "a", RelationshipType::Solves))?;
                assert!(delete_memory(conn, "a")?);
                assert_eq!(count_relationships(conn)?, 0);
                assert!(!delete_memory(conn, "a")?);
                Ok(())
            })
            .unwrap();
    }
}
