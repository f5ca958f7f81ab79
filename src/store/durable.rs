//! ACID-durable mirror of the tagged graph, backed by redb.
//!
//! Two tables: entity id → tag list, and relation literal
//! (`("a", "r", "b")`) → tag list. Tag lists are bincode-encoded. Every upsert
//! is a single write transaction, so reading the prior list and writing the
//! appended one is atomic. A relation and its endpoints share one transaction.

use std::fmt::Display;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};

use crate::error::StoreError;
use crate::graph::{TaggedGraph, Triple};
use crate::provenance::{self, ProvenanceTag};
use crate::store::StoreResult;

const ENTITY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");
const RELATION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("relations");

/// File name of the database inside the data directory.
pub const DB_FILE: &str = "graph.redb";

fn redb_err<E: Display>(what: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Redb {
        message: format!("{what} failed: {e}"),
    }
}

fn encode(tags: &[ProvenanceTag]) -> StoreResult<Vec<u8>> {
    bincode::serialize(tags).map_err(|e| StoreError::Serialization {
        message: format!("failed to encode tags: {e}"),
    })
}

fn decode(bytes: &[u8]) -> StoreResult<Vec<ProvenanceTag>> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("failed to decode tags: {e}"),
    })
}

/// Append `tag` to the list under `key` inside an open write transaction.
fn upsert_in(
    txn: &WriteTransaction,
    table: TableDefinition<'static, &'static str, &'static [u8]>,
    key: &str,
    tag: Option<&ProvenanceTag>,
) -> StoreResult<bool> {
    let mut t = txn.open_table(table).map_err(redb_err("open_table"))?;
    let prior = t
        .get(key)
        .map_err(redb_err("get"))?
        .map(|guard| decode(guard.value()))
        .transpose()?;
    let created = prior.is_none();
    let mut tags = prior.unwrap_or_default();
    let appended = tag.is_some_and(|tag| provenance::accumulate(&mut tags, tag));
    if created || appended {
        let bytes = encode(&tags)?;
        t.insert(key, bytes.as_slice()).map_err(redb_err("insert"))?;
    }
    Ok(created || appended)
}

/// redb-backed persistence for [`MemoryGraphStore`](super::memory::MemoryGraphStore).
pub struct DurableGraph {
    db: Database,
}

impl DurableGraph {
    /// Open or create the database in `data_dir`.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create both tables up front so read transactions never miss them.
        let txn = db.begin_write().map_err(redb_err("begin_write"))?;
        txn.open_table(ENTITY_TABLE).map_err(redb_err("open_table"))?;
        txn.open_table(RELATION_TABLE).map_err(redb_err("open_table"))?;
        txn.commit().map_err(redb_err("commit"))?;

        Ok(Self { db })
    }

    fn upsert(
        &self,
        table: TableDefinition<'static, &'static str, &'static [u8]>,
        key: &str,
        tag: Option<&ProvenanceTag>,
    ) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        let changed = upsert_in(&txn, table, key, tag)?;
        txn.commit().map_err(redb_err("commit"))?;
        Ok(changed)
    }

    pub fn upsert_entity(&self, id: &str, tag: Option<&ProvenanceTag>) -> StoreResult<bool> {
        self.upsert(ENTITY_TABLE, id, tag)
    }

    /// Upsert a relation; its endpoints are created too, untagged.
    pub fn upsert_relation(&self, triple: &Triple, tag: Option<&ProvenanceTag>) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        upsert_in(&txn, ENTITY_TABLE, &triple.subject, None)?;
        upsert_in(&txn, ENTITY_TABLE, &triple.object, None)?;
        let changed = upsert_in(&txn, RELATION_TABLE, &triple.to_literal(), tag)?;
        txn.commit().map_err(redb_err("commit"))?;
        Ok(changed)
    }

    /// Drop every entity and relation.
    pub fn clear(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(redb_err("begin_write"))?;
        txn.delete_table(ENTITY_TABLE).map_err(redb_err("delete_table"))?;
        txn.delete_table(RELATION_TABLE).map_err(redb_err("delete_table"))?;
        txn.open_table(ENTITY_TABLE).map_err(redb_err("open_table"))?;
        txn.open_table(RELATION_TABLE).map_err(redb_err("open_table"))?;
        txn.commit().map_err(redb_err("commit"))
    }

    /// Read the whole graph.
    pub fn load_all(&self) -> StoreResult<TaggedGraph> {
        let txn = self.db.begin_read().map_err(redb_err("begin_read"))?;
        let mut out = TaggedGraph::default();

        let entities = txn.open_table(ENTITY_TABLE).map_err(redb_err("open_table"))?;
        for row in entities.iter().map_err(redb_err("iter"))? {
            let (k, v) = row.map_err(redb_err("iter"))?;
            out.entities.insert(k.value().to_string(), decode(v.value())?);
        }

        let relations = txn.open_table(RELATION_TABLE).map_err(redb_err("open_table"))?;
        for row in relations.iter().map_err(redb_err("iter"))? {
            let (k, v) = row.map_err(redb_err("iter"))?;
            let triple = Triple::parse_literal(k.value()).map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            })?;
            out.relations.insert(triple, decode(v.value())?);
        }

        Ok(out)
    }
}

impl std::fmt::Debug for DurableGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableGraph").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tag(id: &str) -> ProvenanceTag {
        ProvenanceTag::new(format!("chunk-{id}.json")).with_pages(1, 2)
    }

    #[test]
    fn upsert_is_idempotent_per_tag() {
        let dir = TempDir::new().unwrap();
        let db = DurableGraph::open(dir.path()).unwrap();
        let t = Triple::new("a", "r", "b");

        assert!(db.upsert_relation(&t, Some(&tag("1"))).unwrap());
        assert!(!db.upsert_relation(&t, Some(&tag("1"))).unwrap());
        assert!(db.upsert_relation(&t, Some(&tag("2"))).unwrap());

        let all = db.load_all().unwrap();
        assert_eq!(all.relations[&t], vec![tag("1"), tag("2")]);
        assert_eq!(all.entity_count(), 2);
    }

    #[test]
    fn persistence_across_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let db = DurableGraph::open(dir.path()).unwrap();
            db.upsert_entity("Fabian", Some(&tag("x"))).unwrap();
            db.upsert_relation(&Triple::new("Bianca", "EDGE", "Portia"), None)
                .unwrap();
        }
        let db = DurableGraph::open(dir.path()).unwrap();
        let all = db.load_all().unwrap();
        assert_eq!(all.tags_of("Fabian"), &[tag("x")]);
        assert_eq!(all.relation_count(), 1);
    }

    #[test]
    fn concurrent_relation_upserts_keep_every_tag() {
        let dir = TempDir::new().unwrap();
        let db = DurableGraph::open(dir.path()).unwrap();
        let t = Triple::new("a", "r", "b");
        std::thread::scope(|s| {
            for i in 0..8 {
                let (db, t) = (&db, &t);
                s.spawn(move || db.upsert_relation(t, Some(&tag(&i.to_string()))).unwrap());
            }
        });

        let all = db.load_all().unwrap();
        assert_eq!(all.relations[&t].len(), 8);
        assert_eq!(all.entities.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(all.entities.values().all(Vec::is_empty));
    }

    #[test]
    fn relation_upsert_reports_only_relation_changes() {
        let dir = TempDir::new().unwrap();
        let db = DurableGraph::open(dir.path()).unwrap();
        db.upsert_entity("a", Some(&tag("1"))).unwrap();
        let t = Triple::new("a", "r", "b");
        assert!(db.upsert_relation(&t, None).unwrap());
        assert!(!db.upsert_relation(&t, None).unwrap());

        let all = db.load_all().unwrap();
        assert_eq!(all.tags_of("a"), &[tag("1")]);
        assert!(all.tags_of("b").is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let dir = TempDir::new().unwrap();
        let db = DurableGraph::open(dir.path()).unwrap();
        db.upsert_relation(&Triple::new("a", "r", "b"), None).unwrap();
        db.clear().unwrap();
        let all = db.load_all().unwrap();
        assert_eq!(all.entity_count(), 0);
        assert_eq!(all.relation_count(), 0);
    }
}
