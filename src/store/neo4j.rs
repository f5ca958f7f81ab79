//! Neo4j backend over Bolt, through `neo4rs`.
//!
//! Entities are `(:Entity {id, tags})` nodes. Relations are relationships whose
//! type is the escaped relation label, so any label text survives the Cypher
//! identifier rules. Tags are stored as a list of JSON strings because Neo4j
//! properties cannot hold maps.
//!
//! [`GraphStore`] is blocking, so each call runs on a private tokio runtime.
//! The Bolt connection pool is opened by the first query.

use std::time::Duration;

use neo4rs::{ConfigBuilder, Graph, Query, Row, query};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tokio::sync::OnceCell;

use crate::error::StoreError;
use crate::escape::{from_escape, to_escape};
use crate::graph::traverse::{Direction, Neighbor};
use crate::graph::{TaggedGraph, Triple};
use crate::provenance::ProvenanceTag;

use super::{GraphStore, StoreResult};

const BACKEND: &str = "neo4j";

fn default_url() -> String {
    "localhost:7687".into()
}
fn default_user() -> String {
    "neo4j".into()
}
fn default_database() -> String {
    "neo4j".into()
}
fn default_timeout() -> u64 {
    30
}

/// Connection settings for [`Neo4jGraphStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neo4jConfig {
    /// Bolt address, `host:port` or `neo4j://host:port`.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    /// Upper bound on one query, connection included.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Graph store client for a Neo4j server.
pub struct Neo4jGraphStore {
    config: Neo4jConfig,
    runtime: Runtime,
    graph: OnceCell<Graph>,
}

impl Neo4jGraphStore {
    pub fn new(config: Neo4jConfig) -> StoreResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("kgscope-neo4j")
            .enable_all()
            .build()
            .map_err(|source| StoreError::Io { source })?;
        Ok(Self {
            config,
            runtime,
            graph: OnceCell::new(),
        })
    }

    async fn connect(&self) -> Result<&Graph, neo4rs::Error> {
        self.graph
            .get_or_try_init(|| async {
                let config = ConfigBuilder::default()
                    .uri(self.config.url.as_str())
                    .user(self.config.user.as_str())
                    .password(self.config.password.as_str())
                    .db(self.config.database.as_str())
                    .build()?;
                Graph::connect(config).await
            })
            .await
    }

    /// Run one query in its own transaction and collect its rows.
    fn fetch(&self, q: Query, operation: &str, entity: &str) -> StoreResult<Vec<Row>> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let work = async {
            let graph = self.connect().await?;
            let mut stream = graph.execute(q).await?;
            let mut rows = Vec::new();
            while let Some(row) = stream.next().await? {
                rows.push(row);
            }
            Ok::<_, neo4rs::Error>(rows)
        };
        match self
            .runtime
            .block_on(async { tokio::time::timeout(timeout, work).await })
        {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) => Err(classify(&e, operation, entity)),
            Err(_) => Err(unavailable(
                operation,
                entity,
                format!("timed out after {}s", self.config.timeout_secs),
            )),
        }
    }

    /// Run an upsert and read its `changed` column.
    fn upsert(&self, q: Query, operation: &str, entity: &str) -> StoreResult<bool> {
        let rows = self.fetch(q, operation, entity)?;
        let row = rows.first().ok_or_else(|| StoreError::Serialization {
            message: format!("{operation} returned no row"),
        })?;
        Ok(decode::<ChangedRow>(row, operation)?.changed)
    }

    fn relation_type(&self, relation: &str) -> StoreResult<String> {
        if relation.is_empty() {
            return Err(StoreError::InvalidIdentifier {
                backend: BACKEND.into(),
                identifier: relation.into(),
                message: "relation label is empty".into(),
            });
        }
        Ok(format!("`{}`", to_escape(relation)))
    }
}

fn unavailable(operation: &str, entity: &str, message: impl Into<String>) -> StoreError {
    StoreError::Unavailable {
        backend: BACKEND.into(),
        operation: operation.into(),
        entity: entity.into(),
        message: message.into(),
    }
}

/// Server-side rejections are query errors; everything else means the store
/// could not be reached.
fn classify(err: &neo4rs::Error, operation: &str, entity: &str) -> StoreError {
    match err {
        neo4rs::Error::Neo4j(_) => StoreError::Query {
            backend: BACKEND.into(),
            operation: operation.into(),
            message: err.to_string(),
        },
        _ => unavailable(operation, entity, err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// Decode a row by column name. Missing or mistyped columns are errors.
fn decode<T: DeserializeOwned>(row: &Row, operation: &str) -> StoreResult<T> {
    row.to::<T>().map_err(|e| StoreError::Serialization {
        message: format!("malformed {operation} row: {e}"),
    })
}

#[derive(Debug, Deserialize)]
struct ChangedRow {
    changed: bool,
}

#[derive(Debug, Deserialize)]
struct PathRow {
    id: String,
    nodes: Vec<String>,
    types: Vec<String>,
    tags: Vec<Vec<String>>,
}

impl PathRow {
    fn into_neighbor(self) -> StoreResult<Neighbor> {
        if self.nodes.len() != self.types.len() + 1 {
            return Err(StoreError::Serialization {
                message: format!(
                    "path to {:?} has {} nodes for {} relationships",
                    self.id,
                    self.nodes.len(),
                    self.types.len()
                ),
            });
        }
        Ok(Neighbor {
            path_relations: self
                .types
                .iter()
                .map(|t| decode_type(t))
                .collect::<StoreResult<_>>()?,
            path_tags: self
                .tags
                .iter()
                .map(|tags| decode_tags(tags))
                .collect::<StoreResult<_>>()?,
            path_nodes: self.nodes,
            id: self.id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EntityRow {
    id: String,
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RelationRow {
    subject: String,
    relation: String,
    object: String,
    tags: Vec<String>,
}

fn encode_tags(tag: Option<&ProvenanceTag>) -> StoreResult<Vec<String>> {
    tag.map(|t| {
        serde_json::to_string(t).map_err(|e| StoreError::Serialization {
            message: format!("failed to encode tag: {e}"),
        })
    })
    .into_iter()
    .collect()
}

fn decode_tags(items: &[String]) -> StoreResult<Vec<ProvenanceTag>> {
    items
        .iter()
        .map(|text| {
            serde_json::from_str(text).map_err(|e| StoreError::Serialization {
                message: format!("malformed tag {text:?}: {e}"),
            })
        })
        .collect()
}

fn decode_type(relation_type: &str) -> StoreResult<String> {
    from_escape(relation_type).map_err(|e| StoreError::InvalidIdentifier {
        backend: BACKEND.into(),
        identifier: relation_type.into(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Cypher
// ---------------------------------------------------------------------------

/// Path query: every shortest path of 1..=k hops from the start entity.
pub(crate) fn k_hop_statement(k: usize, direction: Direction) -> String {
    let arrow = match direction {
        Direction::Outgoing => "->",
        Direction::Both => "-",
    };
    format!(
        "MATCH p = ALL SHORTEST (s:Entity {{id: $id}})-[]{arrow}{{1,{k}}}(n:Entity) \
         WHERE n <> s \
         RETURN n.id AS id, [x IN nodes(p) | x.id] AS nodes, \
         [r IN relationships(p) | type(r)] AS types, \
         [r IN relationships(p) | coalesce(r.tags, [])] AS tags \
         ORDER BY length(p)"
    )
}

/// Tag append on a merged element `var`.
///
/// `SET {var}.__lock` takes the element's write lock before `tags` is read, so
/// concurrent appends serialize instead of overwriting each other.
fn append_tags_clause(var: &str) -> String {
    format!(
        "ON CREATE SET {var}.__created = true \
         SET {var}.__lock = true \
         WITH {var}, coalesce({var}.__created, false) AS created, \
         coalesce({var}.tags, []) AS old \
         WITH {var}, created, old, [t IN $tags WHERE NOT t IN old] AS fresh \
         SET {var}.tags = old + fresh \
         REMOVE {var}.__created, {var}.__lock \
         RETURN created OR size(fresh) > 0 AS changed"
    )
}

fn upsert_entity_statement() -> String {
    format!("MERGE (e:Entity {{id: $id}}) {}", append_tags_clause("e"))
}

fn upsert_relation_statement(relation_type: &str) -> String {
    format!(
        "MERGE (a:Entity {{id: $subject}}) ON CREATE SET a.tags = [] \
         MERGE (b:Entity {{id: $object}}) ON CREATE SET b.tags = [] \
         MERGE (a)-[r:{relation_type}]->(b) {}",
        append_tags_clause("r")
    )
}

impl GraphStore for Neo4jGraphStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn k_hop_neighbors(
        &self,
        entity: &str,
        k: usize,
        direction: Direction,
    ) -> StoreResult<Vec<Neighbor>> {
        let q = query(&k_hop_statement(k, direction)).param("id", entity);
        self.fetch(q, "k_hop_neighbors", entity)?
            .iter()
            .map(|row| decode::<PathRow>(row, "k_hop_neighbors")?.into_neighbor())
            .collect()
    }

    fn upsert_entity(&self, id: &str, tag: Option<&ProvenanceTag>) -> StoreResult<bool> {
        let q = query(&upsert_entity_statement())
            .param("id", id)
            .param("tags", encode_tags(tag)?);
        self.upsert(q, "upsert_entity", id)
    }

    fn upsert_relation(&self, triple: &Triple, tag: Option<&ProvenanceTag>) -> StoreResult<bool> {
        let statement = upsert_relation_statement(&self.relation_type(&triple.relation)?);
        let q = query(&statement)
            .param("subject", triple.subject.as_str())
            .param("object", triple.object.as_str())
            .param("tags", encode_tags(tag)?);
        self.upsert(q, "upsert_relation", &triple.subject)
    }

    fn clear(&self) -> StoreResult<()> {
        self.fetch(query("MATCH (n) DETACH DELETE n"), "clear", "*")?;
        Ok(())
    }

    fn snapshot(&self) -> StoreResult<TaggedGraph> {
        let mut out = TaggedGraph::default();
        let entities = query("MATCH (e:Entity) RETURN e.id AS id, coalesce(e.tags, []) AS tags");
        for row in self.fetch(entities, "snapshot", "*")? {
            let row: EntityRow = decode(&row, "snapshot")?;
            out.entities.insert(row.id, decode_tags(&row.tags)?);
        }
        let relations = query(
            "MATCH (a:Entity)-[r]->(b:Entity) \
             RETURN a.id AS subject, type(r) AS relation, b.id AS object, \
             coalesce(r.tags, []) AS tags",
        );
        for row in self.fetch(relations, "snapshot", "*")? {
            let row: RelationRow = decode(&row, "snapshot")?;
            let triple = Triple::new(row.subject, decode_type(&row.relation)?, row.object);
            out.relations.insert(triple, decode_tags(&row.tags)?);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Neo4jGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jGraphStore")
            .field("url", &self.config.url)
            .field("database", &self.config.database)
            .finish()
    }
}
