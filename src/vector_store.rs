use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use rayon::prelude::*;
use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    TableError,
};
use serde::Serialize;
use tracing::debug;

use crate::{
    chunk_id::ChunkId,
    collection::{Chunk, ChunkRecord},
    error::{Error, Result},
};

/// Header size: 4 bytes embedding dimension.
const HEADER_SIZE: usize = 4;

/// A chunk id with its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub id: ChunkId,
    pub score: f32,
}

/// Read-only similarity search over pre-embedded collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Top `top_k` chunks of `collection` by similarity to `query`, best
    /// first. Fails with [`Error::CollectionUnavailable`] on error or when
    /// `timeout` elapses.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        timeout: Duration,
    ) -> Result<Vec<ScoredChunk>>;

    /// Chunk bodies for `ids`, in input order. Unknown ids are skipped.
    async fn load_chunks(
        &self,
        collection: &str,
        ids: &[ChunkId],
    ) -> Result<Vec<Chunk>>;
}

/// Chunks and their embeddings, one pair of redb tables per collection.
///
/// - `chunks/<collection>`: chunk id -> JSON-encoded [`Chunk`]
/// - `vectors/<collection>`: chunk id -> 4-byte dimension D (u32 LE)
///   followed by D f32 LE values
///
/// Tables are created on first import; searching a collection that was
/// never imported yields no hits.
#[derive(Clone)]
pub struct ChunkStore {
    db: Arc<Database>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportStats {
    /// Records written per collection.
    pub imported: BTreeMap<String, usize>,
    pub skipped: usize,
}

impl ChunkStore {
    /// Open or create a chunk database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use grantforge::ChunkStore;
    ///
    /// let store = ChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
    /// assert_eq!(store.count("full_content").unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Write `records` in a single transaction. A record whose collection is
    /// unset uses `default_collection`; records with no collection at all or
    /// an empty embedding are skipped.
    ///
    /// Every embedding of a collection must share one dimension and hold only
    /// finite values. A batch that breaks this, against itself or against
    /// vectors already stored, is rejected whole.
    pub fn import(
        &self,
        records: &[ChunkRecord],
        default_collection: Option<&str>,
    ) -> Result<ImportStats> {
        let mut stats = ImportStats::default();
        let mut grouped: BTreeMap<String, Vec<&ChunkRecord>> = BTreeMap::new();

        for record in records {
            let collection = record
                .collection
                .as_deref()
                .or(default_collection)
                .map(str::to_string);
            match collection {
                Some(c) if !record.embedding.is_empty() => {
                    grouped.entry(c).or_default().push(record)
                }
                _ => stats.skipped += 1,
            }
        }

        if grouped.is_empty() {
            return Ok(stats);
        }

        for (collection, records) in &grouped {
            self.check_embeddings(collection, records)?;
        }

        let txn = self.db.begin_write()?;
        for (collection, records) in &grouped {
            let chunks_name = chunks_table(collection);
            let vectors_name = vectors_table(collection);
            let mut chunks = txn.open_table(chunks_def(&chunks_name))?;
            let mut vectors = txn.open_table(vectors_def(&vectors_name))?;

            for record in records {
                let id = ChunkId::new(collection, &record.key);
                let chunk = Chunk {
                    id,
                    collection: collection.clone(),
                    text: record.text.clone(),
                    source: record.source.clone(),
                    tags: record.tags.clone(),
                    metadata: record.metadata.clone(),
                };
                let body = serde_json::to_vec(&chunk)?;
                chunks.insert(id.0, body.as_slice())?;

                let encoded = encode_vector(&record.embedding);
                vectors.insert(id.0, encoded.as_slice())?;
            }
            stats.imported.insert(collection.clone(), records.len());
        }
        txn.commit()?;

        Ok(stats)
    }

    fn check_embeddings(&self, collection: &str, records: &[&ChunkRecord]) -> Result<()> {
        let mut expected = self.stored_dimension(collection)?;
        for record in records {
            if record.embedding.iter().any(|x| !x.is_finite()) {
                return Err(Error::Config(format!(
                    "chunk '{}' in '{collection}' has a non-finite embedding value",
                    record.key
                )));
            }
            let dimension = record.embedding.len();
            match expected {
                Some(d) if d != dimension => {
                    return Err(Error::Config(format!(
                        "chunk '{}' in '{collection}' has embedding dimension {dimension}, expected {d}",
                        record.key
                    )));
                }
                Some(_) => {}
                None => expected = Some(dimension),
            }
        }
        Ok(())
    }

    /// Dimension of the vectors already stored for `collection`, if any.
    fn stored_dimension(&self, collection: &str) -> Result<Option<usize>> {
        let name = vectors_table(collection);
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(vectors_def(&name)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(entry) = table.iter()?.next() else {
            return Ok(None);
        };
        let (_, v) = entry?;
        Ok(decode_vector(v.value()).map(|vector| vector.len()))
    }

    /// Drop every chunk of `collection`. Returns whether anything existed.
    pub fn clear(&self, collection: &str) -> Result<bool> {
        let chunks_name = chunks_table(collection);
        let vectors_name = vectors_table(collection);

        let txn = self.db.begin_write()?;
        let removed = txn.delete_table(chunks_def(&chunks_name))?;
        txn.delete_table(vectors_def(&vectors_name))?;
        txn.commit()?;
        Ok(removed)
    }

    pub fn count(&self, collection: &str) -> Result<u64> {
        let name = chunks_table(collection);
        let txn = self.db.begin_read()?;
        match txn.open_table(chunks_def(&name)) {
            Ok(table) => Ok(table.len()?),
            Err(TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Brute-force cosine similarity over every vector in the collection.
    pub fn search_blocking(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let name = vectors_table(collection);
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(vectors_def(&name)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let vector = decode_vector(v.value()).ok_or_else(|| {
                unavailable(collection, format!("corrupt vector for chunk {}", ChunkId(k.value())))
            })?;
            if vector.len() != query.len() {
                return Err(unavailable(
                    collection,
                    format!(
                        "embedding dimension {} does not match query dimension {}",
                        vector.len(),
                        query.len()
                    ),
                ));
            }
            entries.push((ChunkId(k.value()), vector));
        }

        let query_norm = norm(query);
        let mut scored: Vec<ScoredChunk> = entries
            .par_iter()
            .map(|(id, vector)| ScoredChunk {
                id: *id,
                score: cosine(query, query_norm, vector),
            })
            .collect();

        // Score descending, ties by id so results are stable.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        scored.truncate(top_k);

        debug!(collection, hits = scored.len(), "vector search");
        Ok(scored)
    }

    pub fn load_chunks_blocking(
        &self,
        collection: &str,
        ids: &[ChunkId],
    ) -> Result<Vec<Chunk>> {
        let name = chunks_table(collection);
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(chunks_def(&name)) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut seen = HashSet::new();
        let mut chunks = Vec::with_capacity(ids.len());
        for id in ids {
            if !seen.insert(*id) {
                continue;
            }
            if let Some(guard) = table.get(id.0)? {
                chunks.push(serde_json::from_slice(guard.value())?);
            }
        }
        Ok(chunks)
    }
}

#[async_trait]
impl VectorStore for ChunkStore {
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        timeout: Duration,
    ) -> Result<Vec<ScoredChunk>> {
        let store = self.clone();
        let name = collection.to_string();
        let query = query.to_vec();
        let task = tokio::task::spawn_blocking(move || {
            store.search_blocking(&name, &query, top_k)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(hits))) => Ok(hits),
            Ok(Ok(Err(e @ Error::CollectionUnavailable { .. }))) => Err(e),
            Ok(Ok(Err(e))) => Err(unavailable(collection, e.to_string())),
            Ok(Err(join)) => Err(unavailable(collection, join.to_string())),
            Err(_) => Err(unavailable(
                collection,
                format!("search timed out after {}ms", timeout.as_millis()),
            )),
        }
    }

    async fn load_chunks(
        &self,
        collection: &str,
        ids: &[ChunkId],
    ) -> Result<Vec<Chunk>> {
        let store = self.clone();
        let name = collection.to_string();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || store.load_chunks_blocking(&name, &ids))
            .await
            .map_err(|e| unavailable(collection, e.to_string()))?
    }
}

fn chunks_table(collection: &str) -> String {
    format!("chunks/{collection}")
}

fn vectors_table(collection: &str) -> String {
    format!("vectors/{collection}")
}

fn chunks_def(name: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(name)
}

fn vectors_def(name: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(name)
}

fn unavailable(collection: &str, reason: String) -> Error {
    Error::CollectionUnavailable {
        collection: collection.to_string(),
        reason,
    }
}

fn encode_vector(data: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(data));
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(bytemuck::cast_slice(data));
    out
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension * 4 {
        return None;
    }

    // redb values carry no alignment guarantee.
    match bytemuck::try_cast_slice::<u8, f32>(body) {
        Ok(values) => Some(values.to_vec()),
        Err(_) => Some(
            body.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
    }
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(query: &[f32], query_norm: f32, v: &[f32]) -> f32 {
    let denom = query_norm * norm(v);
    if denom == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(v).map(|(a, b)| a * b).sum();
    dot / denom
}
