use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::tokenizer::TokenStream;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::types::NoteKey;

/// The single indexed field.
pub const FIELD: &str = "text";
const KEY_FIELD: &str = "key";

/// Bumped whenever the snapshot layout changes.
const SNAPSHOT_VERSION: u32 = 2;

/// Weights for how a query term matched an index term.
const PREFIX_BOOST: f32 = 0.5;
const FUZZY_BOOST: f32 = 0.25;
/// Query terms shorter than this are never fuzzy-matched.
const FUZZY_MIN_LEN: usize = 3;

/// One writer thread is plenty for a personal notebook.
const WRITER_HEAP_BYTES: usize = 20_000_000;

/// A search hit: (note_key, relevance). Higher is better.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexResult {
    pub note_id: NoteKey,
    pub score: f32,
}

/// Persisted form: the indexed text per note. Loading replays it into a
/// fresh in-RAM index.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    field: String,
    documents: BTreeMap<NoteKey, String>,
}

/// Full-text index over note text, one document per note key.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    key: Field,
    text: Field,
    /// What is currently indexed, kept for snapshots.
    documents: BTreeMap<NoteKey, String>,
}

impl SearchIndex {
    pub fn new() -> Result<Self> {
        let mut builder = Schema::builder();
        let key = builder.add_text_field(KEY_FIELD, STRING | STORED);
        let text = builder.add_text_field(FIELD, TEXT);
        let index = Index::create_in_ram(builder.build());
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| anyhow::anyhow!("Index reader init failed: {e}"))?;
        let writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(|e| anyhow::anyhow!("Index writer init failed: {e}"))?;
        Ok(Self { index, reader, writer, key, text, documents: BTreeMap::new() })
    }

    /// Index `text` under `key`, replacing whatever was there before.
    pub fn upsert(&mut self, key: &NoteKey, text: &str) -> Result<()> {
        self.stage(key, text)?;
        self.commit()?;
        self.documents.insert(key.clone(), text.to_string());
        Ok(())
    }

    pub fn remove(&mut self, key: &NoteKey) -> Result<bool> {
        if self.documents.remove(key).is_none() {
            return Ok(false);
        }
        self.writer.delete_term(Term::from_field_text(self.key, key.as_str()));
        self.commit()?;
        Ok(true)
    }

    pub fn contains(&self, key: &NoteKey) -> bool {
        self.documents.contains_key(key)
    }

    /// Number of documents in the index.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Fuzzy, prefix-expanded search. Any query term may match (OR semantics).
    /// Returns results sorted by descending score, ties broken by key.
    pub fn search(&self, query: &str) -> Result<Vec<IndexResult>> {
        let clauses = self.query_clauses(query)?;
        if clauses.is_empty() || self.documents.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let hits = searcher
            .search(&BooleanQuery::new(clauses), &TopDocs::with_limit(self.documents.len()))
            .map_err(|e| anyhow::anyhow!("Index search failed: {e}"))?;

        let mut results = Vec::with_capacity(hits.len());
        for (score, address) in hits {
            let doc: TantivyDocument = searcher.doc(address)?;
            let Some(key) = doc.get_first(self.key).and_then(|v| v.as_str()) else {
                tracing::warn!(?address, "indexed document without a key");
                continue;
            };
            results.push(IndexResult { note_id: NoteKey::new(key), score });
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.note_id.cmp(&b.note_id))
        });
        Ok(results)
    }

    /// Serialize the whole index for persistence.
    pub fn serialize(&self) -> Result<String> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            field: FIELD.to_string(),
            documents: self.documents.clone(),
        };
        serde_json::to_string(&snapshot).map_err(|e| anyhow::anyhow!("Index serialize failed: {e}"))
    }

    /// Restore an index from [`SearchIndex::serialize`] output.
    pub fn deserialize(snapshot: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(snapshot)
            .map_err(|e| anyhow::anyhow!("Index deserialize failed: {e}"))?;
        if snapshot.version != SNAPSHOT_VERSION || snapshot.field != FIELD {
            anyhow::bail!(
                "Unsupported index snapshot (version {}, field {:?})",
                snapshot.version,
                snapshot.field
            );
        }
        let mut index = Self::new()?;
        for (key, text) in &snapshot.documents {
            index.stage(key, text)?;
        }
        index.commit()?;
        index.documents = snapshot.documents;
        Ok(index)
    }

    fn stage(&mut self, key: &NoteKey, text: &str) -> Result<()> {
        self.writer.delete_term(Term::from_field_text(self.key, key.as_str()));
        self.writer
            .add_document(doc!(self.key => key.as_str(), self.text => text))
            .map_err(|e| anyhow::anyhow!("Index add failed: {e}"))?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.writer
            .commit()
            .map_err(|e| anyhow::anyhow!("Index commit failed: {e}"))?;
        self.reader.reload()?;
        Ok(())
    }

    /// Every query term, run through the field's own analyzer, matches
    /// exactly, as a prefix, or (when long enough) within one edit.
    fn query_clauses(&self, query: &str) -> Result<Vec<(Occur, Box<dyn Query>)>> {
        let mut analyzer = self.index.tokenizer_for_field(self.text)?;
        let mut stream = analyzer.token_stream(query);
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        while stream.advance() {
            let token = stream.token().text.clone();
            let term = Term::from_field_text(self.text, &token);
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(term.clone(), IndexRecordOption::WithFreqs)),
            ));
            clauses.push((
                Occur::Should,
                Box::new(BoostQuery::new(
                    Box::new(FuzzyTermQuery::new_prefix(term.clone(), 0, true)),
                    PREFIX_BOOST,
                )),
            ));
            if token.chars().count() >= FUZZY_MIN_LEN {
                clauses.push((
                    Occur::Should,
                    Box::new(BoostQuery::new(Box::new(FuzzyTermQuery::new(term, 1, true)), FUZZY_BOOST)),
                ));
            }
        }
        Ok(clauses)
    }
}
