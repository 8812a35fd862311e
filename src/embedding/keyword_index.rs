/// Tantivy keyword index answering lexical queries (BM25)
use crate::retrieval::{LexicalOracle, OracleError, OracleHit, PassageId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

/// Writer heap budget
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Invalid passage id: {0}")]
    InvalidId(PassageId),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),

    #[error("Query parsing error: {0}")]
    QueryParseError(String),
}

/// Full-text index over passage text
///
/// Writes are buffered until `commit`; searches see committed documents only.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id_field: Field,
    text_field: Field,
    index_path: PathBuf,
}

impl KeywordIndex {
    /// Open the index at `index_path`, creating it if missing
    pub fn open(index_path: &Path) -> Result<Self, KeywordIndexError> {
        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(index_path)
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        } else {
            std::fs::create_dir_all(index_path)?;
            Index::create_in_dir(index_path, Self::schema())
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        };
        Self::from_index(index, index_path.to_path_buf())
    }

    fn schema() -> Schema {
        let mut schema_builder = Schema::builder();
        schema_builder.add_u64_field("id", INDEXED | STORED);
        schema_builder.add_text_field("text", TEXT);
        schema_builder.build()
    }

    fn from_index(index: Index, index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        let schema = index.schema();
        let id_field = schema.get_field("id").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'id' field in schema".to_string())
        })?;
        let text_field = schema.get_field("text").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'text' field in schema".to_string())
        })?;

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id_field,
            text_field,
            index_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.index_path
    }

    /// Add or replace a passage
    ///
    /// # Arguments
    /// * `id` - Passage id (must be non-negative)
    /// * `text` - Passage text
    pub fn upsert(&self, id: PassageId, text: &str) -> Result<(), KeywordIndexError> {
        let key = Self::key(id)?;
        let writer = self.writer.lock();
        writer.delete_term(Term::from_field_u64(self.id_field, key));
        writer
            .add_document(doc!(
                self.id_field => key,
                self.text_field => text,
            ))
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        Ok(())
    }

    pub fn delete(&self, id: PassageId) -> Result<(), KeywordIndexError> {
        let key = Self::key(id)?;
        self.writer
            .lock()
            .delete_term(Term::from_field_u64(self.id_field, key));
        Ok(())
    }

    /// Commit pending changes and make them visible to searches
    pub fn commit(&self) -> Result<(), KeywordIndexError> {
        self.writer
            .lock()
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    /// Search with any of the given terms; BM25 scores are unbounded
    pub fn search_terms(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<(PassageId, f32)>, KeywordIndexError> {
        let terms: Vec<&str> = terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let query = parser
            .parse_query(&terms.join(" "))
            .map_err(|e| KeywordIndexError::QueryParseError(e.to_string()))?;

        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let document: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let id = document
                .get_first(self.id_field)
                .and_then(|v| v.as_u64())
                .and_then(|v| PassageId::try_from(v).ok())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid ID field".to_string())
                })?;

            results.push((id, score));
        }

        Ok(results)
    }

    /// Remove every document
    pub fn clear(&self) -> Result<(), KeywordIndexError> {
        self.writer
            .lock()
            .delete_all_documents()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        self.commit()
    }

    /// Number of committed documents
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(id: PassageId) -> Result<u64, KeywordIndexError> {
        u64::try_from(id).map_err(|_| KeywordIndexError::InvalidId(id))
    }
}

#[async_trait]
impl LexicalOracle for KeywordIndex {
    async fn search(
        &self,
        query_terms: &[String],
        top_k: usize,
    ) -> Result<Vec<OracleHit>, OracleError> {
        let results = self
            .search_terms(query_terms, top_k)
            .map_err(|e| OracleError::Backend(e.to_string()))?;

        Ok(results
            .into_iter()
            .map(|(id, score)| OracleHit::new(id, score))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_index_creation() {
        let temp = TempDir::new().unwrap();
        let index = KeywordIndex::open(&temp.path().join("keywords")).unwrap();
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_upsert_and_search() {
        let temp = TempDir::new().unwrap();
        let index = KeywordIndex::open(&temp.path().join("keywords")).unwrap();

        index
            .upsert(1, "Mitochondria produce ATP through oxidative phosphorylation")
            .unwrap();
        index.upsert(2, "Chloroplasts capture light energy").unwrap();
        index.upsert(3, "ATP synthase is a rotary motor").unwrap();
        index.commit().unwrap();

        assert_eq!(index.len(), 3);

        let results = index.search_terms(&terms(&["atp"]), 10).unwrap();
        let ids: Vec<PassageId> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&1) && ids.contains(&3));

        let results = index.search_terms(&terms(&["chloroplasts"]), 10).unwrap();
        assert_eq!(results[0].0, 2);
    }

    #[test]
    fn test_upsert_replaces_document() {
        let temp = TempDir::new().unwrap();
        let index = KeywordIndex::open(&temp.path().join("keywords")).unwrap();

        index.upsert(1, "old wording about enzymes").unwrap();
        index.commit().unwrap();
        index.upsert(1, "new wording about proteins").unwrap();
        index.commit().unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.search_terms(&terms(&["enzymes"]), 10).unwrap().is_empty());
        assert_eq!(index.search_terms(&terms(&["proteins"]), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_empty_terms() {
        let temp = TempDir::new().unwrap();
        let index = KeywordIndex::open(&temp.path().join("keywords")).unwrap();
        assert!(index.search_terms(&[], 10).unwrap().is_empty());
        assert!(index.search_terms(&terms(&["  "]), 10).unwrap().is_empty());
    }

    #[test]
    fn test_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("keywords");

        {
            let index = KeywordIndex::open(&path).unwrap();
            index.upsert(7, "Osmosis moves water across membranes").unwrap();
            index.commit().unwrap();
        }

        let index = KeywordIndex::open(&path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.search_terms(&terms(&["osmosis"]), 10).unwrap()[0].0, 7);
    }

    #[test]
    fn test_delete() {
        let temp = TempDir::new().unwrap();
        let index = KeywordIndex::open(&temp.path().join("keywords")).unwrap();

        index.upsert(1, "Document one").unwrap();
        index.upsert(2, "Document two").unwrap();
        index.commit().unwrap();
        index.delete(1).unwrap();
        index.commit().unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.delete(-1).is_err());
    }

    #[tokio::test]
    async fn test_lexical_oracle() {
        let temp = TempDir::new().unwrap();
        let index = KeywordIndex::open(&temp.path().join("keywords")).unwrap();
        index.upsert(4, "Glycolysis splits glucose").unwrap();
        index.commit().unwrap();

        let oracle: &dyn LexicalOracle = &index;
        let hits = oracle.search(&terms(&["glucose"]), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage_id, 4);
        assert!(hits[0].raw_score > 0.0);
    }
}
