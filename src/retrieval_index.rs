//! Hybrid retrieval over previously successful question/SQL pairs.
//!
//! Each remembered pair is scored against a new question with two signals:
//! a hashed bag-of-words vector (cosine) and a table graph built from the
//! tables the stored SQL touches, blended 0.7 / 0.3 whenever the question
//! names a known table. The index is an explicitly owned client
//! with an `open`/`close` lifecycle; the composition root decides where its
//! snapshot lives and hands it to the supervisor as the retrieval port.

use crate::error::{CopilotError, Result};
use crate::orchestrator_service::ports::{
    PortFuture, RetrievalCandidate, RetrievalPort, RetrievalScope,
};
use crate::query_cache::normalize_question;
use crate::stage_executors::text::{identifier_words, normalize_sql, singularize, tokenize};
use crate::types::ConnectionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const VECTOR_DIMENSIONS: usize = 256;
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;
pub const MAX_ENTRIES: usize = 5_000;

const VECTOR_WEIGHT: f64 = 0.7;
const GRAPH_WEIGHT: f64 = 0.3;
const NEIGHBOR_CREDIT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexedQuery {
    connection_id: ConnectionId,
    question: String,
    sql: String,
    tables: Vec<String>,
    remembered_at: DateTime<Utc>,
    #[serde(default)]
    failed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    format_version: u32,
    entries: Vec<IndexedQuery>,
}

pub struct RetrievalIndex {
    snapshot_path: Option<PathBuf>,
    entries: RwLock<Vec<IndexedQuery>>,
}

impl RetrievalIndex {
    /// In-memory index that is never persisted.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            snapshot_path: None,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Loads the snapshot at `path` when it exists. A missing file starts an
    /// empty index that `close` will create.
    ///
    /// # Errors
    /// Returns `IoError` when the file cannot be read and
    /// `SerializationError` when it is not a snapshot.
    pub async fn open(path: Option<PathBuf>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::ephemeral());
        };
        let entries = if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read(&path).await?;
            let snapshot: Snapshot = serde_json::from_slice(&raw)?;
            if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
                return Err(CopilotError::ConfigError(format!(
                    "retrieval snapshot {} has unsupported format version {}",
                    path.display(),
                    snapshot.format_version
                )));
            }
            snapshot.entries
        } else {
            Vec::new()
        };
        info!(path = %path.display(), entries = entries.len(), "retrieval index opened");
        Ok(Self {
            snapshot_path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    /// Writes the snapshot, if the index has one.
    ///
    /// # Errors
    /// Returns `IoError` or `SerializationError` when the snapshot cannot be written.
    pub async fn close(&self) -> Result<()> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(());
        };
        let entries = self.entries.read().await.clone();
        let count = entries.len();
        write_snapshot(path, &Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            entries,
        })
        .await?;
        info!(path = %path.display(), entries = count, "retrieval index closed");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn insert(&self, connection_id: &ConnectionId, question: &str, sql: &str) {
        let question = normalize_question(question);
        let tables = referenced_tables(sql);
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries
            .iter_mut()
            .find(|entry| entry.connection_id == *connection_id && entry.question == question)
        {
            existing.sql = sql.to_string();
            existing.tables = tables;
            existing.remembered_at = Utc::now();
            existing.failed = false;
            return;
        }
        entries.push(IndexedQuery {
            connection_id: connection_id.clone(),
            question,
            sql: sql.to_string(),
            tables,
            remembered_at: Utc::now(),
            failed: false,
        });
        if entries.len() > MAX_ENTRIES {
            entries.sort_by_key(|entry| std::cmp::Reverse(entry.remembered_at));
            entries.truncate(MAX_ENTRIES);
        }
    }

    /// Flags every entry on the connection whose SQL normalizes to `sql`.
    /// Flagged entries stay in the snapshot but are never returned again.
    async fn flag_failed(&self, connection_id: &ConnectionId, sql: &str) -> usize {
        let normalized = normalize_sql(sql);
        let mut entries = self.entries.write().await;
        let mut marked = 0;
        for entry in entries.iter_mut().filter(|entry| {
            entry.connection_id == *connection_id && normalize_sql(&entry.sql) == normalized
        }) {
            entry.failed = true;
            marked += 1;
        }
        debug!(connection_id = %connection_id, marked, "retrieval entries marked failed");
        marked
    }

    async fn search(&self, query_text: &str, scope: &RetrievalScope) -> Vec<RetrievalCandidate> {
        let entries = self.entries.read().await;
        let scoped: Vec<&IndexedQuery> = entries
            .iter()
            .filter(|entry| entry.connection_id == scope.connection_id && !entry.failed)
            .collect();
        if scoped.is_empty() || scope.limit == 0 {
            return Vec::new();
        }

        let graph = TableGraph::build(&scoped);
        let query_terms = terms(query_text);
        let query_vector = hashed_vector(&query_terms);
        let query_tables = graph.tables_mentioned(&query_terms);

        let mut candidates: Vec<RetrievalCandidate> = scoped
            .iter()
            .map(|entry| {
                let vector_score = cosine(&query_vector, &hashed_vector(&terms(&entry.question)));
                let graph_score = graph.score(&entry.tables, &query_tables);
                // No table named in the question leaves the vector signal alone.
                let score = if query_tables.is_empty() {
                    vector_score
                } else {
                    VECTOR_WEIGHT.mul_add(vector_score, GRAPH_WEIGHT * graph_score)
                };
                RetrievalCandidate {
                    question: entry.question.clone(),
                    sql: entry.sql.clone(),
                    tables: entry.tables.clone(),
                    vector_score,
                    graph_score,
                    score,
                }
            })
            .filter(|candidate| candidate.score > 0.0)
            .collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(scope.limit);
        debug!(
            connection_id = %scope.connection_id,
            candidates = candidates.len(),
            top_score = candidates.first().map_or(0.0, |candidate| candidate.score),
            "retrieval search finished"
        );
        candidates
    }
}

impl RetrievalPort for RetrievalIndex {
    fn find_similar<'a>(
        &'a self,
        query_text: &'a str,
        scope: &'a RetrievalScope,
    ) -> PortFuture<'a, Vec<RetrievalCandidate>> {
        Box::pin(async move { Ok(self.search(query_text, scope).await) })
    }

    fn remember<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        question: &'a str,
        sql: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.insert(connection_id, question, sql).await;
            Ok(())
        })
    }

    fn mark_failed<'a>(
        &'a self,
        connection_id: &'a ConnectionId,
        sql: &'a str,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            self.flag_failed(connection_id, sql).await;
            Ok(())
        })
    }
}

async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = path.with_extension("tmp");
    tokio::fs::write(&staging, serde_json::to_vec_pretty(snapshot)?).await?;
    tokio::fs::rename(&staging, path).await?;
    Ok(())
}

fn terms(text: &str) -> Vec<String> {
    tokenize(text).iter().map(|word| singularize(word)).collect()
}

fn bucket(term: &str) -> usize {
    let digest = Sha256::digest(term.as_bytes());
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let slot = u64::from_le_bytes(prefix) % VECTOR_DIMENSIONS as u64;
    usize::try_from(slot).unwrap_or_default()
}

fn hashed_vector(terms: &[String]) -> Vec<f64> {
    let mut vector = vec![0.0; VECTOR_DIMENSIONS];
    for term in terms {
        vector[bucket(term)] += 1.0;
    }
    vector
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Table names following `FROM` or `JOIN`, lowercased, schema prefix and
/// quoting removed.
#[must_use]
pub fn referenced_tables(sql: &str) -> Vec<String> {
    let words: Vec<&str> = sql
        .split(|c: char| c.is_whitespace() || c == ',' || c == '(' || c == ')' || c == ';')
        .filter(|word| !word.is_empty())
        .collect();
    let tables: BTreeSet<String> = words
        .windows(2)
        .filter(|pair| {
            pair[0].eq_ignore_ascii_case("from") || pair[0].eq_ignore_ascii_case("join")
        })
        .filter_map(|pair| {
            let name = pair[1]
                .rsplit('.')
                .next()?
                .trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
                .to_lowercase();
            (!name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_'))
                .then_some(name)
        })
        .filter(|name| name != "select")
        .collect();
    tables.into_iter().collect()
}

/// Tables as nodes, co-occurrence in one stored statement as edges.
struct TableGraph {
    neighbors: HashMap<String, BTreeSet<String>>,
}

impl TableGraph {
    fn build(entries: &[&IndexedQuery]) -> Self {
        let mut neighbors: HashMap<String, BTreeSet<String>> = HashMap::new();
        for entry in entries {
            for table in &entry.tables {
                let linked = neighbors.entry(table.clone()).or_default();
                linked.extend(entry.tables.iter().filter(|other| *other != table).cloned());
            }
        }
        Self { neighbors }
    }

    fn tables_mentioned(&self, query_terms: &[String]) -> BTreeSet<String> {
        self.neighbors
            .keys()
            .filter(|table| {
                identifier_words(table)
                    .iter()
                    .map(|word| singularize(word))
                    .any(|word| query_terms.contains(&word))
            })
            .cloned()
            .collect()
    }

    /// Jaccard overlap with the mentioned tables; a candidate table one hop
    /// away from a mentioned table earns partial credit.
    fn score(&self, candidate_tables: &[String], mentioned: &BTreeSet<String>) -> f64 {
        if mentioned.is_empty() || candidate_tables.is_empty() {
            return 0.0;
        }
        let candidate: BTreeSet<&String> = candidate_tables.iter().collect();
        let direct = candidate.iter().filter(|table| mentioned.contains(**table)).count();
        let adjacent = candidate
            .iter()
            .filter(|table| !mentioned.contains(**table))
            .filter(|table| {
                mentioned.iter().any(|seed| {
                    self.neighbors
                        .get(seed)
                        .is_some_and(|linked| linked.contains(**table))
                })
            })
            .count();
        let union = candidate.len() + mentioned.iter().filter(|t| !candidate.contains(t)).count();
        #[allow(clippy::cast_precision_loss)]
        let score = NEIGHBOR_CREDIT.mul_add(adjacent as f64, direct as f64) / union as f64;
        score.min(1.0)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::{referenced_tables, RetrievalIndex};
    use crate::orchestrator_service::ports::{RetrievalPort, RetrievalScope};
    use crate::types::ConnectionId;

    fn shop() -> ConnectionId {
        ConnectionId::new("shop")
    }

    fn scope(limit: usize) -> RetrievalScope {
        RetrievalScope {
            connection_id: shop(),
            limit,
        }
    }

    async fn given_index_with_history() -> RetrievalIndex {
        let index = RetrievalIndex::ephemeral();
        index
            .remember(
                &shop(),
                "total sales by month",
                "SELECT date_trunc('month', order_date), SUM(amount) FROM orders GROUP BY 1",
            )
            .await
            .unwrap();
        index
            .remember(
                &shop(),
                "customers per region",
                "SELECT region, COUNT(*) FROM customers GROUP BY region",
            )
            .await
            .unwrap();
        index
    }

    #[test]
    fn referenced_tables_reads_from_and_join_targets() {
        let tables = referenced_tables(
            "SELECT c.name FROM public.\"customers\" c JOIN orders o ON o.customer_id = c.id",
        );
        assert_eq!(tables, vec!["customers".to_string(), "orders".to_string()]);
    }

    #[test]
    fn referenced_tables_ignores_subquery_keywords() {
        let tables = referenced_tables("SELECT * FROM (SELECT id FROM orders) t");
        assert_eq!(tables, vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn identical_question_scores_highest() {
        let index = given_index_with_history().await;

        let found = index
            .find_similar("Total sales by month?", &scope(5))
            .await
            .unwrap();

        assert_eq!(found[0].question, "total sales by month");
        assert!(found[0].score > 0.9);
        assert!(found.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn graph_signal_favours_mentioned_tables() {
        let index = given_index_with_history().await;

        let found = index
            .find_similar("which customers are new", &scope(5))
            .await
            .unwrap();

        assert_eq!(found[0].tables, vec!["customers".to_string()]);
        assert!(found[0].graph_score > 0.0);
    }

    #[tokio::test]
    async fn search_is_scoped_to_connection_and_limited() {
        let index = given_index_with_history().await;
        let other = RetrievalScope {
            connection_id: ConnectionId::new("warehouse"),
            limit: 5,
        };

        assert!(index
            .find_similar("total sales by month", &other)
            .await
            .unwrap()
            .is_empty());
        assert!(
            index
                .find_similar("total sales by month", &scope(1))
                .await
                .unwrap()
                .len()
                <= 1
        );
    }

    #[tokio::test]
    async fn remembering_same_question_replaces_sql() {
        let index = given_index_with_history().await;
        index
            .remember(&shop(), "Total sales by month", "SELECT 1 FROM orders")
            .await
            .unwrap();

        assert_eq!(index.len().await, 2);
        let found = index
            .find_similar("total sales by month", &scope(1))
            .await
            .unwrap();
        assert_eq!(found[0].sql, "SELECT 1 FROM orders");
    }

    #[tokio::test]
    async fn failed_sql_is_no_longer_suggested_until_relearned() {
        let index = given_index_with_history().await;
        index
            .mark_failed(
                &shop(),
                "select date_trunc('month', order_date), sum(amount)  from orders group by 1",
            )
            .await
            .unwrap();

        let found = index
            .find_similar("total sales by month", &scope(5))
            .await
            .unwrap();
        assert!(found.iter().all(|candidate| candidate.question != "total sales by month"));
        assert_eq!(index.len().await, 2);

        index
            .remember(&shop(), "total sales by month", "SELECT SUM(amount) FROM orders")
            .await
            .unwrap();
        let found = index
            .find_similar("total sales by month", &scope(1))
            .await
            .unwrap();
        assert_eq!(found[0].sql, "SELECT SUM(amount) FROM orders");
    }

    #[tokio::test]
    async fn snapshot_survives_close_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retrieval").join("index.json");

        let index = RetrievalIndex::open(Some(path.clone())).await.unwrap();
        index
            .remember(&shop(), "orders today", "SELECT COUNT(*) FROM orders")
            .await
            .unwrap();
        index.close().await.unwrap();

        let reopened = RetrievalIndex::open(Some(path)).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        let found = reopened
            .find_similar("orders today", &scope(3))
            .await
            .unwrap();
        assert_eq!(found[0].sql, "SELECT COUNT(*) FROM orders");
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(RetrievalIndex::open(Some(path)).await.is_err());
    }
}
