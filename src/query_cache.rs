use crate::stage_executors::text::{literal_tokens, normalize_sql};
use crate::types::ConnectionId;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq)]
struct CacheEntry {
    connection_id: ConnectionId,
    question: String,
    sql: String,
    embedding: Option<Vec<f32>>,
    success: bool,
    usage_count: u64,
    last_used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Exact,
    Semantic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub sql: String,
    pub question: String,
    pub similarity: f64,
    pub tier: CacheTier,
    pub usage_count: u64,
}

/// Lowercased question with punctuation trimmed and whitespace collapsed.
#[must_use]
pub fn normalize_question(question: &str) -> String {
    question
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['?', '!', '.', ' '])
        .to_string()
}

#[must_use]
pub fn cache_key(connection_id: &ConnectionId, question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(connection_id.value().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_question(question).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn cosine(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0_f64, 0.0_f64, 0.0_f64), |acc, (x, y)| {
        let (x, y) = (f64::from(*x), f64::from(*y));
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });
    (norm_a > 0.0 && norm_b > 0.0).then(|| dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Exact and semantic tiers over previously successful question/SQL pairs.
/// Failed entries stay recorded but are never served.
pub struct QueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    capacity: usize,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl QueryCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn lookup_exact(
        &self,
        connection_id: &ConnectionId,
        question: &str,
    ) -> Option<CacheHit> {
        let key = cache_key(connection_id, question);
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&key).filter(|entry| entry.success)?;
        entry.usage_count += 1;
        entry.last_used_at = Utc::now();
        debug!(connection_id = %connection_id, usage_count = entry.usage_count, "exact cache hit");
        Some(CacheHit {
            sql: entry.sql.clone(),
            question: entry.question.clone(),
            similarity: 1.0,
            tier: CacheTier::Exact,
            usage_count: entry.usage_count,
        })
    }

    /// Best successful entry for the connection at or above `threshold`.
    /// Embeddings are compared by cosine when both sides have one; otherwise
    /// the normalized texts are compared with Sørensen-Dice. Entries whose
    /// literals (years, counts, month names) differ from the question's are
    /// never served, however similar the wording.
    pub async fn lookup_semantic(
        &self,
        connection_id: &ConnectionId,
        question: &str,
        embedding: Option<&[f32]>,
        threshold: f64,
    ) -> Option<CacheHit> {
        let normalized = normalize_question(question);
        let literals = literal_tokens(&normalized);
        let mut entries = self.entries.write().await;
        let (key, similarity) = entries
            .iter()
            .filter(|(_, entry)| entry.success && entry.connection_id == *connection_id)
            .filter(|(_, entry)| literal_tokens(&entry.question) == literals)
            .filter_map(|(key, entry)| {
                let similarity = match (embedding, entry.embedding.as_deref()) {
                    (Some(query), Some(stored)) => cosine(query, stored)?,
                    _ => strsim::sorensen_dice(&normalized, &entry.question),
                };
                (similarity >= threshold).then(|| (key.clone(), similarity))
            })
            .max_by(|(_, a), (_, b)| a.total_cmp(b))?;

        let entry = entries.get_mut(&key)?;
        entry.usage_count += 1;
        entry.last_used_at = Utc::now();
        debug!(connection_id = %connection_id, similarity, "semantic cache hit");
        Some(CacheHit {
            sql: entry.sql.clone(),
            question: entry.question.clone(),
            similarity,
            tier: CacheTier::Semantic,
            usage_count: entry.usage_count,
        })
    }

    /// Stores or refreshes a successful pair.
    pub async fn record_success(
        &self,
        connection_id: &ConnectionId,
        question: &str,
        sql: &str,
        embedding: Option<Vec<f32>>,
    ) {
        let key = cache_key(connection_id, question);
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        entries
            .entry(key)
            .and_modify(|entry| {
                entry.sql = sql.to_string();
                entry.success = true;
                entry.last_used_at = now;
                if embedding.is_some() {
                    entry.embedding.clone_from(&embedding);
                }
            })
            .or_insert_with(|| CacheEntry {
                connection_id: connection_id.clone(),
                question: normalize_question(question),
                sql: sql.to_string(),
                embedding: embedding.clone(),
                success: true,
                usage_count: 0,
                last_used_at: now,
            });

        while entries.len() > self.capacity {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&oldest);
        }
    }

    /// Marks every entry on the connection that produced `sql` as failed.
    pub async fn record_failure(&self, connection_id: &ConnectionId, sql: &str) -> usize {
        let normalized = normalize_sql(sql);
        let mut entries = self.entries.write().await;
        let mut marked = 0;
        for entry in entries.values_mut().filter(|entry| {
            entry.connection_id == *connection_id && normalize_sql(&entry.sql) == normalized
        }) {
            entry.success = false;
            marked += 1;
        }
        debug!(connection_id = %connection_id, marked, "cache entries marked failed");
        marked
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::{cache_key, CacheTier, QueryCache};
    use crate::types::ConnectionId;

    fn shop() -> ConnectionId {
        ConnectionId::new("shop")
    }

    #[tokio::test]
    async fn cache_miss_when_no_entry() {
        let cache = QueryCache::default();
        assert!(cache.lookup_exact(&shop(), "total sales").await.is_none());
    }

    #[tokio::test]
    async fn exact_hit_ignores_case_and_punctuation() {
        let cache = QueryCache::default();
        cache
            .record_success(&shop(), "Total sales?", "SELECT SUM(amount) FROM orders", None)
            .await;

        let hit = cache.lookup_exact(&shop(), "total   SALES").await.unwrap();

        assert_eq!(hit.tier, CacheTier::Exact);
        assert_eq!(hit.usage_count, 1);
        assert!(cache
            .lookup_exact(&ConnectionId::new("other"), "total sales")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn failed_entries_are_never_served() {
        let cache = QueryCache::default();
        cache
            .record_success(&shop(), "total sales", "SELECT SUM(amount) FROM orders", None)
            .await;

        assert_eq!(
            cache
                .record_failure(&shop(), "select sum(amount) from orders;")
                .await,
            1
        );
        assert!(cache.lookup_exact(&shop(), "total sales").await.is_none());
        assert!(cache
            .lookup_semantic(&shop(), "total sales", None, 0.5)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn different_year_is_never_a_semantic_hit() {
        let cache = QueryCache::default();
        cache
            .record_success(
                &shop(),
                "show total sales by month for 2024",
                "SELECT SUM(amount) FROM orders WHERE date >= '2024-01-01'",
                Some(vec![1.0, 0.0, 0.0]),
            )
            .await;

        let other_year = cache
            .lookup_semantic(&shop(), "show total sales by month for 2023", None, 0.5)
            .await;
        let same_vector = cache
            .lookup_semantic(
                &shop(),
                "show total sales by month for 2023",
                Some(&[1.0, 0.0, 0.0]),
                0.5,
            )
            .await;
        let top_ten = cache
            .lookup_semantic(&shop(), "show total sales by month for 2024, top 10", None, 0.5)
            .await;

        assert!(other_year.is_none());
        assert!(same_vector.is_none());
        assert!(top_ten.is_none());
    }

    #[tokio::test]
    async fn semantic_tier_uses_embeddings_when_available() {
        let cache = QueryCache::default();
        cache
            .record_success(
                &shop(),
                "revenue per month",
                "SELECT 1",
                Some(vec![1.0, 0.0, 0.2]),
            )
            .await;

        let near = cache
            .lookup_semantic(&shop(), "monthly income", Some(&[0.9, 0.0, 0.25]), 0.92)
            .await;
        let far = cache
            .lookup_semantic(&shop(), "monthly income", Some(&[0.0, 1.0, 0.0]), 0.92)
            .await;

        assert_eq!(near.unwrap().tier, CacheTier::Semantic);
        assert!(far.is_none());
    }

    #[tokio::test]
    async fn semantic_tier_falls_back_to_text_similarity() {
        let cache = QueryCache::default();
        cache
            .record_success(&shop(), "total sales by month for 2024", "SELECT 1", None)
            .await;

        let hit = cache
            .lookup_semantic(&shop(), "total sales by month in 2024", None, 0.8)
            .await;

        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let cache = QueryCache::new(2);
        cache.record_success(&shop(), "a", "SELECT 1", None).await;
        cache.record_success(&shop(), "b", "SELECT 2", None).await;
        assert!(cache.lookup_exact(&shop(), "a").await.is_some());
        cache.record_success(&shop(), "c", "SELECT 3", None).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.lookup_exact(&shop(), "b").await.is_none());
        assert_ne!(cache_key(&shop(), "a"), cache_key(&shop(), "b"));
    }
}
