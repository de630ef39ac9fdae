//! Persistent storage for bandit arms and promoted genomes
//!
//! SQLite persistence so the policy's learning and the genome templates it
//! serves survive restarts.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use super::types::BanditArm;
use crate::error::{Error, Result};
use crate::evolution::Genome;

/// SQL to create the policy tables
pub const CREATE_POLICY_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bandit_arms (
    genome_id TEXT PRIMARY KEY NOT NULL,
    alpha REAL NOT NULL DEFAULT 1.0,
    beta REAL NOT NULL DEFAULT 1.0,
    pulls INTEGER NOT NULL DEFAULT 0,
    cumulative_reward REAL NOT NULL DEFAULT 0.0,
    discounted_pulls INTEGER NOT NULL DEFAULT 0,
    traffic_fraction REAL NOT NULL DEFAULT 1.0,
    promoted_at TEXT NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS genomes (
    genome_id TEXT PRIMARY KEY NOT NULL,
    generation INTEGER NOT NULL,
    scalar_fitness REAL,
    body TEXT NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS policy_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_genomes_fitness ON genomes(scalar_fitness);
"#;

const DEFAULT_GENOME_KEY: &str = "default_genome";

const UPSERT_ARM_SQL: &str = r#"
INSERT INTO bandit_arms (
    genome_id, alpha, beta, pulls, cumulative_reward, discounted_pulls,
    traffic_fraction, promoted_at, updated_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
ON CONFLICT(genome_id) DO UPDATE SET
    alpha = excluded.alpha,
    beta = excluded.beta,
    pulls = excluded.pulls,
    cumulative_reward = excluded.cumulative_reward,
    discounted_pulls = excluded.discounted_pulls,
    traffic_fraction = excluded.traffic_fraction,
    updated_at = CURRENT_TIMESTAMP
"#;

/// Aggregate view of persisted policy state
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStoreSummary {
    pub arm_count: u64,
    pub genome_count: u64,
    pub total_pulls: u64,
    pub total_discounted: u64,
    pub best_expected_value: Option<f64>,
    pub default_genome: Option<String>,
}

/// Store for persisting bandit and genome state
pub struct PolicyStore {
    pool: SqlitePool,
}

impl PolicyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to (and create if needed) the database file
    pub async fn connect(database_path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", database_path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(Error::DatabaseError)?;
        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_POLICY_TABLES_SQL)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        debug!("Policy tables initialized");
        Ok(())
    }

    /// Save or update one arm
    pub async fn save_arm(&self, arm: &BanditArm) -> Result<()> {
        bind_arm(sqlx::query(UPSERT_ARM_SQL), arm)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        debug!(genome = %arm.genome_id, pulls = arm.pulls, "Saved bandit arm");
        Ok(())
    }

    /// Replace the persisted arm table atomically
    ///
    /// Arms absent from `arms` (retired since the last save) are deleted.
    pub async fn save_all_arms(&self, arms: &[BanditArm]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;

        sqlx::query("DELETE FROM bandit_arms")
            .execute(&mut *tx)
            .await
            .map_err(Error::DatabaseError)?;

        for arm in arms {
            bind_arm(sqlx::query(UPSERT_ARM_SQL), arm)
                .execute(&mut *tx)
                .await
                .map_err(Error::DatabaseError)?;
        }

        tx.commit().await.map_err(Error::DatabaseError)?;

        info!(count = arms.len(), "Saved bandit arms");
        Ok(())
    }

    /// Load every arm, sorted by genome id
    pub async fn load_arms(&self) -> Result<Vec<BanditArm>> {
        let rows = sqlx::query(
            r#"
            SELECT genome_id, alpha, beta, pulls, cumulative_reward, discounted_pulls,
                   traffic_fraction, promoted_at
            FROM bandit_arms
            ORDER BY genome_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        let mut arms = Vec::with_capacity(rows.len());
        for row in rows {
            let promoted_at: String = row.get("promoted_at");
            let promoted_at = DateTime::parse_from_rfc3339(&promoted_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            arms.push(BanditArm {
                genome_id: row.get("genome_id"),
                alpha: row.get("alpha"),
                beta: row.get("beta"),
                pulls: row.get::<i64, _>("pulls") as u64,
                cumulative_reward: row.get("cumulative_reward"),
                discounted_pulls: row.get::<i64, _>("discounted_pulls") as u64,
                traffic_fraction: row.get("traffic_fraction"),
                promoted_at,
            });
        }

        debug!(count = arms.len(), "Loaded bandit arms");
        Ok(arms)
    }

    pub async fn delete_arm(&self, genome_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bandit_arms WHERE genome_id = ?")
            .bind(genome_id)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(genome = %genome_id, "Deleted bandit arm");
        }
        Ok(deleted)
    }

    /// Save or update a genome (template and fitness)
    pub async fn save_genome(&self, genome: &Genome) -> Result<()> {
        let body = serde_json::to_string(genome)?;
        sqlx::query(
            r#"
            INSERT INTO genomes (genome_id, generation, scalar_fitness, body, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(genome_id) DO UPDATE SET
                generation = excluded.generation,
                scalar_fitness = excluded.scalar_fitness,
                body = excluded.body,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&genome.genome_id)
        .bind(genome.generation as i64)
        .bind(genome.scalar_fitness)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        debug!(genome = %genome.genome_id, "Saved genome");
        Ok(())
    }

    /// Load every stored genome, best scalar fitness first
    pub async fn load_genomes(&self) -> Result<Vec<Genome>> {
        let rows = sqlx::query(
            "SELECT genome_id, body FROM genomes ORDER BY scalar_fitness DESC, genome_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        let mut genomes = Vec::with_capacity(rows.len());
        for row in rows {
            let body: String = row.get("body");
            match serde_json::from_str::<Genome>(&body) {
                Ok(genome) => genomes.push(genome),
                Err(e) => {
                    let id: String = row.get("genome_id");
                    warn!(genome = %id, error = %e, "Skipping unreadable genome");
                }
            }
        }
        Ok(genomes)
    }

    pub async fn delete_genome(&self, genome_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM genomes WHERE genome_id = ?")
            .bind(genome_id)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(genome = %genome_id, "Deleted genome");
        }
        Ok(deleted)
    }

    pub async fn load_genome(&self, genome_id: &str) -> Result<Genome> {
        let row = sqlx::query("SELECT body FROM genomes WHERE genome_id = ?")
            .bind(genome_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::DatabaseError)?
            .ok_or_else(|| Error::GenomeNotFound(genome_id.to_string()))?;

        let body: String = row.get("body");
        Ok(serde_json::from_str(&body)?)
    }

    /// Write or clear a metadata value
    pub async fn save_meta(&self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => {
                sqlx::query(
                    r#"
                    INSERT INTO policy_meta (key, value) VALUES (?, ?)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value
                    "#,
                )
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await
                .map_err(Error::DatabaseError)?;
            }
            None => {
                sqlx::query("DELETE FROM policy_meta WHERE key = ?")
                    .bind(key)
                    .execute(&self.pool)
                    .await
                    .map_err(Error::DatabaseError)?;
            }
        }
        Ok(())
    }

    pub async fn load_meta(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM policy_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;
        Ok(row.map(|r| r.get("value")))
    }

    /// Persist which genome is the default
    pub async fn save_default_genome(&self, genome_id: Option<&str>) -> Result<()> {
        self.save_meta(DEFAULT_GENOME_KEY, genome_id).await
    }

    pub async fn load_default_genome(&self) -> Result<Option<String>> {
        self.load_meta(DEFAULT_GENOME_KEY).await
    }

    /// Counts and best posterior mean across stored state
    pub async fn summary(&self) -> Result<PolicyStoreSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as arm_count,
                SUM(pulls) as total_pulls,
                SUM(discounted_pulls) as total_discounted,
                MAX(alpha / (alpha + beta)) as best_expected
            FROM bandit_arms
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        let genome_count: i64 = sqlx::query("SELECT COUNT(*) as n FROM genomes")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::DatabaseError)?
            .get("n");

        Ok(PolicyStoreSummary {
            arm_count: row.get::<i64, _>("arm_count") as u64,
            genome_count: genome_count as u64,
            total_pulls: row.get::<Option<i64>, _>("total_pulls").unwrap_or(0) as u64,
            total_discounted: row.get::<Option<i64>, _>("total_discounted").unwrap_or(0) as u64,
            best_expected_value: row.get::<Option<f64>, _>("best_expected"),
            default_genome: self.load_default_genome().await?,
        })
    }
}

fn bind_arm<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    arm: &'q BanditArm,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&arm.genome_id)
        .bind(arm.alpha)
        .bind(arm.beta)
        .bind(arm.pulls as i64)
        .bind(arm.cumulative_reward)
        .bind(arm.discounted_pulls as i64)
        .bind(arm.traffic_fraction)
        .bind(arm.promoted_at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::{Genome, PromptTemplate};
    use tempfile::TempDir;

    async fn create_test_store() -> (PolicyStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("policy.db");
        let store = PolicyStore::connect(&db_path).await.unwrap();
        store.init().await.unwrap();
        (store, temp_dir)
    }

    fn arm(id: &str, alpha: f64, beta: f64, pulls: u64) -> BanditArm {
        let mut arm = BanditArm::new(id, 1.0);
        arm.alpha = alpha;
        arm.beta = beta;
        arm.pulls = pulls;
        arm
    }

    #[tokio::test]
    async fn test_save_and_load_arm() {
        let (store, _dir) = create_test_store().await;
        store.save_arm(&arm("g1", 5.0, 2.0, 5)).await.unwrap();
        store.save_arm(&arm("g1", 6.0, 2.0, 6)).await.unwrap();

        let arms = store.load_arms().await.unwrap();
        assert_eq!(arms.len(), 1);
        assert_eq!(arms[0].alpha, 6.0);
        assert_eq!(arms[0].pulls, 6);
    }

    #[tokio::test]
    async fn test_save_all_replaces_retired_arms() {
        let (store, _dir) = create_test_store().await;
        store
            .save_all_arms(&[arm("a", 1.0, 1.0, 0), arm("b", 1.0, 1.0, 0)])
            .await
            .unwrap();
        store.save_all_arms(&[arm("b", 3.0, 1.0, 2)]).await.unwrap();

        let arms = store.load_arms().await.unwrap();
        assert_eq!(arms.len(), 1);
        assert_eq!(arms[0].genome_id, "b");
    }

    #[tokio::test]
    async fn test_delete_arm() {
        let (store, _dir) = create_test_store().await;
        store.save_arm(&arm("a", 1.0, 1.0, 0)).await.unwrap();
        assert!(store.delete_arm("a").await.unwrap());
        assert!(!store.delete_arm("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_genome() {
        let (store, _dir) = create_test_store().await;
        let genome = Genome::seed(PromptTemplate::default());
        store.save_genome(&genome).await.unwrap();

        assert!(store.delete_genome(&genome.genome_id).await.unwrap());
        assert!(!store.delete_genome(&genome.genome_id).await.unwrap());
        assert!(store.load_genomes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_genome_roundtrip_and_default() {
        let (store, _dir) = create_test_store().await;
        let mut genome = Genome::seed(PromptTemplate::default());
        genome.scalar_fitness = Some(0.7);
        store.save_genome(&genome).await.unwrap();
        store
            .save_default_genome(Some(&genome.genome_id))
            .await
            .unwrap();

        let loaded = store.load_genome(&genome.genome_id).await.unwrap();
        assert_eq!(loaded, genome);
        assert_eq!(store.load_genomes().await.unwrap().len(), 1);
        assert_eq!(
            store.load_default_genome().await.unwrap(),
            Some(genome.genome_id.clone())
        );
        assert!(matches!(
            store.load_genome("missing").await,
            Err(Error::GenomeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_summary() {
        let (store, _dir) = create_test_store().await;
        let empty = store.summary().await.unwrap();
        assert_eq!(empty.arm_count, 0);
        assert_eq!(empty.total_pulls, 0);
        assert!(empty.best_expected_value.is_none());

        store
            .save_all_arms(&[arm("a", 3.0, 1.0, 2), arm("b", 1.0, 3.0, 2)])
            .await
            .unwrap();
        let summary = store.summary().await.unwrap();
        assert_eq!(summary.arm_count, 2);
        assert_eq!(summary.total_pulls, 4);
        assert_eq!(summary.best_expected_value, Some(0.75));
    }

    #[tokio::test]
    async fn test_meta_set_and_clear() {
        let (store, _dir) = create_test_store().await;
        assert!(store.load_meta("generation").await.unwrap().is_none());
        store.save_meta("generation", Some("4")).await.unwrap();
        store.save_meta("generation", Some("5")).await.unwrap();
        assert_eq!(store.load_meta("generation").await.unwrap().as_deref(), Some("5"));
        store.save_meta("generation", None).await.unwrap();
        assert!(store.load_meta("generation").await.unwrap().is_none());
    }
}
