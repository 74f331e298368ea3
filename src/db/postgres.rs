use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info};
use uuid::Uuid;

use super::{CollectionStats, IndexPoint, SearchResult, VectorStore};
use crate::config::{AdbCfg, HoloCfg, VectorStoreKind};
use crate::error::{Result, ServiceError};

/// Postgres 兼容的向量库方言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    AnalyticDb,
    Hologres,
}

/// 连接参数
#[derive(Debug, Clone)]
pub struct PgParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub table: String,
    pub pre_delete: bool,
}

impl From<&AdbCfg> for PgParams {
    fn from(cfg: &AdbCfg) -> Self {
        Self {
            host: cfg.pg_host.clone(),
            port: cfg.pg_port,
            database: cfg.pg_database.clone(),
            user: cfg.pg_user.clone(),
            password: cfg.pg_password.clone(),
            table: cfg.collection_name.clone(),
            pre_delete: cfg.pre_delete,
        }
    }
}

impl From<&HoloCfg> for PgParams {
    fn from(cfg: &HoloCfg) -> Self {
        Self {
            host: cfg.pg_host.clone(),
            port: cfg.pg_port,
            database: cfg.pg_database.clone(),
            user: cfg.pg_user.clone(),
            password: cfg.pg_password.clone(),
            table: cfg.collection_name.clone(),
            pre_delete: false,
        }
    }
}

/// AnalyticDB / Hologres 后端
pub struct PgStore {
    pool: PgPool,
    table: String,
    dialect: Dialect,
    dimension: usize,
}

impl PgStore {
    pub async fn connect(params: &PgParams, dialect: Dialect, dimension: usize) -> Result<Self> {
        let table = table_name(&params.table)?;

        let options = PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .database(&params.database)
            .username(&params.user)
            .password(&params.password);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        info!(host = %params.host, table = %table, ?dialect, "connected to postgres vector store");

        let store = Self {
            pool,
            table,
            dialect,
            dimension,
        };
        store.init_table(params.pre_delete).await?;
        Ok(store)
    }

    async fn init_table(&self, pre_delete: bool) -> Result<()> {
        if pre_delete {
            info!(table = %self.table, "dropping existing table");
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", self.table))
                .execute(&self.pool)
                .await?;
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(&self.table)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            debug!(table = %self.table, "table already exists");
            return Ok(());
        }

        // Hologres 要求 set_table_property 与建表处于同一事务
        let mut tx = self.pool.begin().await?;
        for statement in create_statements(self.dialect, &self.table, self.dimension) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!(table = %self.table, "created vector table");
        Ok(())
    }
}

/// 建表 (及向量索引) 语句
fn create_statements(dialect: Dialect, table: &str, dimension: usize) -> Vec<String> {
    match dialect {
        Dialect::AnalyticDb => vec![
            format!(
                "CREATE TABLE {} (id TEXT PRIMARY KEY, source TEXT NOT NULL, content TEXT NOT NULL, embedding REAL[] NOT NULL)",
                table
            ),
            format!(
                "CREATE INDEX {}_embedding_idx ON {} USING ann(embedding) WITH (dim = {})",
                table, table, dimension
            ),
        ],
        Dialect::Hologres => vec![
            format!(
                "CREATE TABLE {} (id TEXT PRIMARY KEY, source TEXT NOT NULL, content TEXT NOT NULL, embedding FLOAT4[] NOT NULL CHECK (array_ndims(embedding) = 1 AND array_length(embedding, 1) = {}))",
                table, dimension
            ),
            format!(
                r#"CALL set_table_property('{}', 'proxima_vectors', '{{"embedding":{{"algorithm":"Graph","distance_method":"SquaredEuclidean"}}}}')"#,
                table
            ),
        ],
    }
}

/// 相似度查询语句，`$1` 为查询向量，`$2` 为条数
fn search_statement(dialect: Dialect, table: &str) -> String {
    match dialect {
        Dialect::AnalyticDb => format!(
            "SELECT source, content, l2_distance(embedding, $1::real[])::float8 AS distance FROM {} ORDER BY embedding <-> $1::real[] LIMIT $2",
            table
        ),
        Dialect::Hologres => format!(
            "SELECT source, content, pm_approx_squared_euclidean_distance(embedding, $1::float4[])::float8 AS distance FROM {} ORDER BY distance ASC LIMIT $2",
            table
        ),
    }
}

/// 距离转为越大越相似的分数
fn distance_to_score(distance: f64) -> f32 {
    (1.0 / (1.0 + distance.max(0.0))) as f32
}

/// 未加引号的标识符会被 Postgres 折叠为小写，
/// 存在性检查与后续语句都使用折叠后的表名
fn table_name(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(name.to_ascii_lowercase())
}

/// 表名会被拼接进 SQL，只允许普通标识符
fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && name.len() <= 63 {
        Ok(())
    } else {
        Err(ServiceError::Config(format!(
            "invalid collection name: {:?}",
            name
        )))
    }
}

#[async_trait]
impl VectorStore for PgStore {
    fn kind(&self) -> VectorStoreKind {
        match self.dialect {
            Dialect::AnalyticDb => VectorStoreKind::AnalyticDb,
            Dialect::Hologres => VectorStoreKind::Hologres,
        }
    }

    async fn add_documents(&self, points: Vec<IndexPoint>) -> Result<usize> {
        let count = points.len();
        let insert = format!(
            "INSERT INTO {} (id, source, content, embedding) VALUES ($1, $2, $3, $4)",
            self.table
        );

        let mut tx = self.pool.begin().await?;
        for point in points {
            if point.embedding.len() != self.dimension {
                return Err(ServiceError::DimensionMismatch {
                    expected: self.dimension,
                    actual: point.embedding.len(),
                });
            }
            sqlx::query(&insert)
                .bind(Uuid::new_v4().to_string())
                .bind(point.source)
                .bind(point.content)
                .bind(point.embedding)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(table = %self.table, count, "inserted vectors");
        Ok(count)
    }

    async fn similarity_search(&self, query_vector: Vec<f32>, k: usize) -> Result<Vec<SearchResult>> {
        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        let rows: Vec<(String, String, f64)> =
            sqlx::query_as(&search_statement(self.dialect, &self.table))
                .bind(query_vector)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(source, content, distance)| SearchResult {
                source,
                content,
                score: distance_to_score(distance),
            })
            .collect())
    }

    async fn stats(&self) -> Result<CollectionStats> {
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;

        Ok(CollectionStats {
            total_points: u64::try_from(total).unwrap_or(0),
            collection_name: self.table.clone(),
        })
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("langchain_document").is_ok());
        assert!(validate_identifier("_kb2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2kb").is_err());
        assert!(validate_identifier("kb; DROP TABLE users").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_table_name_is_folded_to_lowercase() {
        assert_eq!(table_name("KnowledgeBase").unwrap(), "knowledgebase");
        assert_eq!(table_name("langchain_document").unwrap(), "langchain_document");
        assert!(table_name("Knowledge-Base").is_err());
    }

    #[test]
    fn test_create_statements() {
        let adb = create_statements(Dialect::AnalyticDb, "kb", 768);
        assert_eq!(adb.len(), 2);
        assert!(adb[0].starts_with("CREATE TABLE kb"));
        assert!(adb[1].contains("USING ann(embedding) WITH (dim = 768)"));

        let holo = create_statements(Dialect::Hologres, "kb", 384);
        assert!(holo[0].contains("array_length(embedding, 1) = 384"));
        assert_eq!(
            holo[1],
            r#"CALL set_table_property('kb', 'proxima_vectors', '{"embedding":{"algorithm":"Graph","distance_method":"SquaredEuclidean"}}')"#
        );
    }

    #[test]
    fn test_search_statement() {
        assert!(search_statement(Dialect::AnalyticDb, "kb").contains("l2_distance"));
        assert!(search_statement(Dialect::Hologres, "kb")
            .contains("pm_approx_squared_euclidean_distance"));
    }

    #[test]
    fn test_distance_to_score() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert!(distance_to_score(1.0) > distance_to_score(2.0));
        assert_eq!(distance_to_score(-1.0), 1.0);
    }

    #[test]
    fn test_params_from_config() {
        let holo = HoloCfg {
            pg_host: "h".to_string(),
            pg_port: 80,
            pg_database: "d".to_string(),
            pg_user: "u".to_string(),
            pg_password: "p".to_string(),
            collection_name: "kb".to_string(),
        };
        let params = PgParams::from(&holo);
        assert_eq!(params.port, 80);
        assert!(!params.pre_delete);
    }

    // 需要可用的 AnalyticDB 实例: PG_HOST / PG_USER / PG_PASSWORD
    #[tokio::test]
    #[ignore]
    async fn test_live_analyticdb_roundtrip() {
        let params = PgParams {
            host: std::env::var("PG_HOST").unwrap(),
            port: 5432,
            database: "postgres".to_string(),
            user: std::env::var("PG_USER").unwrap(),
            password: std::env::var("PG_PASSWORD").unwrap(),
            table: "RagChatTest".to_string(),
            pre_delete: true,
        };
        PgStore::connect(&params, Dialect::AnalyticDb, 2).await.unwrap();

        // 再次连接时应识别出已存在的 (小写) 表
        let params = PgParams {
            pre_delete: false,
            ..params
        };
        let store = PgStore::connect(&params, Dialect::AnalyticDb, 2).await.unwrap();
        assert_eq!(store.stats().await.unwrap().collection_name, "ragchattest");

        store
            .add_documents(vec![IndexPoint {
                source: "a.txt".to_string(),
                content: "hello".to_string(),
                embedding: vec![1.0, 0.0],
            }])
            .await
            .unwrap();

        let results = store.similarity_search(vec![1.0, 0.0], 1).await.unwrap();
        assert_eq!(results[0].content, "hello");
    }
}
