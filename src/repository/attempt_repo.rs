//! 登录尝试数据访问（滚动窗口计数）
//!
//! 尝试键是 sha256(ip) 或 sha256(邮箱小写)，原始值不落库。

use crate::error::AppError;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

pub struct AttemptRepository {
    db: PgPool,
}

impl AttemptRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 哈希尝试键（ip 或邮箱）
    pub fn hash_key(raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.trim().to_lowercase().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// 记录一次尝试
    pub async fn record(
        &self,
        attempt_key: &str,
        endpoint: &str,
        realm: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts (attempt_key, endpoint, realm, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(attempt_key)
        .bind(endpoint)
        .bind(realm)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 统计窗口内的尝试次数
    pub async fn count_recent(
        &self,
        attempt_key: &str,
        endpoint: &str,
        realm: &str,
        window_secs: i64,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM login_attempts
            WHERE attempt_key = $1
                AND endpoint = $2
                AND realm = $3
                AND created_at > NOW() - INTERVAL '1 second' * $4
            "#,
        )
        .bind(attempt_key)
        .bind(endpoint)
        .bind(realm)
        .bind(window_secs)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    /// 清理窗口外的尝试记录
    pub async fn cleanup_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE expires_at < NOW()")
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_normalizes_case_and_whitespace() {
        let a = AttemptRepository::hash_key("User@Example.com ");
        let b = AttemptRepository::hash_key("user@example.com");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
