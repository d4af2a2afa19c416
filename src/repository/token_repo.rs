//! 刷新凭证数据访问
//!
//! 凭证明文只出现在签发应答里，存储一律为 SHA-256 哈希。
//! 查找、标记已轮换、写入后继这三步由服务层放在同一事务里执行，
//! 这里的函数接受任意执行器（连接池或事务内连接）。
//! 轮换本身是原子的条件更新：同一家族内两个并发持有者
//! 最多只有一个能把活跃凭证标记为已轮换。

use crate::{error::AppError, models::auth::RefreshCredential};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

pub struct TokenRepository;

/// 新凭证的写入参数
pub struct NewCredential<'a> {
    pub realm: &'a str,
    pub subject_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub family_id: Uuid,
    pub token_hash: &'a str,
    pub client_ip: &'a str,
    pub client_agent: Option<&'a str>,
    pub expires_at: DateTime<Utc>,
}

impl TokenRepository {
    /// 哈希令牌用于存储
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// 存储新凭证
    pub async fn store(
        exec: impl sqlx::PgExecutor<'_>,
        cred: &NewCredential<'_>,
    ) -> Result<Uuid, AppError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO refresh_tokens (
                realm, subject_id, tenant_id, family_id, token_hash, client_ip, client_agent, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(cred.realm)
        .bind(cred.subject_id)
        .bind(cred.tenant_id)
        .bind(cred.family_id)
        .bind(cred.token_hash)
        .bind(cred.client_ip)
        .bind(cred.client_agent)
        .bind(cred.expires_at)
        .fetch_one(exec)
        .await?;

        Ok(id)
    }

    /// 域内按哈希查找凭证。realm 是查询条件的一部分：
    /// 租户域的凭证在管理域查找中不可见，反之亦然。
    pub async fn find_by_hash(
        exec: impl sqlx::PgExecutor<'_>,
        realm: &str,
        token_hash: &str,
    ) -> Result<Option<RefreshCredential>, AppError> {
        let cred = sqlx::query_as::<_, RefreshCredential>(
            "SELECT * FROM refresh_tokens WHERE realm = $1 AND token_hash = $2",
        )
        .bind(realm)
        .bind(token_hash)
        .fetch_optional(exec)
        .await?;

        Ok(cred)
    }

    /// 原子地把活跃凭证标记为已轮换。
    /// 返回 false 表示凭证已不再活跃（并发轮换或已撤销），
    /// 调用方据此进入重放处理路径。
    pub async fn mark_rotated(
        exec: impl sqlx::PgExecutor<'_>,
        id: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET rotated_at = NOW(), last_used_at = NOW()
            WHERE id = $1 AND rotated_at IS NULL AND revoked_at IS NULL
            "#,
        )
        .bind(id)
        .execute(exec)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 撤销整个凭证家族（重放处理：所有后代一并失效）。
    /// 走连接池而非轮换事务：即便轮换事务随错误回滚，撤销也已落库。
    pub async fn revoke_family(pool: &PgPool, family_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE family_id = $1 AND revoked_at IS NULL",
        )
        .bind(family_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// 按哈希撤销（登出路径；幂等，重复登出不报错也不改写首次撤销时间）
    pub async fn revoke_by_hash(
        pool: &PgPool,
        realm: &str,
        token_hash: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE realm = $1 AND token_hash = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(realm)
        .bind(token_hash)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 撤销主体在某个域内的所有凭证
    pub async fn revoke_all_for_subject(
        pool: &PgPool,
        realm: &str,
        subject_id: Uuid,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE realm = $1 AND subject_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(realm)
        .bind(subject_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// 清理过期凭证
    pub async fn cleanup_expired(pool: &PgPool) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()")
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_stable_hex() {
        let h1 = TokenRepository::hash_token("some-token");
        let h2 = TokenRepository::hash_token("some-token");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));

        let h3 = TokenRepository::hash_token("other-token");
        assert_ne!(h1, h3);
    }
}
