//! 刷新凭证轮换服务
//!
//! 凭证按家族组织：登录签发一个新家族，每次刷新在家族内
//! 轮换出下一个凭证。已轮换或已撤销的凭证被再次出示即视为
//! 重放，整个家族立即撤销。

use crate::{
    config::AppConfig,
    context::Realm,
    error::AppError,
    models::audit::{ActorType, AuditEntry},
    models::auth::CredentialState,
    repository::token_repo::{NewCredential, TokenRepository},
    services::audit_service::{AuditAction, AuditService},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// 请求方信息（凭证行的归属记录）
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: String,
    pub agent: Option<String>,
}

/// 签发结果。secret 是明文，只在这一次应答中出现。
pub struct IssuedCredential {
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

/// 轮换结果：新凭证与其归属主体及租户作用域
pub struct RotationOutcome {
    pub subject_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub credential: IssuedCredential,
}

pub struct TokenService {
    db: PgPool,
    audit_service: Arc<AuditService>,
    config: Arc<AppConfig>,
}

impl TokenService {
    pub fn new(db: PgPool, audit_service: Arc<AuditService>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            audit_service,
            config,
        }
    }

    /// 生成 32 字节随机凭证明文（URL 安全 base64）
    fn generate_secret() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// 签发新凭证家族（登录路径）
    pub async fn issue(
        &self,
        realm: Realm,
        subject_id: Uuid,
        tenant_id: Option<Uuid>,
        client: &ClientInfo,
    ) -> Result<IssuedCredential, AppError> {
        self.issue_in_family(&self.db, realm, subject_id, tenant_id, Uuid::new_v4(), client)
            .await
    }

    async fn issue_in_family(
        &self,
        exec: impl sqlx::PgExecutor<'_>,
        realm: Realm,
        subject_id: Uuid,
        tenant_id: Option<Uuid>,
        family_id: Uuid,
        client: &ClientInfo,
    ) -> Result<IssuedCredential, AppError> {
        let secret = Self::generate_secret();
        let token_hash = TokenRepository::hash_token(&secret);
        let expires_at = Utc::now()
            + chrono::Duration::seconds(self.config.security.refresh_token_exp_secs as i64);

        TokenRepository::store(
            exec,
            &NewCredential {
                realm: realm.as_str(),
                subject_id,
                tenant_id,
                family_id,
                token_hash: &token_hash,
                client_ip: &client.ip,
                client_agent: client.agent.as_deref(),
                expires_at,
            },
        )
        .await?;

        Ok(IssuedCredential { secret, expires_at })
    }

    /// 轮换凭证：查找、标记已轮换、写入后继在一个事务里提交。
    pub async fn rotate(
        &self,
        presented_secret: &str,
        realm: Realm,
        client: &ClientInfo,
    ) -> Result<RotationOutcome, AppError> {
        let mut tx = self.db.begin().await?;
        let outcome = self.rotate_in(&mut tx, presented_secret, realm, client).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// 在调用方的事务内执行轮换，不提交。
    ///
    /// 出示的明文先哈希再做域内查找；查不到按普通认证失败处理。
    /// 查到但已不活跃 → 重放：撤销整个家族并返回 [`AppError::Replay`]
    /// （对外与 401 不可区分，调用方负责清除 cookie）。
    /// 活跃 → 原子标记已轮换并写入后继。旧凭证的标记与后继的写入
    /// 随调用方事务一起提交或回滚：中途失败不会留下零活跃凭证的
    /// 家族，客户端重试仍能用旧凭证正常轮换。
    /// 并发轮换输掉的一方按重放处理。
    pub async fn rotate_in(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
        presented_secret: &str,
        realm: Realm,
        client: &ClientInfo,
    ) -> Result<RotationOutcome, AppError> {
        let token_hash = TokenRepository::hash_token(presented_secret);

        let cred = TokenRepository::find_by_hash(&mut **tx, realm.as_str(), &token_hash)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        let now = Utc::now();
        match cred.state(now) {
            CredentialState::Rotated | CredentialState::Revoked => {
                return self.handle_replay(realm, &cred.family_id, cred.subject_id).await;
            }
            CredentialState::Expired => {
                return Err(AppError::Unauthenticated);
            }
            CredentialState::Active => {}
        }

        // 原子的条件更新：零行受影响说明并发轮换已抢先
        if !TokenRepository::mark_rotated(&mut **tx, cred.id).await? {
            return self.handle_replay(realm, &cred.family_id, cred.subject_id).await;
        }

        let credential = self
            .issue_in_family(
                &mut **tx,
                realm,
                cred.subject_id,
                cred.tenant_id,
                cred.family_id,
                client,
            )
            .await?;

        Ok(RotationOutcome {
            subject_id: cred.subject_id,
            tenant_id: cred.tenant_id,
            credential,
        })
    }

    /// 重放处理。撤销走连接池而非轮换事务：返回的 Err 会让
    /// 调用方的事务回滚，家族撤销必须不随之消失。
    async fn handle_replay(
        &self,
        realm: Realm,
        family_id: &Uuid,
        subject_id: Uuid,
    ) -> Result<RotationOutcome, AppError> {
        let revoked = TokenRepository::revoke_family(&self.db, *family_id).await?;

        metrics::counter!("security.replay_detections_total").increment(1);
        tracing::warn!(
            realm = realm.as_str(),
            family_id = %family_id,
            revoked,
            "Refresh credential replay detected, family revoked"
        );

        let record = self
            .audit_service
            .record_detached(AuditEntry {
                realm: realm.as_str().to_string(),
                tenant_id: None,
                actor_type: ActorType::System,
                actor_id: None,
                action: AuditAction::ReplayDetected.as_str().to_string(),
                entity: "refresh_token_family".to_string(),
                entity_id: Some(*family_id),
                before: None,
                after: None,
                metadata: Some(serde_json::json!({
                    "subject_id": subject_id,
                    "revoked_count": revoked,
                })),
            })
            .await;

        if let Some(record) = record {
            self.audit_service.publish_event(record);
        }

        Err(AppError::Replay)
    }

    /// 登出撤销。幂等：未知或已撤销的凭证按成功处理。
    pub async fn revoke_on_logout(
        &self,
        presented_secret: &str,
        realm: Realm,
    ) -> Result<(), AppError> {
        let token_hash = TokenRepository::hash_token(presented_secret);
        let _ = TokenRepository::revoke_by_hash(&self.db, realm.as_str(), &token_hash).await?;
        Ok(())
    }

    /// 撤销主体在某域内的全部凭证（全设备登出）
    pub async fn revoke_all_for_subject(
        &self,
        realm: Realm,
        subject_id: Uuid,
    ) -> Result<u64, AppError> {
        TokenRepository::revoke_all_for_subject(&self.db, realm.as_str(), subject_id).await
    }

    /// 过期凭证清理
    pub async fn cleanup_expired(&self) -> Result<u64, AppError> {
        TokenRepository::cleanup_expired(&self.db).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secrets_are_unique_and_url_safe() {
        let a = TokenService::generate_secret();
        let b = TokenService::generate_secret();
        assert_ne!(a, b);

        // 32 字节无填充 base64 = 43 字符
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
