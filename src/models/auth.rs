//! Authentication-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Login request（租户登录必须携带 tenant_id，管理登录省略）
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
    pub tenant_id: Option<Uuid>,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: u64,
    pub principal: super::user::PrincipalResponse,
}

/// 忘记密码 / 重发验证邮件：无论账户是否存在，应答一律相同
#[derive(Debug, Deserialize, Validate)]
pub struct AccountRecoveryRequest {
    #[validate(email)]
    pub email: String,
}

/// 刷新凭证存储行。生命周期：
/// ACTIVE（rotated_at 与 revoked_at 均为空）→ ROTATED → 终态，
/// 或 ACTIVE/ROTATED → REVOKED → 终态。
#[derive(Debug, Clone, FromRow)]
pub struct RefreshCredential {
    pub id: Uuid,
    pub realm: String,
    pub subject_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub family_id: Uuid,
    pub token_hash: String,
    pub client_ip: String,
    pub client_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// 凭证状态（显式判别，穷尽匹配）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Active,
    Rotated,
    Revoked,
    Expired,
}

impl RefreshCredential {
    pub fn state(&self, now: DateTime<Utc>) -> CredentialState {
        if self.revoked_at.is_some() {
            CredentialState::Revoked
        } else if self.rotated_at.is_some() {
            CredentialState::Rotated
        } else if self.expires_at < now {
            CredentialState::Expired
        } else {
            CredentialState::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> RefreshCredential {
        let now = Utc::now();
        RefreshCredential {
            id: Uuid::new_v4(),
            realm: "tenant".to_string(),
            subject_id: Uuid::new_v4(),
            tenant_id: Some(Uuid::new_v4()),
            family_id: Uuid::new_v4(),
            token_hash: "abc".to_string(),
            client_ip: "127.0.0.1".to_string(),
            client_agent: None,
            created_at: now,
            rotated_at: None,
            revoked_at: None,
            last_used_at: None,
            expires_at: now + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn test_credential_state_machine() {
        let now = Utc::now();
        let mut cred = credential();
        assert_eq!(cred.state(now), CredentialState::Active);

        cred.rotated_at = Some(now);
        assert_eq!(cred.state(now), CredentialState::Rotated);

        // 已撤销优先于已轮换
        cred.revoked_at = Some(now);
        assert_eq!(cred.state(now), CredentialState::Revoked);
    }

    #[test]
    fn test_credential_expiry() {
        let now = Utc::now();
        let mut cred = credential();
        cred.expires_at = now - chrono::Duration::seconds(1);
        assert_eq!(cred.state(now), CredentialState::Expired);
    }
}
