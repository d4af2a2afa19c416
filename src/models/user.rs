//! 用户与成员关系模型（租户域与管理域的主体分开存储）

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// 租户域用户（全局账户）
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

/// 管理域用户
#[derive(Debug, Clone, FromRow)]
pub struct AdminUser {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 租户成员关系
#[derive(Debug, Clone, FromRow)]
pub struct TenantMembership {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TenantMembership {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// 对外返回的主体信息（不含密码哈希）
#[derive(Debug, Clone, Serialize)]
pub struct PrincipalResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub realm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
}

impl PrincipalResponse {
    pub fn from_user(user: &User, tenant_id: Uuid) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            realm: "tenant".to_string(),
            tenant_id: Some(tenant_id),
        }
    }

    pub fn from_admin(admin: &AdminUser) -> Self {
        Self {
            id: admin.id,
            email: admin.email.clone(),
            display_name: admin.display_name.clone(),
            realm: "admin".to_string(),
            tenant_id: None,
        }
    }
}
