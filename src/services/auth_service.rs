//! 双域认证服务：登录、刷新、登出、账户恢复
//!
//! 失败路径写入带具体原因码的审计记录，对外只返回笼统的
//! 401/403 文案，不可用于账户枚举。

use crate::{
    auth::jwt::JwtService,
    auth::password::PasswordHasher,
    config::AppConfig,
    context::{run_with_context, Realm, SecurityContext},
    error::AppError,
    models::{
        audit::{ActorType, AuditEntry, AuditRecord},
        auth::{LoginRequest, LoginResponse},
        user::PrincipalResponse,
    },
    repository::{
        audit_repo::AuditRepository, attempt_repo::AttemptRepository, user_repo::UserRepository,
    },
    services::audit_service::{AuditAction, AuditService},
    services::token_service::{ClientInfo, IssuedCredential, TokenService},
};
use futures::FutureExt;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// 登录失败的内部判别。原因码只进审计，不出现在应答里。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    InvalidCredentials,
    NotVerified,
    NoMembership,
    InactiveTenant,
}

impl LoginFailure {
    pub fn reason_code(&self) -> &'static str {
        match self {
            LoginFailure::InvalidCredentials => "INVALID_CREDENTIALS",
            LoginFailure::NotVerified => "NOT_VERIFIED",
            LoginFailure::NoMembership => "NO_MEMBERSHIP",
            LoginFailure::InactiveTenant => "INACTIVE_TENANT",
        }
    }

    /// 对外错误：租户停用是 403，其余一律 401
    pub fn into_error(self) -> AppError {
        match self {
            LoginFailure::InactiveTenant => AppError::Forbidden,
            LoginFailure::InvalidCredentials
            | LoginFailure::NotVerified
            | LoginFailure::NoMembership => AppError::Unauthenticated,
        }
    }
}

/// 登录成功的产物：访问令牌应答 + 待下发的刷新凭证
pub struct LoginSuccess {
    pub response: LoginResponse,
    pub refresh: IssuedCredential,
}

/// 登录评估结果（显式判别，调用方穷尽匹配）
pub enum LoginOutcome {
    Success(Box<LoginSuccess>),
    Failure(LoginFailure),
}

pub struct AuthService {
    db: PgPool,
    jwt_service: Arc<JwtService>,
    token_service: Arc<TokenService>,
    audit_service: Arc<AuditService>,
    config: Arc<AppConfig>,
}

impl AuthService {
    pub fn new(
        db: PgPool,
        jwt_service: Arc<JwtService>,
        token_service: Arc<TokenService>,
        audit_service: Arc<AuditService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            jwt_service,
            token_service,
            audit_service,
            config,
        }
    }

    // ==================== 登录 ====================

    /// 租户域登录
    pub async fn login_tenant(
        &self,
        req: LoginRequest,
        client: &ClientInfo,
        request_id: Uuid,
    ) -> Result<LoginSuccess, AppError> {
        let tenant_id = req
            .tenant_id
            .ok_or_else(|| AppError::Validation("tenant_id is required".to_string()))?;

        self.shadow_rate_limit("login", Realm::Tenant, &client.ip, &req.email)
            .await?;

        let outcome = self
            .evaluate_tenant_login(&req, tenant_id, client, request_id)
            .await?;

        match outcome {
            LoginOutcome::Success(success) => Ok(*success),
            LoginOutcome::Failure(failure) => {
                self.audit_login_failure(Realm::Tenant, Some(tenant_id), failure, client)
                    .await;
                Err(failure.into_error())
            }
        }
    }

    /// 管理域登录（不携带租户）
    pub async fn login_admin(
        &self,
        req: LoginRequest,
        client: &ClientInfo,
        request_id: Uuid,
    ) -> Result<LoginSuccess, AppError> {
        self.shadow_rate_limit("login", Realm::Admin, &client.ip, &req.email)
            .await?;

        let user_repo = UserRepository::new(self.db.clone());
        let admin = match user_repo.find_admin_by_email(&req.email).await? {
            Some(admin) => admin,
            None => {
                self.audit_login_failure(Realm::Admin, None, LoginFailure::InvalidCredentials, client)
                    .await;
                return Err(AppError::Unauthenticated);
            }
        };

        let hasher = PasswordHasher::new();
        if hasher.verify(&req.password, &admin.password_hash).is_err() {
            self.audit_login_failure(Realm::Admin, None, LoginFailure::InvalidCredentials, client)
                .await;
            return Err(AppError::Unauthenticated);
        }

        // 成功审计在管理域上下文作用域内提交
        let admin_id = admin.id;
        let ctx = SecurityContext::admin(Some(admin_id), request_id);
        let record = run_with_context(&self.db, &ctx, move |tx| {
            async move {
                AuditRepository::insert(
                    tx,
                    &AuditEntry {
                        realm: Realm::Admin.as_str().to_string(),
                        tenant_id: None,
                        actor_type: ActorType::Admin,
                        actor_id: Some(admin_id),
                        action: AuditAction::LoginSuccess.as_str().to_string(),
                        entity: "admin_user".to_string(),
                        entity_id: Some(admin_id),
                        before: None,
                        after: None,
                        metadata: None,
                    },
                )
                .await
            }
            .boxed()
        })
        .await?;
        self.audit_service.publish_event(record);

        let token = self
            .jwt_service
            .generate_access_token(Realm::Admin, &admin.id, None)?;
        let refresh = self
            .token_service
            .issue(Realm::Admin, admin.id, None, client)
            .await?;

        metrics::counter!("security.logins_total", "realm" => "admin").increment(1);

        Ok(LoginSuccess {
            response: LoginResponse {
                token,
                expires_in: self.jwt_service.access_token_exp_secs(),
                principal: PrincipalResponse::from_admin(&admin),
            },
            refresh,
        })
    }

    /// 按顺序评估租户登录的每一道闸门
    async fn evaluate_tenant_login(
        &self,
        req: &LoginRequest,
        tenant_id: Uuid,
        client: &ClientInfo,
        request_id: Uuid,
    ) -> Result<LoginOutcome, AppError> {
        let user_repo = UserRepository::new(self.db.clone());

        let user = match user_repo.find_by_email(&req.email).await? {
            Some(user) => user,
            None => return Ok(LoginOutcome::Failure(LoginFailure::InvalidCredentials)),
        };

        // 未验证邮箱先于密码校验拒绝：验证状态与密码正误无关
        if !user.is_verified() {
            return Ok(LoginOutcome::Failure(LoginFailure::NotVerified));
        }

        let hasher = PasswordHasher::new();
        if hasher.verify(&req.password, &user.password_hash).is_err() {
            return Ok(LoginOutcome::Failure(LoginFailure::InvalidCredentials));
        }

        let tenant = match user_repo.find_tenant(tenant_id).await? {
            Some(tenant) => tenant,
            // 租户不存在与无成员关系同码：不泄露租户 id 的有效性
            None => return Ok(LoginOutcome::Failure(LoginFailure::NoMembership)),
        };
        if !tenant.is_active() {
            return Ok(LoginOutcome::Failure(LoginFailure::InactiveTenant));
        }

        // 成员关系检查与成功审计在同一个租户上下文作用域内
        let user_id = user.id;
        let ctx = SecurityContext::tenant(tenant_id, Some(user_id), request_id);
        let membership_audit: Option<AuditRecord> =
            run_with_context(&self.db, &ctx, move |tx| {
                async move {
                    let membership =
                        UserRepository::find_membership(tx, tenant_id, user_id).await?;

                    match membership {
                        Some(m) if m.is_active() => {
                            let record = AuditRepository::insert(
                                tx,
                                &AuditEntry {
                                    realm: Realm::Tenant.as_str().to_string(),
                                    tenant_id: Some(tenant_id),
                                    actor_type: ActorType::User,
                                    actor_id: Some(user_id),
                                    action: AuditAction::LoginSuccess.as_str().to_string(),
                                    entity: "user".to_string(),
                                    entity_id: Some(user_id),
                                    before: None,
                                    after: None,
                                    metadata: Some(serde_json::json!({"role": m.role})),
                                },
                            )
                            .await?;
                            Ok(Some(record))
                        }
                        _ => Ok(None),
                    }
                }
                .boxed()
            })
            .await?;

        let record = match membership_audit {
            Some(record) => record,
            None => return Ok(LoginOutcome::Failure(LoginFailure::NoMembership)),
        };
        self.audit_service.publish_event(record);

        let token =
            self.jwt_service
                .generate_access_token(Realm::Tenant, &user.id, Some(tenant_id))?;
        let refresh = self
            .token_service
            .issue(Realm::Tenant, user.id, Some(tenant_id), client)
            .await?;

        metrics::counter!("security.logins_total", "realm" => "tenant").increment(1);

        Ok(LoginOutcome::Success(Box::new(LoginSuccess {
            response: LoginResponse {
                token,
                expires_in: self.jwt_service.access_token_exp_secs(),
                principal: PrincipalResponse::from_user(&user, tenant_id),
            },
            refresh,
        })))
    }

    // ==================== 刷新与登出 ====================

    /// 轮换刷新凭证并签发新的访问令牌。
    /// 轮换在主体校验通过后才提交：校验失败让事务回滚，
    /// 旧凭证保持活跃，客户端重试不会被当成重放。
    pub async fn refresh(
        &self,
        presented_secret: &str,
        realm: Realm,
        client: &ClientInfo,
    ) -> Result<LoginSuccess, AppError> {
        let mut tx = self.db.begin().await?;
        let outcome = self
            .token_service
            .rotate_in(&mut tx, presented_secret, realm, client)
            .await?;

        let user_repo = UserRepository::new(self.db.clone());

        let (token, principal) = match realm {
            Realm::Tenant => {
                let tenant_id = outcome.tenant_id.ok_or(AppError::Unauthenticated)?;
                let user = user_repo
                    .find_by_id(outcome.subject_id)
                    .await?
                    .ok_or(AppError::Unauthenticated)?;
                if !user.is_verified() {
                    return Err(AppError::Unauthenticated);
                }
                let token = self.jwt_service.generate_access_token(
                    Realm::Tenant,
                    &user.id,
                    Some(tenant_id),
                )?;
                (token, PrincipalResponse::from_user(&user, tenant_id))
            }
            Realm::Admin => {
                let admin = user_repo
                    .find_admin_by_id(outcome.subject_id)
                    .await?
                    .ok_or(AppError::Unauthenticated)?;
                let token = self
                    .jwt_service
                    .generate_access_token(Realm::Admin, &admin.id, None)?;
                (token, PrincipalResponse::from_admin(&admin))
            }
        };

        tx.commit().await?;

        let record = self
            .audit_service
            .record_detached(AuditEntry {
                realm: realm.as_str().to_string(),
                tenant_id: outcome.tenant_id,
                actor_type: match realm {
                    Realm::Tenant => ActorType::User,
                    Realm::Admin => ActorType::Admin,
                },
                actor_id: Some(outcome.subject_id),
                action: AuditAction::TokenRefresh.as_str().to_string(),
                entity: "refresh_token".to_string(),
                entity_id: None,
                before: None,
                after: None,
                metadata: None,
            })
            .await;
        if let Some(record) = record {
            self.audit_service.publish_event(record);
        }

        Ok(LoginSuccess {
            response: LoginResponse {
                token,
                expires_in: self.jwt_service.access_token_exp_secs(),
                principal,
            },
            refresh: outcome.credential,
        })
    }

    /// 登出：撤销出示的凭证。幂等，未知凭证同样返回成功。
    pub async fn logout(&self, presented_secret: &str, realm: Realm) -> Result<(), AppError> {
        self.token_service
            .revoke_on_logout(presented_secret, realm)
            .await?;

        let record = self
            .audit_service
            .record_detached(AuditEntry {
                realm: realm.as_str().to_string(),
                tenant_id: None,
                actor_type: ActorType::System,
                actor_id: None,
                action: AuditAction::Logout.as_str().to_string(),
                entity: "refresh_token".to_string(),
                entity_id: None,
                before: None,
                after: None,
                metadata: None,
            })
            .await;
        if let Some(record) = record {
            self.audit_service.publish_event(record);
        }

        Ok(())
    }

    // ==================== 账户恢复 ====================

    /// 忘记密码。无论账户是否存在，调用方都得到同样的成功应答；
    /// 真实发生的动作只体现在审计里。
    pub async fn forgot_password(&self, email: &str, client: &ClientInfo) -> Result<(), AppError> {
        self.shadow_rate_limit("forgot_password", Realm::Tenant, &client.ip, email)
            .await?;

        let user_repo = UserRepository::new(self.db.clone());
        if let Some(user) = user_repo.find_by_email(email).await? {
            self.audit_service
                .record_detached(AuditEntry {
                    realm: Realm::Tenant.as_str().to_string(),
                    tenant_id: None,
                    actor_type: ActorType::User,
                    actor_id: Some(user.id),
                    action: AuditAction::PasswordResetRequest.as_str().to_string(),
                    entity: "user".to_string(),
                    entity_id: Some(user.id),
                    before: None,
                    after: None,
                    metadata: None,
                })
                .await;
        }

        Ok(())
    }

    /// 重发验证邮件。应答与忘记密码同样不区分账户存在性。
    pub async fn resend_verification(
        &self,
        email: &str,
        client: &ClientInfo,
    ) -> Result<(), AppError> {
        self.shadow_rate_limit("resend_verification", Realm::Tenant, &client.ip, email)
            .await?;

        let user_repo = UserRepository::new(self.db.clone());
        if let Some(user) = user_repo.find_by_email(email).await? {
            if !user.is_verified() {
                self.audit_service
                    .record_detached(AuditEntry {
                        realm: Realm::Tenant.as_str().to_string(),
                        tenant_id: None,
                        actor_type: ActorType::User,
                        actor_id: Some(user.id),
                        action: AuditAction::VerificationResendRequest.as_str().to_string(),
                        entity: "user".to_string(),
                        entity_id: Some(user.id),
                        before: None,
                        after: None,
                        metadata: None,
                    })
                    .await;
            }
        }

        Ok(())
    }

    // ==================== 内部 ====================

    /// 影子模式限流：记录并评估，超阈写审计与指标。
    /// 只有 rate_limit_enforce 打开时才真正拒绝。
    async fn shadow_rate_limit(
        &self,
        endpoint: &str,
        realm: Realm,
        client_ip: &str,
        email: &str,
    ) -> Result<(), AppError> {
        let attempt_repo = AttemptRepository::new(self.db.clone());
        let window_secs = self.config.security.rate_limit_window_secs as i64;
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(window_secs);

        let ip_key = AttemptRepository::hash_key(client_ip);
        let email_key = AttemptRepository::hash_key(email);

        attempt_repo
            .record(&ip_key, endpoint, realm.as_str(), expires_at)
            .await?;
        attempt_repo
            .record(&email_key, endpoint, realm.as_str(), expires_at)
            .await?;

        let ip_count = attempt_repo
            .count_recent(&ip_key, endpoint, realm.as_str(), window_secs)
            .await?;
        let email_count = attempt_repo
            .count_recent(&email_key, endpoint, realm.as_str(), window_secs)
            .await?;
        let count = ip_count.max(email_count);

        if count > self.config.security.rate_limit_max_attempts as i64 {
            metrics::counter!("security.rate_limit_threshold_total").increment(1);
            tracing::warn!(
                endpoint,
                realm = realm.as_str(),
                count,
                enforce = self.config.security.rate_limit_enforce,
                "Rate limit threshold exceeded"
            );

            self.audit_service
                .record_detached(AuditEntry {
                    realm: realm.as_str().to_string(),
                    tenant_id: None,
                    actor_type: ActorType::System,
                    actor_id: None,
                    action: AuditAction::RateLimitThreshold.as_str().to_string(),
                    entity: "login_attempt".to_string(),
                    entity_id: None,
                    before: None,
                    after: None,
                    metadata: Some(serde_json::json!({
                        "reason": "RATE_LIMIT_THRESHOLD",
                        "endpoint": endpoint,
                        "attempts": count,
                        "window_secs": window_secs,
                    })),
                })
                .await;

            if self.config.security.rate_limit_enforce {
                return Err(AppError::RateLimited);
            }
        }

        Ok(())
    }

    /// 登录失败审计（带原因码，分离路径写入）
    async fn audit_login_failure(
        &self,
        realm: Realm,
        tenant_id: Option<Uuid>,
        failure: LoginFailure,
        client: &ClientInfo,
    ) {
        metrics::counter!(
            "security.login_failures_total",
            "reason" => failure.reason_code()
        )
        .increment(1);

        self.audit_service
            .record_detached(AuditEntry {
                realm: realm.as_str().to_string(),
                tenant_id,
                actor_type: ActorType::System,
                actor_id: None,
                action: AuditAction::LoginFailure.as_str().to_string(),
                entity: "login".to_string(),
                entity_id: None,
                before: None,
                after: None,
                metadata: Some(serde_json::json!({
                    "reason": failure.reason_code(),
                    "ip_digest": AttemptRepository::hash_key(&client.ip),
                })),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            LoginFailure::InvalidCredentials.reason_code(),
            "INVALID_CREDENTIALS"
        );
        assert_eq!(LoginFailure::NotVerified.reason_code(), "NOT_VERIFIED");
        assert_eq!(LoginFailure::NoMembership.reason_code(), "NO_MEMBERSHIP");
        assert_eq!(LoginFailure::InactiveTenant.reason_code(), "INACTIVE_TENANT");
    }

    #[test]
    fn test_failure_error_mapping() {
        // 租户停用是 403，其余失败对外都是笼统的 401
        assert!(matches!(
            LoginFailure::InactiveTenant.into_error(),
            AppError::Forbidden
        ));
        assert!(matches!(
            LoginFailure::InvalidCredentials.into_error(),
            AppError::Unauthenticated
        ));
        assert!(matches!(
            LoginFailure::NotVerified.into_error(),
            AppError::Unauthenticated
        ));
        assert!(matches!(
            LoginFailure::NoMembership.into_error(),
            AppError::Unauthenticated
        ));
    }
}
