//! JWT token generation and validation
//! Two independently keyed signing realms (tenant / admin) that never
//! share signing material; tokens from one realm fail validation in the
//! other at the signature level.

use crate::{config::AppConfig, context::Realm, error::AppError};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user or admin ID)
    pub sub: String,

    /// Realm the token was issued under (tenant or admin)
    pub realm: String,

    /// Tenant scope (tenant realm only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier)
    pub jti: String,
}

struct RealmKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl RealmKeys {
    fn from_secret(secret: &str) -> Result<Self, AppError> {
        // Ensure secret is at least 32 bytes for HS256
        if secret.len() < 32 {
            return Err(AppError::Config(
                "JWT secret too short (min 32 chars)".to_string(),
            ));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }
}

/// JWT service holding one key pair per realm
pub struct JwtService {
    tenant: RealmKeys,
    admin: RealmKeys,
    access_token_exp_secs: u64,
}

impl JwtService {
    /// Create JWT service from config
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let tenant = RealmKeys::from_secret(config.security.tenant_jwt_secret.expose_secret())?;
        let admin = RealmKeys::from_secret(config.security.admin_jwt_secret.expose_secret())?;

        Ok(Self {
            tenant,
            admin,
            access_token_exp_secs: config.security.access_token_exp_secs,
        })
    }

    fn keys(&self, realm: Realm) -> &RealmKeys {
        match realm {
            Realm::Tenant => &self.tenant,
            Realm::Admin => &self.admin,
        }
    }

    /// Generate a realm-scoped access token
    pub fn generate_access_token(
        &self,
        realm: Realm,
        subject_id: &Uuid,
        tenant_id: Option<Uuid>,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let expiration = now + Duration::seconds(self.access_token_exp_secs as i64);

        let claims = Claims {
            sub: subject_id.to_string(),
            realm: realm.as_str().to_string(),
            tenant_id: tenant_id.map(|id| id.to_string()),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.keys(realm).encoding).map_err(|e| {
            tracing::error!("Failed to encode access token: {:?}", e);
            AppError::Internal
        })
    }

    /// Validate and decode an access token against one realm.
    ///
    /// The other realm's tokens fail at the signature check (independent
    /// keys); the realm claim comparison is a second, cheaper gate on top.
    pub fn validate_access_token(&self, token: &str, realm: Realm) -> Result<Claims, AppError> {
        let claims = decode::<Claims>(
            token,
            &self.keys(realm).decoding,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| {
            tracing::debug!("Token validation failed: {:?}", e);
            AppError::Unauthenticated
        })?
        .claims;

        if claims.realm != realm.as_str() {
            tracing::debug!(
                "Realm mismatch: expected '{}', got '{}'",
                realm.as_str(),
                claims.realm
            );
            return Err(AppError::Unauthenticated);
        }

        // 租户域令牌必须携带租户
        if realm == Realm::Tenant && claims.tenant_id.is_none() {
            tracing::debug!("Tenant-realm token without tenant scope");
            return Err(AppError::Unauthenticated);
        }

        Ok(claims)
    }

    pub fn access_token_exp_secs(&self) -> u64 {
        self.access_token_exp_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    // Mock config for testing
    fn test_config() -> AppConfig {
        use crate::config::*;

        AppConfig {
            environment: "development".to_string(),
            server: ServerConfig {
                addr: "127.0.0.1:3000".to_string(),
                graceful_shutdown_timeout_secs: 30,
            },
            database: DatabaseConfig {
                url: Secret::new("postgresql://localhost/test".to_string()),
                max_connections: 10,
                min_connections: 1,
                acquire_timeout_secs: 30,
                idle_timeout_secs: 600,
                max_lifetime_secs: 1800,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
            security: SecurityConfig {
                tenant_jwt_secret: Secret::new(
                    "tenant_test_secret_key_32_characters!".to_string(),
                ),
                admin_jwt_secret: Secret::new(
                    "admin_test_secret_key_32_characters!!".to_string(),
                ),
                access_token_exp_secs: 900,
                refresh_token_exp_secs: 604800,
                rate_limit_window_secs: 300,
                rate_limit_max_attempts: 5,
                rate_limit_enforce: false,
                password_min_length: 8,
                seed_mode: false,
                trust_proxy: true,
            },
        }
    }

    #[test]
    fn test_generate_and_validate_tenant_token() {
        let service = JwtService::from_config(&test_config()).unwrap();
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let token = service
            .generate_access_token(Realm::Tenant, &user_id, Some(tenant_id))
            .unwrap();

        let claims = service.validate_access_token(&token, Realm::Tenant).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.realm, "tenant");
        assert_eq!(claims.tenant_id, Some(tenant_id.to_string()));
    }

    #[test]
    fn test_generate_and_validate_admin_token() {
        let service = JwtService::from_config(&test_config()).unwrap();
        let admin_id = Uuid::new_v4();

        let token = service
            .generate_access_token(Realm::Admin, &admin_id, None)
            .unwrap();

        let claims = service.validate_access_token(&token, Realm::Admin).unwrap();
        assert_eq!(claims.sub, admin_id.to_string());
        assert_eq!(claims.realm, "admin");
        assert!(claims.tenant_id.is_none());
    }

    #[test]
    fn test_cross_realm_rejection() {
        let service = JwtService::from_config(&test_config()).unwrap();
        let subject_id = Uuid::new_v4();

        let tenant_token = service
            .generate_access_token(Realm::Tenant, &subject_id, Some(Uuid::new_v4()))
            .unwrap();

        // Should fail: tenant token presented to the admin realm
        assert!(service
            .validate_access_token(&tenant_token, Realm::Admin)
            .is_err());

        let admin_token = service
            .generate_access_token(Realm::Admin, &subject_id, None)
            .unwrap();

        // Should fail: admin token presented to the tenant realm
        assert!(service
            .validate_access_token(&admin_token, Realm::Tenant)
            .is_err());
    }

    #[test]
    fn test_tenant_token_requires_tenant_scope() {
        let service = JwtService::from_config(&test_config()).unwrap();
        let user_id = Uuid::new_v4();

        let token = service
            .generate_access_token(Realm::Tenant, &user_id, None)
            .unwrap();

        assert!(service
            .validate_access_token(&token, Realm::Tenant)
            .is_err());
    }

    #[test]
    fn test_invalid_token_fails() {
        let service = JwtService::from_config(&test_config()).unwrap();
        assert!(service
            .validate_access_token("invalid_token", Realm::Tenant)
            .is_err());
        assert!(service
            .validate_access_token("invalid_token", Realm::Admin)
            .is_err());
    }
}
