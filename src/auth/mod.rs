//! 认证与授权模块

pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, JwtService};
pub use middleware::{admin_auth_middleware, tenant_auth_middleware, AuthContext, extract_token};
pub use password::PasswordHasher;
