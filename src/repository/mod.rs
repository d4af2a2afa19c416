//! 数据访问层
//!
//! 池访问仅限不受行隔离策略约束的表（users、admin_users、tenants、
//! refresh_tokens、login_attempts）。受策略约束的表必须通过
//! [`crate::context::run_with_context`] 打开的事务访问。

pub mod attempt_repo;
pub mod audit_repo;
pub mod cart_repo;
pub mod token_repo;
pub mod user_repo;

pub use attempt_repo::AttemptRepository;
pub use audit_repo::AuditRepository;
pub use cart_repo::CartRepository;
pub use token_repo::TokenRepository;
pub use user_repo::UserRepository;
