//! Business logic services layer

pub mod audit_service;
pub mod auth_service;
pub mod cart_service;
pub mod token_service;

pub use audit_service::AuditService;
pub use auth_service::AuthService;
pub use cart_service::CartService;
pub use token_service::TokenService;
