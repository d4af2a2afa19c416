//! 多租户商务核心库
//! 会话、租户隔离与审计/事件管线

pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod rls;
pub mod routes;
pub mod services;
pub mod telemetry;
