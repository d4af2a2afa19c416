//! HTTP request handlers

pub mod auth;
pub mod cart;
pub mod event;
pub mod health;
