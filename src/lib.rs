//! Role-aware 1:1 messaging between providers and the finance desk.
//!
//! `core` holds the server side (stores, permission rules, the messaging
//! façade and its typed boundary); `app` is the polling client that drives it.

pub mod app;
pub mod config;
pub mod core;
pub mod ui;
