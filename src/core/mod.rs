pub mod api;
pub mod directory;
pub mod error;
pub mod finance;
pub mod media;
pub mod mime;
pub mod models;
pub mod permissions;
pub mod roles;
pub mod service;
pub mod store;

pub use error::{ChatError, ChatResult};
