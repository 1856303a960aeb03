//! Route modules for the FileDepot server

pub mod export;
pub mod files;
pub mod health;
pub mod upload;
