pub mod config;
pub mod link_repo;
pub mod link_service;
mod orm;
pub mod resolver;
pub mod server;
pub mod short_code;
