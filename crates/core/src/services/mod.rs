pub mod cache;
pub mod snapshot_service;
pub mod token_service;
