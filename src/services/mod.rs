pub mod token_cache;
pub mod webhook_service;
