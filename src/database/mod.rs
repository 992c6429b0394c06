pub mod postgres_service;

pub use postgres_service::create_pool;
