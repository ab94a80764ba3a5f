//! Postgres persistence.

pub mod repository;
pub mod schema;

pub use repository::PgVideoRepository;
