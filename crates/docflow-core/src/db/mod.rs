pub mod repository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use repository::Repository;

/// Thin wrapper over `sqlx::PgPool`: a single shared connection pool handed
/// to the repository, never exposed as a global session.
#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
}

impl DbPool {
    pub async fn connect(url: &str, max_size: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_size)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
