//! Postgres-backed post store.

mod posts;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
    query,
};

use crate::domain::ids::SnowflakeGenerator;

const POST_COLUMNS: &str = "SELECT p.post_id, p.user_id, p.community_id, p.content, \
     p.star_count, p.collection_count, p.is_scan, p.last_reply_time, p.created_at, \
     p.deleted_at FROM posts p WHERE p.deleted_at IS NULL ";

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
    ids: Arc<SnowflakeGenerator>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool, ids: Arc<SnowflakeGenerator>) -> Self {
        Self {
            pool: Arc::new(pool),
            ids,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    fn select_posts<'q>() -> QueryBuilder<'q, Postgres> {
        QueryBuilder::new(POST_COLUMNS)
    }

    async fn ping(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}
