use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};

use crate::application::repos::{PostsRepo, RepoError, clamp_limit};
use crate::domain::entities::{NewPost, PopularScope, PostRecord};

use super::super::{PostgresRepositories, map_sqlx_error};
use super::types::PostRow;

impl PostgresRepositories {
    async fn fetch_posts(
        &self,
        mut qb: QueryBuilder<'_, Postgres>,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let rows = qb
            .build_query_as::<PostRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(PostRecord::from).collect())
    }
}

fn push_limit(qb: &mut QueryBuilder<'_, Postgres>, limit: usize) {
    qb.push(" LIMIT ");
    qb.push_bind(clamp_limit(limit) as i64);
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn list_by_recency(
        &self,
        community_id: i64,
        before_post_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let mut qb = Self::select_posts();
        qb.push(" AND p.community_id = ");
        qb.push_bind(community_id);
        if let Some(before) = before_post_id {
            qb.push(" AND p.post_id < ");
            qb.push_bind(before);
        }
        qb.push(" ORDER BY p.post_id DESC");
        push_limit(&mut qb, limit);
        self.fetch_posts(qb).await
    }

    async fn list_by_reply_time(
        &self,
        community_id: i64,
        before_reply_time: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let mut qb = Self::select_posts();
        qb.push(" AND p.community_id = ");
        qb.push_bind(community_id);
        if let Some(before) = before_reply_time {
            qb.push(" AND p.last_reply_time < ");
            qb.push_bind(before);
        }
        qb.push(" ORDER BY p.last_reply_time DESC, p.post_id DESC");
        push_limit(&mut qb, limit);
        self.fetch_posts(qb).await
    }

    async fn list_by_popularity(
        &self,
        scope: PopularScope,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let mut qb = Self::select_posts();
        if let PopularScope::Community(community_id) = scope {
            qb.push(" AND p.community_id = ");
            qb.push_bind(community_id);
        }
        qb.push(" ORDER BY p.star_count DESC, p.collection_count DESC, p.post_id DESC");
        push_limit(&mut qb, limit);
        self.fetch_posts(qb).await
    }

    async fn list_by_authors(
        &self,
        user_ids: &[i64],
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = Self::select_posts();
        qb.push(" AND p.user_id = ANY(");
        qb.push_bind(user_ids.to_vec());
        qb.push(") ORDER BY p.post_id DESC");
        push_limit(&mut qb, limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset as i64);
        self.fetch_posts(qb).await
    }

    async fn list_community_ids(&self) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT community_id FROM posts WHERE deleted_at IS NULL ORDER BY community_id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert_post(&self, post: NewPost) -> Result<PostRecord, RepoError> {
        self.insert_post_row(post).await
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.ping().await.map_err(map_sqlx_error)
    }
}
