use crate::application::repos::RepoError;
use crate::domain::entities::{NewPost, PostRecord, now_millis};

use super::super::{PostgresRepositories, map_sqlx_error};
use super::types::PostRow;

impl PostgresRepositories {
    pub(crate) async fn insert_post_row(&self, post: NewPost) -> Result<PostRecord, RepoError> {
        let NewPost {
            user_id,
            community_id,
            content,
            is_scan,
        } = post;

        let post_id = self.ids.next_id();
        let now = now_millis();
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (
                post_id, user_id, community_id, content, star_count, collection_count,
                is_scan, last_reply_time, created_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, 0, 0, $5, $6, $6, NULL)
            RETURNING post_id, user_id, community_id, content, star_count, collection_count,
                      is_scan, last_reply_time, created_at, deleted_at
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .bind(community_id)
        .bind(content)
        .bind(is_scan)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(PostRecord::from(row))
    }
}
