use crate::domain::entities::PostRecord;

#[derive(sqlx::FromRow)]
pub(crate) struct PostRow {
    pub(crate) post_id: i64,
    pub(crate) user_id: i64,
    pub(crate) community_id: i64,
    pub(crate) content: String,
    pub(crate) star_count: i64,
    pub(crate) collection_count: i64,
    pub(crate) is_scan: bool,
    pub(crate) last_reply_time: i64,
    pub(crate) created_at: i64,
    pub(crate) deleted_at: Option<i64>,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        Self {
            post_id: row.post_id,
            user_id: row.user_id,
            community_id: row.community_id,
            content: row.content,
            star_count: row.star_count,
            collection_count: row.collection_count,
            is_scan: row.is_scan,
            last_reply_time: row.last_reply_time,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        }
    }
}
