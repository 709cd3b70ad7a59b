use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::{
    application::{
        error::HttpError,
        feed::{FeedError, FeedService},
        maintenance::CacheMaintainer,
        pagination::FeedCursor,
        repos::PostsRepo,
    },
    domain::entities::{NewPost, PopularScope},
};

use super::{
    health_response,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct HttpState {
    pub feeds: FeedService,
    pub maintainer: Arc<CacheMaintainer>,
    pub posts: Arc<dyn PostsRepo>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route(
            "/communities/{community_id}/posts",
            get(time_feed).post(create_post),
        )
        .route(
            "/communities/{community_id}/posts/new-reply",
            get(reply_feed),
        )
        .route(
            "/communities/{community_id}/posts/popular",
            get(community_popular),
        )
        .route("/posts/popular", get(popular))
        .route("/users/{actor_id}/following-feed", get(following_feed))
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedQuery {
    page: Option<u32>,
    cursor: Option<String>,
    actor: Option<i64>,
}

impl FeedQuery {
    fn parts(self) -> Result<(u32, i64, Option<FeedCursor>), FeedError> {
        let cursor = self
            .cursor
            .filter(|raw| !raw.is_empty())
            .map(|raw| FeedCursor::decode(&raw))
            .transpose()?;
        Ok((self.page.unwrap_or(1), self.actor.unwrap_or(0), cursor))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PopularQuery {
    community: Option<i64>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageQuery {
    page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CreatePostBody {
    user_id: i64,
    content: String,
    #[serde(default)]
    is_scan: bool,
}

async fn time_feed(
    State(state): State<HttpState>,
    Path(community_id): Path<i64>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, HttpError> {
    let (page, actor_id, cursor) = query.parts()?;
    let feed = state
        .feeds
        .feed_by_time(community_id, page, actor_id, cursor)
        .await?;
    Ok(Json(feed).into_response())
}

async fn reply_feed(
    State(state): State<HttpState>,
    Path(community_id): Path<i64>,
    Query(query): Query<FeedQuery>,
) -> Result<Response, HttpError> {
    let (page, actor_id, cursor) = query.parts()?;
    let feed = state
        .feeds
        .feed_by_new_reply(community_id, page, actor_id, cursor)
        .await?;
    Ok(Json(feed).into_response())
}

async fn popular(
    State(state): State<HttpState>,
    Query(query): Query<PopularQuery>,
) -> Result<Response, HttpError> {
    let scope = PopularScope::from_community(query.community);
    let posts = state
        .feeds
        .popular_posts(scope, query.limit.unwrap_or(0))
        .await?;
    Ok(Json(posts).into_response())
}

async fn community_popular(
    State(state): State<HttpState>,
    Path(community_id): Path<i64>,
    Query(query): Query<PopularQuery>,
) -> Result<Response, HttpError> {
    let scope = PopularScope::from_community(Some(community_id));
    let posts = state
        .feeds
        .popular_posts(scope, query.limit.unwrap_or(0))
        .await?;
    Ok(Json(posts).into_response())
}

async fn following_feed(
    State(state): State<HttpState>,
    Path(actor_id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Response, HttpError> {
    let feed = state
        .feeds
        .following_feed(actor_id, query.page.unwrap_or(1))
        .await?;
    Ok(Json(feed).into_response())
}

async fn create_post(
    State(state): State<HttpState>,
    Path(community_id): Path<i64>,
    Json(body): Json<CreatePostBody>,
) -> Result<Response, HttpError> {
    let post = NewPost {
        user_id: body.user_id,
        community_id,
        content: body.content,
        is_scan: body.is_scan,
    };
    let record = state.maintainer.create_post(post).await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn health(State(state): State<HttpState>) -> Response {
    health_response(state.posts.health_check().await)
}
