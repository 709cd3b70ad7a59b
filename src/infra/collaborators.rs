//! JSON-over-HTTP clients for the collaborator services.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::application::collaborators::{
    CollaboratorError, Collaborators, CollectFlag, CommentCounter, CommunityDirectory,
    FollowDirectory, LikeCounter, UserDirectory,
};
use crate::config::CollaboratorSettings;
use crate::domain::entities::{CommunityInfo, UserInfo};
use crate::infra::error::InfraError;

#[derive(Deserialize)]
struct CountBody {
    count: i64,
}

#[derive(Deserialize)]
struct LikedBody {
    liked: bool,
}

#[derive(Deserialize)]
struct CollectedBody {
    collected: bool,
}

#[derive(Deserialize)]
struct FollowingBody {
    user_ids: Vec<i64>,
}

/// One pooled HTTP client shared by every collaborator.
#[derive(Clone)]
pub struct HttpCollaborators {
    client: Client,
    settings: CollaboratorSettings,
}

impl HttpCollaborators {
    pub fn new(settings: CollaboratorSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("plaza/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::configuration(format!("http client: {err}")))?;
        Ok(Self { client, settings })
    }

    pub fn into_collaborators(self) -> Collaborators {
        let shared = Arc::new(self);
        Collaborators {
            users: shared.clone(),
            communities: shared.clone(),
            likes: shared.clone(),
            comments: shared.clone(),
            collects: shared.clone(),
            follows: shared,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        service: &'static str,
        url: String,
    ) -> Result<T, CollaboratorError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| transport_error(service, err))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(CollaboratorError::Status {
                service,
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|err| CollaboratorError::decode(service, err))
    }
}

fn transport_error(service: &'static str, err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout { service }
    } else {
        CollaboratorError::transport(service, err)
    }
}

#[async_trait]
impl UserDirectory for HttpCollaborators {
    async fn get_user(&self, user_id: i64) -> Result<UserInfo, CollaboratorError> {
        let url = format!("{}/users/{user_id}", self.settings.users_url);
        self.get_json("users", url).await
    }
}

#[async_trait]
impl CommunityDirectory for HttpCollaborators {
    async fn get_community(&self, community_id: i64) -> Result<CommunityInfo, CollaboratorError> {
        let url = format!(
            "{}/communities/{community_id}",
            self.settings.communities_url
        );
        self.get_json("communities", url).await
    }
}

#[async_trait]
impl LikeCounter for HttpCollaborators {
    async fn like_count(&self, post_id: i64) -> Result<i64, CollaboratorError> {
        let url = format!("{}/posts/{post_id}/likes/count", self.settings.likes_url);
        let body: CountBody = self.get_json("likes", url).await?;
        Ok(body.count)
    }

    async fn is_liked(&self, actor_id: i64, post_id: i64) -> Result<bool, CollaboratorError> {
        let url = format!("{}/posts/{post_id}/likes/{actor_id}", self.settings.likes_url);
        let body: LikedBody = self.get_json("likes", url).await?;
        Ok(body.liked)
    }
}

#[async_trait]
impl CommentCounter for HttpCollaborators {
    async fn comment_count(&self, post_id: i64, actor_id: i64) -> Result<i64, CollaboratorError> {
        let url = format!(
            "{}/posts/{post_id}/comments/count?actor_id={actor_id}",
            self.settings.comments_url
        );
        let body: CountBody = self.get_json("comments", url).await?;
        Ok(body.count)
    }
}

#[async_trait]
impl CollectFlag for HttpCollaborators {
    async fn is_collected(&self, actor_id: i64, post_id: i64) -> Result<bool, CollaboratorError> {
        let url = format!(
            "{}/users/{actor_id}/collects/{post_id}",
            self.settings.collects_url
        );
        let body: CollectedBody = self.get_json("collects", url).await?;
        Ok(body.collected)
    }
}

#[async_trait]
impl FollowDirectory for HttpCollaborators {
    async fn following(&self, actor_id: i64) -> Result<Vec<i64>, CollaboratorError> {
        let url = format!("{}/users/{actor_id}/following", self.settings.follows_url);
        let body: FollowingBody = self.get_json("follows", url).await?;
        Ok(body.user_ids)
    }
}
