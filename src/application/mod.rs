//! Feed services and the contracts they depend on.

pub mod collaborators;
pub mod enrich;
pub mod error;
pub mod fanout;
pub mod feed;
pub mod jobs;
pub mod maintenance;
pub mod pagination;
pub mod repos;
