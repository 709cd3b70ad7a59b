mod common;

use std::time::Duration;

use common::{COMMUNITY, FakePosts, Harness, post};
use plaza::application::maintenance::{MaintenanceError, RebuildReport};
use plaza::cache::codec::decode_popular;
use plaza::cache::{BoundedListCache, BoundedSortedCache, CacheConfig, CacheStore, keys};
use plaza::domain::entities::{NewPost, PopularScope};
use plaza::domain::error::DomainError;

fn new_post(community_id: i64, content: &str) -> NewPost {
    NewPost {
        user_id: 100,
        community_id,
        content: content.to_string(),
        is_scan: false,
    }
}

async fn warm_time_feed(harness: &Harness, community_id: i64) -> Vec<i64> {
    let page = harness
        .feeds
        .feed_by_time(community_id, 1, 0, None)
        .await
        .expect("warm");
    harness.settle().await;
    page.posts.iter().map(|post| post.post.post_id).collect()
}

#[tokio::test]
async fn created_post_becomes_head_of_cached_first_page() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 25));
    let old_first_page = warm_time_feed(&harness, COMMUNITY).await;
    let calls = harness.posts.recency_calls();

    let created = harness
        .maintainer
        .create_post(new_post(COMMUNITY, "hello plaza"))
        .await
        .expect("create");
    assert_eq!(created.post_id, 26);

    let page = harness
        .feeds
        .feed_by_time(COMMUNITY, 1, 0, None)
        .await
        .expect("page");
    let served: Vec<i64> = page.posts.iter().map(|post| post.post.post_id).collect();
    let mut expected = vec![created.post_id];
    expected.extend_from_slice(&old_first_page[..19]);
    assert_eq!(served, expected);
    assert_eq!(harness.posts.recency_calls(), calls, "served from cache");

    let cached = BoundedListCache::new(harness.store.clone(), harness.config.clone())
        .read(COMMUNITY)
        .await
        .expect("read");
    assert_eq!(cached.len(), 26, "no cached post is lost by the rewrite");
    assert_eq!(
        harness.store.list_len(&keys::time_feed(COMMUNITY)).await.expect("len"),
        3,
        "head shard of 20 plus 1 spills into a new shard"
    );
}

#[tokio::test]
async fn insert_keeps_the_list_expiry() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 25));
    warm_time_feed(&harness, COMMUNITY).await;

    harness
        .maintainer
        .create_post(new_post(COMMUNITY, "still expiring"))
        .await
        .expect("create");
    assert!(harness.store.ttl(&keys::time_feed(COMMUNITY)).is_some());
}

#[tokio::test]
async fn insert_into_full_list_cuts_back_to_low_water() {
    let config = CacheConfig {
        page_size: 2,
        population_pages: 5,
        shard_size: 2,
        insert_high_water_shards: 4,
        insert_low_water_shards: 2,
        ..CacheConfig::default()
    };
    let harness = Harness::with_config(FakePosts::community(COMMUNITY, 10), config);
    warm_time_feed(&harness, COMMUNITY).await;
    assert_eq!(
        harness.store.list_len(&keys::time_feed(COMMUNITY)).await.expect("len"),
        5
    );

    let created = harness
        .maintainer
        .create_post(new_post(COMMUNITY, "over the mark"))
        .await
        .expect("create");

    let cached = BoundedListCache::new(harness.store.clone(), harness.config.clone())
        .read(COMMUNITY)
        .await
        .expect("read");
    let cached: Vec<i64> = cached.iter().map(|post| post.post_id).collect();
    assert_eq!(cached, vec![created.post_id, 10, 9, 8, 7]);
}

#[tokio::test]
async fn insert_into_cold_cache_leaves_it_cold() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 3));

    let created = harness
        .maintainer
        .create_post(new_post(COMMUNITY, "nobody is reading yet"))
        .await
        .expect("create");
    assert_eq!(
        harness.store.list_len(&keys::time_feed(COMMUNITY)).await.expect("len"),
        0
    );

    let page = harness
        .feeds
        .feed_by_time(COMMUNITY, 1, 0, None)
        .await
        .expect("page");
    assert_eq!(page.posts[0].post.post_id, created.post_id);
}

#[tokio::test]
async fn post_created_during_population_reaches_the_first_page() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 25));
    harness
        .feeds
        .feed_by_time(COMMUNITY, 1, 0, None)
        .await
        .expect("cold page");

    let created = harness
        .maintainer
        .create_post(new_post(COMMUNITY, "racing the population"))
        .await
        .expect("create");
    harness.settle().await;

    let page = harness
        .feeds
        .feed_by_time(COMMUNITY, 1, 0, None)
        .await
        .expect("page");
    assert_eq!(page.posts[0].post.post_id, created.post_id);
    harness.settle().await;

    let cached = BoundedListCache::new(harness.store.clone(), harness.config.clone())
        .read(COMMUNITY)
        .await
        .expect("read");
    assert_eq!(cached.first().map(|post| post.post_id), Some(created.post_id));
    assert_eq!(cached.len(), 26);
}

#[tokio::test]
async fn post_created_during_reply_population_reaches_the_first_page() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 25));
    harness
        .feeds
        .feed_by_new_reply(COMMUNITY, 1, 0, None)
        .await
        .expect("cold page");

    let created = harness
        .maintainer
        .create_post(new_post(COMMUNITY, "racing the reply population"))
        .await
        .expect("create");
    harness.settle().await;

    let page = harness
        .feeds
        .feed_by_new_reply(COMMUNITY, 1, 0, None)
        .await
        .expect("page");
    assert_eq!(page.posts[0].post.post_id, created.post_id);
    harness.settle().await;

    let sorted = BoundedSortedCache::new(harness.store.clone(), harness.config.clone());
    assert_eq!(sorted.len(COMMUNITY).await.expect("len"), 26);
    let head = sorted.range(COMMUNITY, 0, 0).await.expect("range");
    assert_eq!(head[0].post_id, created.post_id);
}

#[tokio::test]
async fn created_post_joins_warm_reply_feed() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 25));
    harness
        .feeds
        .feed_by_new_reply(COMMUNITY, 1, 0, None)
        .await
        .expect("warm");
    harness.settle().await;
    let calls = harness.posts.reply_calls();

    let created = harness
        .maintainer
        .create_post(new_post(COMMUNITY, "fresh thread"))
        .await
        .expect("create");

    let page = harness
        .feeds
        .feed_by_new_reply(COMMUNITY, 1, 0, None)
        .await
        .expect("page");
    assert_eq!(page.posts[0].post.post_id, created.post_id);
    assert_eq!(harness.posts.reply_calls(), calls);
}

#[tokio::test]
async fn invalid_post_is_rejected_before_any_write() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 3));

    let err = harness
        .maintainer
        .create_post(new_post(COMMUNITY, "   "))
        .await
        .expect_err("blank content");
    assert!(matches!(
        err,
        MaintenanceError::Domain(DomainError::Validation { .. })
    ));

    let page = harness
        .feeds
        .feed_by_time(COMMUNITY, 1, 0, None)
        .await
        .expect("page");
    assert_eq!(page.posts.len(), 3);
}

#[tokio::test]
async fn cache_outage_does_not_fail_post_creation() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 25));
    warm_time_feed(&harness, COMMUNITY).await;
    harness.store.set_unavailable(true);

    let created = harness
        .maintainer
        .create_post(new_post(COMMUNITY, "written while cache is down"))
        .await
        .expect("durable write succeeds");
    assert_eq!(created.community_id, COMMUNITY);
}

#[tokio::test]
async fn trim_bounds_every_community() {
    let mut posts: Vec<_> = (1..=250).map(|id| post(COMMUNITY, id)).collect();
    posts.extend((251..=260).map(|id| post(2, id)));
    let harness = Harness::new(FakePosts::with_posts(posts.clone()));

    let newest_first: Vec<_> = posts[..250].iter().rev().cloned().collect();
    let list = BoundedListCache::new(harness.store.clone(), harness.config.clone());
    let sorted = BoundedSortedCache::new(harness.store.clone(), harness.config.clone());
    list.populate(COMMUNITY, &newest_first).await.expect("list");
    sorted.populate(COMMUNITY, &newest_first).await.expect("sorted");
    list.populate(2, &posts[250..]).await.expect("small list");

    let report = harness.maintainer.trim_all().await.expect("trim");
    assert_eq!(report.communities, 2);
    assert_eq!(report.trimmed, 1);
    assert_eq!(report.posts_removed, 100);
    assert_eq!(report.failed, 0);

    let cap = harness.config.trim_cap_posts;
    let kept = list.read(COMMUNITY).await.expect("read");
    assert!(kept.len() <= cap);
    assert_eq!(kept[0].post_id, 250, "the newest posts survive");
    assert!(sorted.len(COMMUNITY).await.expect("len") <= cap);
    assert_eq!(list.read(2).await.expect("read").len(), 10);
}

#[tokio::test]
async fn trim_continues_past_a_failing_community() {
    let mut posts: Vec<_> = (1..=5).map(|id| post(COMMUNITY, id)).collect();
    posts.extend((6..=250).map(|id| post(2, id)));
    let harness = Harness::new(FakePosts::with_posts(posts.clone()));

    harness
        .store
        .list_replace(
            &keys::time_feed(COMMUNITY),
            vec!["garbage".to_string()],
            Duration::from_secs(60),
        )
        .await
        .expect("seed");
    let list = BoundedListCache::new(harness.store.clone(), harness.config.clone());
    let newest_first: Vec<_> = posts[5..].iter().rev().cloned().collect();
    list.populate(2, &newest_first).await.expect("populate");

    let report = harness.maintainer.trim_all().await.expect("trim");
    assert_eq!(report.failed, 1);
    assert_eq!(report.trimmed, 1);
    assert_eq!(list.read(2).await.expect("read").len(), 200);
}

#[tokio::test]
async fn trim_reports_store_outage() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 5));
    harness.posts.set_failing(true);
    assert!(matches!(
        harness.maintainer.trim_all().await,
        Err(MaintenanceError::Repo(_))
    ));
}

#[tokio::test]
async fn rebuild_writes_every_popularity_snapshot() {
    let mut posts: Vec<_> = (1..=30).map(|id| post(COMMUNITY, id)).collect();
    posts.extend((31..=40).map(|id| post(2, id)));
    let harness = Harness::new(FakePosts::with_posts(posts));

    let report = harness.maintainer.rebuild_popular().await.expect("rebuild");
    assert_eq!(
        report,
        RebuildReport {
            rebuilt: 3,
            failed: 0
        }
    );

    for scope in [
        PopularScope::Global,
        PopularScope::Community(COMMUNITY),
        PopularScope::Community(2),
    ] {
        let key = keys::popular(scope);
        let raw = harness
            .store
            .get(&key)
            .await
            .expect("get")
            .expect("snapshot written");
        let blob = decode_popular(&raw).expect("decode");
        assert!(!blob.posts.is_empty());
        assert!(blob.posts.iter().all(|post| post.is_liked.is_none()));
        let ttl = harness.store.ttl(&key).expect("expiry");
        assert!(ttl <= Duration::from_secs(3600));
    }

    let calls = harness.posts.popularity_calls();
    let served = harness
        .feeds
        .popular_posts(PopularScope::Community(2), 5)
        .await
        .expect("popular");
    assert_eq!(served.len(), 5);
    assert_eq!(harness.posts.popularity_calls(), calls, "served from snapshot");
}

#[tokio::test]
async fn popularity_miss_rebuilds_synchronously() {
    let harness = Harness::new(FakePosts::community(COMMUNITY, 30));

    let first = harness
        .feeds
        .popular_posts(PopularScope::Global, 5)
        .await
        .expect("popular");
    assert_eq!(first.len(), 5);
    assert_eq!(harness.posts.popularity_calls(), 1);
    let ranks: Vec<_> = first
        .iter()
        .map(|post| (post.post.star_count, post.post.collection_count))
        .collect();
    let mut sorted = ranks.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(ranks, sorted);

    let again = harness
        .feeds
        .popular_posts(PopularScope::Global, 0)
        .await
        .expect("popular");
    assert_eq!(again.len(), 30.min(harness.config.popular_limit));
    assert_eq!(harness.posts.popularity_calls(), 1);

    harness
        .store
        .delete(&keys::popular(PopularScope::Global))
        .await
        .expect("expire");
    harness
        .feeds
        .popular_posts(PopularScope::Global, 5)
        .await
        .expect("rebuilt");
    assert_eq!(harness.posts.popularity_calls(), 2);
}
