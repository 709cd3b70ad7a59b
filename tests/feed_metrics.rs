mod common;

use std::collections::HashSet;

use metrics_util::debugging::DebuggingRecorder;

use common::{COMMUNITY, FakePosts, Harness};
use plaza::cache::CacheConfig;
use plaza::domain::entities::NewPost;

#[tokio::test]
async fn feed_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let config = CacheConfig {
        trim_cap_posts: 20,
        ..CacheConfig::default()
    };
    let harness = Harness::with_config(FakePosts::community(COMMUNITY, 25), config);
    harness.collaborators.failing_likes.lock().await.insert(25);

    // Cold read, population, then a warm read
    harness
        .feeds
        .feed_by_time(COMMUNITY, 1, 7, None)
        .await
        .expect("cold page");
    harness.settle().await;
    harness
        .feeds
        .feed_by_time(COMMUNITY, 1, 7, None)
        .await
        .expect("warm page");

    harness
        .maintainer
        .create_post(NewPost {
            user_id: 100,
            community_id: COMMUNITY,
            content: "metrics".to_string(),
            is_scan: false,
        })
        .await
        .expect("create");

    harness.maintainer.trim_all().await.expect("trim");
    harness.maintainer.rebuild_popular().await.expect("rebuild");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "plaza_feed_cache_lookup_total",
        "plaza_feed_population_total",
        "plaza_feed_request_ms",
        "plaza_enrich_degraded_total",
        "plaza_cache_insert_total",
        "plaza_cache_trim_total",
        "plaza_popular_rebuild_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
