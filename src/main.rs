use std::{process, sync::Arc};

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::CronStream;
use plaza::{
    application::{
        enrich::Enricher,
        error::AppError,
        feed::FeedService,
        jobs::{
            MaintenanceContext, cron_schedule, process_rebuild_popular_job,
            process_trim_caches_job,
        },
        maintenance::CacheMaintainer,
        repos::PostsRepo,
    },
    cache::{BackgroundTasks, CacheBackend, CacheStore, MemoryCacheStore, TaskSpawner},
    config,
    domain::ids::SnowflakeGenerator,
    infra::{
        collaborators::HttpCollaborators,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        redis::RedisCacheStore,
        telemetry,
    },
};
use tokio::task::JoinHandle;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::RebuildPopular(_) => run_rebuild_popular(settings).await,
        config::Command::TrimCaches(_) => run_trim_caches(settings).await,
    }
}

/// Everything the commands share once the stores are connected.
struct ApplicationContext {
    posts: Arc<PostgresRepositories>,
    tasks: Arc<BackgroundTasks>,
    feeds: FeedService,
    maintainer: Arc<CacheMaintainer>,
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let database_url = settings
        .database
        .url
        .as_deref()
        .ok_or_else(|| AppError::validation("database.url is required"))?;
    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let ids = Arc::new(SnowflakeGenerator::new(settings.server.node_id));
    let posts = Arc::new(PostgresRepositories::new(pool, ids));
    let store = init_cache_store(settings).await?;

    let collaborators = HttpCollaborators::new(settings.collaborators.clone())?.into_collaborators();
    let follows = collaborators.follows.clone();
    let enricher = Enricher::new(collaborators, settings.enrich.clone());

    let tasks = Arc::new(BackgroundTasks::new());
    let repo: Arc<dyn PostsRepo> = posts.clone();
    let spawner: Arc<dyn TaskSpawner> = tasks.clone();
    let feeds = FeedService::new(
        repo.clone(),
        store.clone(),
        spawner,
        enricher,
        follows,
        settings.cache.clone(),
    );
    let maintainer = Arc::new(CacheMaintainer::new(
        repo,
        store,
        feeds.clone(),
        settings.cache.clone(),
    ));

    Ok(ApplicationContext {
        posts,
        tasks,
        feeds,
        maintainer,
    })
}

async fn init_cache_store(settings: &config::Settings) -> Result<Arc<dyn CacheStore>, AppError> {
    match settings.cache.backend {
        CacheBackend::Memory => {
            info!(target = "plaza::cache", "Using in-process cache store");
            Ok(Arc::new(MemoryCacheStore::new()))
        }
        CacheBackend::Redis => {
            let url = settings
                .cache
                .redis_url
                .as_deref()
                .ok_or_else(|| AppError::validation("cache.redis_url is required"))?;
            let store = RedisCacheStore::connect(url)
                .await
                .map_err(|err| AppError::from(InfraError::cache(err.to_string())))?;
            info!(target = "plaza::cache", "Connected to Redis cache store");
            Ok(Arc::new(store))
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;

    let monitor_handle = if settings.jobs.enabled {
        Some(spawn_job_monitor(app.maintainer.clone(), &settings.jobs)?)
    } else {
        info!(target = "plaza::jobs", "Maintenance workers disabled");
        None
    };

    let state = HttpState {
        feeds: app.feeds.clone(),
        maintainer: app.maintainer.clone(),
        posts: app.posts.clone(),
    };
    let result = serve_http(&settings, state).await;

    if let Some(handle) = monitor_handle {
        handle.abort();
        let _ = handle.await;
    }

    let drained = tokio::time::timeout(settings.server.graceful_shutdown, app.tasks.join_all()).await;
    match drained {
        Ok(joined) => info!(target = "plaza::shutdown", joined, "Background cache tasks drained"),
        Err(_) => warn!(
            target = "plaza::shutdown",
            pending = app.tasks.pending(),
            "Gave up waiting for background cache tasks"
        ),
    }

    result
}

async fn run_rebuild_popular(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let report = app.maintainer.rebuild_popular().await?;
    info!(
        target = "plaza::rebuild_popular",
        rebuilt = report.rebuilt,
        failed = report.failed,
        "Popularity rebuild complete"
    );
    app.tasks.join_all().await;
    Ok(())
}

async fn run_trim_caches(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let report = app.maintainer.trim_all().await?;
    info!(
        target = "plaza::trim_caches",
        communities = report.communities,
        trimmed = report.trimmed,
        posts_removed = report.posts_removed,
        failed = report.failed,
        "Cache trim complete"
    );
    Ok(())
}

fn spawn_job_monitor(
    maintainer: Arc<CacheMaintainer>,
    jobs: &config::JobsSettings,
) -> Result<JoinHandle<()>, AppError> {
    let popular_schedule = cron_schedule(&jobs.popular_rebuild_cron)
        .map_err(|err| AppError::validation(err.to_string()))?;
    let trim_schedule =
        cron_schedule(&jobs.trim_cron).map_err(|err| AppError::validation(err.to_string()))?;

    let context = MaintenanceContext { maintainer };

    let popular_worker = WorkerBuilder::new("rebuild-popular-worker")
        .data(context.clone())
        .backend(CronStream::new(popular_schedule))
        .build_fn(process_rebuild_popular_job);

    let trim_worker = WorkerBuilder::new("trim-caches-worker")
        .data(context)
        .backend(CronStream::new(trim_schedule))
        .build_fn(process_trim_caches_job);

    let monitor = Monitor::new()
        .register(popular_worker)
        .register(trim_worker);

    Ok(tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    }))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(target = "plaza::http", addr = %settings.server.addr, "Listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "plaza::shutdown", "Shutdown signal received");
}
