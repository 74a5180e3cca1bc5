use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use vitrine::{
    application::{error::AppError, render::PageRenderer, roots::RootMapper, storage::ObjectStore},
    cache::{
        CacheConfig, EventDispatcher, InvalidationListener, InvalidationTarget, ListenerHandle,
        MediaCache, PageCache, purge_directory,
        transport::{LocalPublisher, LocalTransport, RabbitTransport, RedisTransport},
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState, WebhookState},
        object_store::{HttpObjectStore, UnconfiguredObjectStore},
        telemetry,
        upstream::HttpRenderer,
    },
};

const WEBHOOK_TRANSPORT: &str = "webhook";
const WEBHOOK_BUFFER: usize = 64;

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
        config::Command::PurgeMedia(_) => run_purge_media(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let listener = app.listener.start().await;

    info!(
        target = "vitrine::serve",
        transports = ?listener.active_transports(),
        "invalidation transports subscribed"
    );

    let result = serve_http(&settings, app.http_state).await;
    shutdown_listener(listener, &settings).await;
    result
}

async fn run_purge_media(settings: config::Settings) -> Result<(), AppError> {
    let dir = settings.media.cache_dir;
    info!(
        target = "vitrine::purge_media",
        path = %dir.display(),
        "Purging media cache"
    );

    purge_directory(&dir)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(target = "vitrine::purge_media", "Media cache purged");
    Ok(())
}

struct ApplicationContext {
    http_state: HttpState,
    listener: InvalidationListener,
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let base_url = settings
        .upstream
        .base_url
        .clone()
        .ok_or_else(|| InfraError::configuration("upstream base url is not configured"))
        .map_err(AppError::from)?;

    let renderer: Arc<dyn PageRenderer> =
        Arc::new(HttpRenderer::new(base_url, settings.upstream.timeout)?);

    let objects: Arc<dyn ObjectStore> = match settings.media.endpoint.clone() {
        Some(endpoint) => Arc::new(HttpObjectStore::new(
            endpoint,
            settings.media.bucket.clone(),
            settings.media.timeout,
        )?),
        None => {
            warn!(
                target = "vitrine::serve",
                "media.endpoint is not configured; media requests will fail"
            );
            Arc::new(UnconfiguredObjectStore)
        }
    };

    let cache_config = CacheConfig::from(settings);
    let pages = Arc::new(PageCache::new(
        renderer,
        cache_config.enable_page_cache,
        cache_config.page_wait(),
    ));
    let media = Arc::new(MediaCache::new(objects, &cache_config));
    media
        .prepare()
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let roots = Arc::new(RootMapper::new(
        settings.roots.default_root.clone(),
        settings.roots.language_roots.clone(),
    ));

    let page_target: Arc<dyn InvalidationTarget> = pages.clone();
    let media_target: Arc<dyn InvalidationTarget> = media.clone();
    let targets = vec![page_target, media_target];
    let (listener, publisher) = build_listener(settings, EventDispatcher::new(targets));

    let webhook = match (settings.webhook.secret.as_deref(), publisher) {
        (Some(secret), Some(publisher)) => Some(WebhookState {
            secret: Arc::from(secret),
            publisher,
        }),
        _ => None,
    };

    Ok(ApplicationContext {
        http_state: HttpState {
            pages,
            media,
            roots,
            webhook,
        },
        listener,
    })
}

fn build_listener(
    settings: &config::Settings,
    dispatcher: EventDispatcher,
) -> (InvalidationListener, Option<LocalPublisher>) {
    let mut listener = InvalidationListener::new(dispatcher);

    if let Some(redis) = settings.events.redis.clone() {
        listener.add_transport(Box::new(RedisTransport::new(redis)));
    }
    if let Some(rabbit) = settings.events.rabbit.clone() {
        listener.add_transport(Box::new(RabbitTransport::new(rabbit)));
    }

    let publisher = settings.webhook.secret.as_ref().map(|_| {
        let (transport, publisher) = LocalTransport::new(WEBHOOK_TRANSPORT, WEBHOOK_BUFFER);
        listener.add_transport(Box::new(transport));
        publisher
    });

    (listener, publisher)
}

async fn shutdown_listener(listener: ListenerHandle, settings: &config::Settings) {
    if tokio::time::timeout(settings.server.graceful_shutdown, listener.shutdown())
        .await
        .is_err()
    {
        warn!(
            target = "vitrine::serve",
            "invalidation listener did not stop within the shutdown timeout"
        );
    }
}

async fn serve_http(settings: &config::Settings, http_state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(http_state, &settings.media.route_prefix);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "vitrine::serve",
        addr = %settings.server.addr,
        "listening"
    );

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
    info!(target = "vitrine::serve", "shutdown signal received");
}
