use std::env;
use std::sync::Arc;

use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use posterbox::api;
use posterbox::cache::ImageCacheManager;
use posterbox::config::AppConfig;
use posterbox::images::{HttpImageFetcher, ImagePreloader, ImageServices};
use rocket::{
    fairing::AdHoc,
    figment::{
        providers::{Format, Toml},
        Figment, Profile,
    },
    launch, Config,
};

#[launch]
async fn rocket() -> _ {
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    // Load config
    let mut figment = Figment::from(Config::default()).merge(Toml::file("App.toml").nested());

    if let Ok(database_url) = env::var("IMAGE_CACHE_DATABASE_URL") {
        figment = figment.merge(("cache.database_url", database_url));
    }

    if let Ok(max_size) = env::var("IMAGE_CACHE_MAX_SIZE") {
        match max_size.trim().parse::<u64>() {
            Ok(max_size) => figment = figment.merge(("cache.max_cache_size", max_size)),
            Err(e) => error!("Ignoring invalid IMAGE_CACHE_MAX_SIZE {}: {}", max_size, e),
        }
    }

    if let Ok(ttl) = env::var("IMAGE_CACHE_TTL_SECS") {
        match ttl.trim().parse::<u64>() {
            Ok(ttl) => figment = figment.merge(("cache.ttl_secs", ttl)),
            Err(e) => error!("Ignoring invalid IMAGE_CACHE_TTL_SECS {}: {}", ttl, e),
        }
    }

    figment = figment.select(Profile::from_env_or("APP_PROFILE", "default"));

    rocket::custom(figment)
        .attach(AdHoc::try_on_ignite("Image services", |rocket| async move {
            let config = match rocket.figment().extract::<AppConfig>() {
                Ok(config) => config,
                Err(e) => {
                    error!("Invalid configuration: {}", e);
                    return Err(rocket);
                }
            };
            info!("Configuration loaded successfully");

            let cache = Arc::new(ImageCacheManager::new(config.cache.clone()));
            match cache.store().init().await {
                Ok(()) => info!("Image cache opened at {}", cache.store().database_url()),
                // Reads and writes degrade to misses until the store comes back
                Err(e) => error!("Failed to open image cache: {}", e),
            }

            let fetcher = match HttpImageFetcher::new(config.timeout, &config.user_agent) {
                Ok(fetcher) => Arc::new(fetcher),
                Err(e) => {
                    error!("Failed to build image client: {}", e);
                    return Err(rocket);
                }
            };

            let services = ImageServices::new(cache, fetcher, config.loader.clone());
            let preloader = services.preloader();

            info!(
                "Starting image cache server on {}:{}",
                config.address, config.port
            );

            Ok(rocket
                .manage(services)
                .manage(preloader)
                .manage(config)
                .mount("/", api::routes()))
        }))
        .attach(AdHoc::on_shutdown("Image services", |rocket| {
            Box::pin(async move {
                if let Some(preloader) = rocket.state::<ImagePreloader>() {
                    preloader.shutdown();
                }
                if let Some(services) = rocket.state::<ImageServices>() {
                    services.cache.store().close().await;
                }
                info!("Image cache closed");
            })
        }))
}
