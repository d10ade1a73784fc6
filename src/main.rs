// Weather Pipeline API v0.1
use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod models;
mod routes;
mod services;

use config::AppConfig;
use db::queries::{LocationStore, PgLocationStore};
use routes::AppState;
use services::history::WeatherHistoryService;
use services::location_mapper::LocationTypeMapper;
use services::locations::LocationsService;
use services::onecall::{self, OneCallProvider};
use services::openweathermap::{self, OpenWeatherMapProvider};
use services::provider::ProviderRegistry;
use services::scheduler::RefreshScheduler;
use services::settings::SettingsService;
use services::timeseries::{PgTimeSeries, TimeSeriesBackend};
use services::weather::WeatherService;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;
/// Maximum number of connections in the time-series pool.
const TIMESERIES_POOL_MAX_CONNECTIONS: u32 = 3;

/// Weather Pipeline API OpenAPI document.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Weather Pipeline API",
        version = "0.1.0",
        description = "Provider-agnostic weather acquisition API. Fetches current \
            weather, daily forecasts and alerts from pluggable vendor providers, \
            caches them, refreshes them on a schedule while an API key is configured \
            and records history in a time-series store.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Weather", description = "Current weather, forecasts, alerts and history"),
        (name = "Locations", description = "Weather location management"),
        (name = "Providers", description = "Registered weather providers"),
        (name = "Settings", description = "Runtime weather settings"),
        (name = "Scheduler", description = "Background refresh job status"),
    ),
    paths(
        routes::health::health_check,
        routes::weather::get_weather,
        routes::weather::get_current_weather,
        routes::weather::get_forecast_weather,
        routes::weather::get_all_weather,
        routes::weather::get_location_weather,
        routes::weather::get_location_alerts,
        routes::weather::get_location_history,
        routes::weather::get_location_statistics,
        routes::locations::list_locations,
        routes::locations::get_location,
        routes::locations::create_location,
        routes::locations::update_location,
        routes::locations::delete_location,
        routes::providers::list_providers,
        routes::settings::get_weather_settings,
        routes::settings::update_weather_settings,
        routes::scheduler::get_scheduler_status,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::weather::AlertsResponse,
            routes::weather::HistoryResponse,
            routes::weather::StatisticsResponse,
            routes::settings::WeatherSettingsResponse,
            models::Wind,
            models::WeatherCondition,
            models::CurrentWeather,
            models::ForecastTemperature,
            models::ForecastFeelsLike,
            models::ForecastDay,
            models::LocationSummary,
            models::CurrentSnapshot,
            models::LocationWeather,
            models::Alert,
            db::models::Location,
            services::locations::CreateLocation,
            services::locations::UpdateLocation,
            services::provider::ProviderMetadata,
            services::history::HistoryPoint,
            services::history::WeatherStatistics,
            services::settings::TemperatureUnit,
            services::settings::Language,
            services::settings::UpdateWeatherSettings,
            services::scheduler::RefreshSchedule,
            services::scheduler::SchedulerState,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_pipeline_api=debug,tower_http=debug".into()),
        )
        .with(config.json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // Time-series store is optional; history is disabled without it
    let timeseries_pool = match &config.timeseries_database_url {
        Some(url) => match PgPoolOptions::new()
            .max_connections(TIMESERIES_POOL_MAX_CONNECTIONS)
            .connect(url)
            .await
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!("Time-series store unreachable, weather history disabled: {}", e);
                None
            }
        },
        None => {
            tracing::info!("TIMESERIES_DATABASE_URL not set, weather history disabled");
            None
        }
    };
    let timeseries: Arc<dyn TimeSeriesBackend> = Arc::new(PgTimeSeries::new(timeseries_pool));
    let history = WeatherHistoryService::new(timeseries);
    history.register_schema().await;

    let settings = Arc::new(SettingsService::from_env());

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .expect("Failed to build HTTP client");

    // Register location types and their providers
    let mapper = Arc::new(LocationTypeMapper::new());
    mapper.register_mapping(openweathermap::location_mapping());
    mapper.register_mapping(onecall::location_mapping());

    let providers = Arc::new(ProviderRegistry::new());
    providers.register(Arc::new(OpenWeatherMapProvider::new(
        http.clone(),
        &config.openweathermap_base_url,
        settings.clone(),
    )));
    providers.register(Arc::new(OneCallProvider::new(
        http,
        &config.openweathermap_base_url,
        settings.clone(),
    )));

    let store: Arc<dyn LocationStore> = Arc::new(PgLocationStore::new(pool.clone()));
    let weather = Arc::new(WeatherService::new(
        store.clone(),
        providers.clone(),
        mapper.clone(),
        settings.clone(),
        history.clone(),
        Arc::new(RefreshScheduler::new(config.refresh_schedule)),
    ));
    let locations = Arc::new(LocationsService::new(
        store,
        mapper,
        settings.clone(),
        weather.clone(),
    ));

    // Start the refresh job now if a key is already configured, then follow
    // settings changes
    weather.spawn_config_listener();
    weather.handle_configuration_updated().await;

    let app_state = AppState {
        pool,
        weather,
        locations,
        providers,
        settings,
        history,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any);

    // Build router
    let weather_routes = Router::new()
        .route("/api/v1/weather", get(routes::weather::get_weather))
        .route(
            "/api/v1/weather/current",
            get(routes::weather::get_current_weather),
        )
        .route(
            "/api/v1/weather/forecast",
            get(routes::weather::get_forecast_weather),
        )
        .route(
            "/api/v1/weather/locations",
            get(routes::weather::get_all_weather),
        )
        .route(
            "/api/v1/weather/locations/:id",
            get(routes::weather::get_location_weather),
        )
        .route(
            "/api/v1/weather/locations/:id/alerts",
            get(routes::weather::get_location_alerts),
        )
        .route(
            "/api/v1/weather/locations/:id/history",
            get(routes::weather::get_location_history),
        )
        .route(
            "/api/v1/weather/locations/:id/statistics",
            get(routes::weather::get_location_statistics),
        );

    let location_routes = Router::new()
        .route(
            "/api/v1/locations",
            get(routes::locations::list_locations).post(routes::locations::create_location),
        )
        .route(
            "/api/v1/locations/:id",
            get(routes::locations::get_location)
                .patch(routes::locations::update_location)
                .delete(routes::locations::delete_location),
        );

    let admin_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/providers", get(routes::providers::list_providers))
        .route(
            "/api/v1/settings/weather",
            get(routes::settings::get_weather_settings)
                .patch(routes::settings::update_weather_settings),
        )
        .route(
            "/api/v1/scheduler/status",
            get(routes::scheduler::get_scheduler_status),
        );

    let api = Router::new()
        .merge(weather_routes)
        .merge(location_routes)
        .merge(admin_routes)
        .with_state(app_state);

    let app = Router::new()
        .merge(api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
