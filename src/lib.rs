#[macro_use]
extern crate rocket;

pub mod db;
pub mod error;
pub mod models;
pub mod provider;
pub mod request_logger;
pub mod routes;
pub mod scheduler;

use crate::db::OutreachDb;
use crate::provider::{ProviderClient, ProviderConfig};
use crate::request_logger::RequestLogger;
use crate::scheduler::{Dispatcher, PlannerConfig, SchedulerConfig};
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::Once;

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    // Configure CORS
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(OutreachDb::init())
        .attach(cors)
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match OutreachDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        match db::run_migrations(&pool).await {
                            Ok(_) => {
                                log::info!("database migrations successful");
                                Ok(rocket)
                            }
                            Err(e) => {
                                log::error!("database migrations failed: {}", e);
                                Err(rocket)
                            }
                        }
                    }
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        // Clone and manage the database pool so routes and the background
        // dispatcher can use it outside the rocket_db_pools wrapper
        .attach(AdHoc::try_on_ignite("Manage DB Pool", |rocket| async move {
            match OutreachDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    Ok(rocket.manage(pool))
                }
                None => Err(rocket),
            }
        }))
        .attach(AdHoc::try_on_ignite(
            "Scheduler Configuration",
            |rocket| async move {
                let scheduler_config = SchedulerConfig::from_env();
                let planner_config = PlannerConfig::from_env();
                let provider_config = ProviderConfig::from_env();

                let provider_client = match ProviderClient::new(provider_config) {
                    Ok(client) => {
                        if let Err(err) = client.healthcheck().await {
                            log::warn!(
                                "provider health check failed: {}. Continuing; sends will retry per item.",
                                err
                            );
                        }
                        client
                    }
                    Err(err) => {
                        log::error!("failed to initialize provider client: {}", err);
                        return Err(rocket);
                    }
                };

                Ok(rocket
                    .manage(scheduler_config)
                    .manage(planner_config)
                    .manage(provider_client))
            },
        ))
        // Spawn the dispatch loop in the background
        .attach(AdHoc::on_liftoff("Spawn Dispatcher", |rocket| {
            Box::pin(async move {
                let pool = rocket.state::<rocket_db_pools::sqlx::PgPool>().cloned();
                let provider = rocket.state::<ProviderClient>().cloned();
                let config = rocket.state::<SchedulerConfig>().cloned();
                match (pool, provider, config) {
                    (Some(pool), Some(provider), Some(config)) => {
                        tokio::spawn(async move {
                            log::info!("starting dispatcher");
                            let dispatcher = Dispatcher::new(pool, provider, config);
                            dispatcher.run().await
                        });
                    }
                    _ => {
                        log::error!("failed to spawn dispatcher: managed state not found");
                    }
                }
            })
        }))
        .mount(
            "/api/v1",
            openapi_get_routes![
                // Health routes
                routes::health::health_check,
                // Queue item routes
                routes::queue::skip_item,
                routes::queue::cancel_item,
                routes::queue::requeue_item,
                // Campaign routes
                routes::campaigns::pause_campaign,
                routes::campaigns::resume_campaign,
                routes::campaigns::stop_campaign,
                routes::campaigns::schedule_contacts,
                // Admin routes
                routes::admin::run_dispatch,
                routes::admin::dispatch_status,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Outreach API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::models::{AccountStatus, CampaignStatus, Channel, QueueStatus};
    use crate::provider::ProviderClient;
    use crate::scheduler::{PlannerConfig, SchedulerConfig};
    use chrono::{DateTime, Utc};
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::{self, PgPool};
    use uuid::Uuid;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Convenience helpers for seeding accounts, campaigns, and queue
    /// rows in tests.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        /// Create a fixture helper bound to the provided pool.
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Insert a sending account, returning the new account id.
        pub async fn insert_account(
            &self,
            provider_account_id: &str,
            time_zone: &str,
            status: AccountStatus,
        ) -> Result<Uuid, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO accounts (provider_account_id, display_name, time_zone, status) VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(provider_account_id)
            .bind(provider_account_id)
            .bind(time_zone)
            .bind(status)
            .fetch_one(self.pool)
            .await
        }

        /// Set an account's daily ceiling for one channel.
        pub async fn set_account_limit(
            &self,
            account_id: Uuid,
            channel: Channel,
            daily_limit: i32,
        ) -> Result<(), sqlx::Error> {
            sqlx::query(
                "INSERT INTO account_limits (account_id, channel, daily_limit) VALUES ($1, $2, $3)
                 ON CONFLICT (account_id, channel) DO UPDATE SET daily_limit = $3",
            )
            .bind(account_id)
            .bind(channel)
            .bind(daily_limit)
            .execute(self.pool)
            .await?;

            Ok(())
        }

        /// Insert a campaign, returning the new campaign id.
        pub async fn insert_campaign(
            &self,
            name: &str,
            status: CampaignStatus,
        ) -> Result<Uuid, sqlx::Error> {
            sqlx::query_scalar("INSERT INTO campaigns (name, status) VALUES ($1, $2) RETURNING id")
                .bind(name)
                .bind(status)
                .fetch_one(self.pool)
                .await
        }

        /// Insert a queue item in the given status, returning its id.
        /// The identity column is derived from the recipient the same
        /// way the enqueue path derives it.
        #[allow(clippy::too_many_arguments)]
        pub async fn insert_queue_item(
            &self,
            campaign_id: Uuid,
            account_id: Uuid,
            channel: Channel,
            recipient: &str,
            subject: Option<&str>,
            body: &str,
            status: QueueStatus,
            scheduled_at: DateTime<Utc>,
        ) -> Result<Uuid, sqlx::Error> {
            sqlx::query_scalar(
                "INSERT INTO send_queue (campaign_id, account_id, contact_id, channel, recipient, identity, subject, body, status, scheduled_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
            )
            .bind(campaign_id)
            .bind(account_id)
            .bind(Uuid::new_v4())
            .bind(channel)
            .bind(recipient)
            .bind(channel.normalize_identity(recipient))
            .bind(subject.map(|s| s.to_string()))
            .bind(body)
            .bind(status)
            .bind(scheduled_at)
            .fetch_one(self.pool)
            .await
        }

        /// Add an identity to the do-not-contact list.
        pub async fn insert_suppression(
            &self,
            identity: &str,
            reason: Option<&str>,
        ) -> Result<(), sqlx::Error> {
            sqlx::query("INSERT INTO suppression_list (identity, reason) VALUES ($1, $2)")
                .bind(identity)
                .bind(reason.map(|r| r.to_string()))
                .execute(self.pool)
                .await?;

            Ok(())
        }

        /// Record a past send against an identity, for cooldown tests.
        pub async fn insert_history(
            &self,
            identity: &str,
            channel: Channel,
            sent_at: DateTime<Utc>,
        ) -> Result<(), sqlx::Error> {
            sqlx::query(
                "INSERT INTO outreach_history (identity, channel, sent_at) VALUES ($1, $2, $3)",
            )
            .bind(identity)
            .bind(channel)
            .bind(sent_at)
            .execute(self.pool)
            .await?;

            Ok(())
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::ImageExt;
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        use crate::db::MIGRATOR;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Provision a fresh database by launching a disposable
            /// Postgres container and applying migrations.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().with_tag("16-alpine").start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                let base_options: PgConnectOptions =
                    admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container: Some(container),
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Convenience method returning a clone of the pooled connection handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Re-run migrations to ensure schema freshness (idempotent).
            pub async fn reset(&self) -> Result<(), TestDatabaseError> {
                MIGRATOR.run(self.pool()).await?;
                Ok(())
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ =
                                drop_database_with_fallback(admin_options.clone(), &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ = drop_database_with_fallback(
                                        admin_options.clone(),
                                        &db_name,
                                    )
                                    .await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        scheduler_config: Option<SchedulerConfig>,
        planner_config: Option<PlannerConfig>,
        provider_client: Option<ProviderClient>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                pg_pool: None,
                scheduler_config: None,
                planner_config: None,
                provider_client: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Manage a `PgPool` instance for tests that exercise database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        /// Manage scheduler and planner configuration for routes that need them.
        pub fn manage_scheduler_config(
            mut self,
            config: SchedulerConfig,
            planner: PlannerConfig,
        ) -> Self {
            self.scheduler_config = Some(config);
            self.planner_config = Some(planner);
            self
        }

        /// Manage a provider client for routes that trigger dispatch.
        pub fn manage_provider_client(mut self, client: ProviderClient) -> Self {
            self.provider_client = Some(client);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(pool);
            }
            if let Some(config) = self.scheduler_config {
                rocket = rocket.manage(config);
            }
            if let Some(planner) = self.planner_config {
                rocket = rocket.manage(planner);
            }
            if let Some(client) = self.provider_client {
                rocket = rocket.manage(client);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
