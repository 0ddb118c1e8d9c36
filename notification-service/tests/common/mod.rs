//! Common test utilities for notification-service integration tests.
//!
//! Database-backed tests read `TEST_DATABASE_HOST`, `TEST_DATABASE_PORT`,
//! `TEST_DATABASE_USER` and `TEST_DATABASE_PASSWORD` (local defaults) and
//! are `#[ignore]`d; run them with `cargo test -- --ignored`. Each test
//! gets its own `notification_test_<uuid>` database, dropped again when the
//! owning `TestStore` or `TestApp` goes out of scope.

#![allow(dead_code)]

use notification_service::config::{CorsConfig, DatabaseConfig, NotificationConfig};
use notification_service::services::PgStore;
use notification_service::startup::Application;
use secrecy::Secret;
use service_core::config::{Config as CoreConfig, Environment};
use sqlx::{ConnectOptions, Connection};
use std::ops::Deref;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,notification_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Database settings pointing at a fresh, uniquely named database.
pub fn test_database_config() -> DatabaseConfig {
    DatabaseConfig {
        host: env_or("TEST_DATABASE_HOST", "localhost"),
        port: env_or("TEST_DATABASE_PORT", "5432")
            .parse()
            .expect("TEST_DATABASE_PORT must be a port number"),
        user: env_or("TEST_DATABASE_USER", "postgres"),
        password: Secret::new(env_or("TEST_DATABASE_PASSWORD", "postgres")),
        name: format!("notification_test_{}", uuid::Uuid::new_v4().simple()),
        admin_database: env_or("TEST_DATABASE_ADMIN", "postgres"),
    }
}

/// Database settings for a server that is not listening.
pub fn unreachable_database_config() -> DatabaseConfig {
    DatabaseConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        user: "postgres".to_string(),
        password: Secret::new("postgres".to_string()),
        name: "notifications_db".to_string(),
        admin_database: "postgres".to_string(),
    }
}

pub fn test_config(database: DatabaseConfig) -> NotificationConfig {
    NotificationConfig {
        common: CoreConfig { port: 0 },
        environment: Environment::Dev,
        service_name: "notification-service".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database,
        cors: CorsConfig {
            allowed_origins: vec!["*".to_string()],
        },
    }
}

/// Drops the test database when it goes out of scope.
pub struct TestDatabase {
    config: DatabaseConfig,
}

impl TestDatabase {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let config = self.config.clone();
        // Drop runs inside the test's runtime, so block on a fresh one elsewhere
        let _ = std::thread::spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(drop_database(&config)),
                Err(e) => eprintln!("Failed to build cleanup runtime: {}", e),
            }
        })
        .join();
    }
}

async fn drop_database(config: &DatabaseConfig) {
    let mut conn = match config.admin_connect_options().connect().await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Failed to connect for cleanup of {}: {}", config.name, e);
            return;
        }
    };

    let statement = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", config.name);
    if let Err(e) = sqlx::raw_sql(&statement).execute(&mut conn).await {
        eprintln!("Failed to drop test database {}: {}", config.name, e);
    }
    conn.close().await.ok();
}

/// A store over a freshly created database that is dropped with it.
pub struct TestStore {
    store: PgStore,
    database: TestDatabase,
}

impl TestStore {
    pub fn database_config(&self) -> &DatabaseConfig {
        &self.database.config
    }
}

impl Deref for TestStore {
    type Target = PgStore;

    fn deref(&self) -> &PgStore {
        &self.store
    }
}

/// A store whose database has already been created.
pub async fn test_store() -> TestStore {
    init_tracing();
    let config = test_database_config();
    let database = TestDatabase::new(config.clone());
    let store = PgStore::new(config);
    store
        .ensure_database()
        .await
        .expect("Failed to create test database");
    TestStore { store, database }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: PgStore,
    _database: TestDatabase,
}

impl TestApp {
    pub async fn spawn() -> Self {
        init_tracing();

        let database_config = test_database_config();
        let database = TestDatabase::new(database_config.clone());
        let app = Application::build(test_config(database_config))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let store = app.store().clone();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            _database: database,
        }
    }

    pub async fn post_notification(&self, body: &serde_json::Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/notifications", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_user_notifications(&self, uid: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}/users/{}/notifications", self.address, uid))
            .send()
            .await
            .expect("Failed to execute request")
    }
}
