//! Connection handling for the SurrealDB backing store.

use std::env;

use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::info;

/// Connection settings for the backing store.
///
/// Every field can be overridden through a `TETHER_DB_*` environment
/// variable; [`DbConfig::from_env`] applies them on top of the
/// defaults.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// WebSocket address of the SurrealDB server.
    pub address: String,
    /// Namespace holding the Tether databases.
    pub namespace: String,
    /// Database name within the namespace.
    pub database: String,
    /// Root username.
    pub username: String,
    /// Root password.
    pub password: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8000".into(),
            namespace: "tether".into(),
            database: "entitlements".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

impl DbConfig {
    /// Build a config from the environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            address: env::var("TETHER_DB_ADDRESS").unwrap_or(base.address),
            namespace: env::var("TETHER_DB_NAMESPACE").unwrap_or(base.namespace),
            database: env::var("TETHER_DB_DATABASE").unwrap_or(base.database),
            username: env::var("TETHER_DB_USERNAME").unwrap_or(base.username),
            password: env::var("TETHER_DB_PASSWORD").unwrap_or(base.password),
        }
    }
}

/// Owns the live SurrealDB client handed out to the repositories.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Open a WebSocket connection, sign in as root, and select the
    /// configured namespace and database.
    pub async fn connect(config: &DbConfig) -> Result<Self, surrealdb::Error> {
        info!(
            address = %config.address,
            namespace = %config.namespace,
            database = %config.database,
            "Connecting to SurrealDB"
        );

        let db = Surreal::new::<Ws>(&config.address).await?;
        db.signin(Root {
            username: config.username.clone(),
            password: config.password.clone(),
        })
        .await?;
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        info!("Database connection established");
        Ok(Self { db })
    }

    /// The underlying client, cloned into each repository.
    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }
}
