//! Postgres harness: one container for the whole run, a fresh migrated
//! database per test.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use gym_keeper::repositories::PgStore;

struct SharedPostgres {
    host: String,
    port: u16,
    // Keeps the container alive for the entire test run
    _container: ContainerAsync<Postgres>,
}

static SHARED_POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(5432).await?;

        Ok(Self {
            host,
            port,
            _container: container,
        })
    }

    async fn get() -> &'static Self {
        SHARED_POSTGRES
            .get_or_init(|| async {
                Self::start()
                    .await
                    .expect("Failed to initialize shared Postgres container")
            })
            .await
    }

    fn url(&self, database: &str) -> String {
        format!(
            "postgresql://postgres:postgres@{}:{}/{}",
            self.host, self.port, database
        )
    }
}

pub struct PgHarness {
    pub pool: PgPool,
    pub store: PgStore,
}

impl PgHarness {
    pub async fn new() -> Result<Self> {
        let shared = SharedPostgres::get().await;
        let database = format!("gym_{}", Uuid::new_v4().simple());

        let mut admin = PgConnection::connect(&shared.url("postgres"))
            .await
            .context("Failed to connect to the admin database")?;
        let create = format!(r#"CREATE DATABASE "{database}""#);
        admin.execute(create.as_str()).await?;
        admin.close().await?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&shared.url(&database))
            .await
            .context("Failed to connect to the test database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            store: PgStore::new(pool.clone()),
            pool,
        })
    }
}
