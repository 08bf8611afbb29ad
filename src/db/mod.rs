use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

pub mod bill;
pub mod receipt;
pub mod user;

pub struct PostgresStore {
    pub pool: Pool,
}

impl PostgresStore {
    pub async fn new(conn_str: &str) -> Result<Self, anyhow::Error> {
        let cfg: tokio_postgres::Config = conn_str.parse()?;
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let pool = Pool::builder(Manager::from_config(cfg, NoTls, mgr_config))
            .max_size(16)
            .build()?;

        Ok(Self { pool })
    }

    pub async fn init(&self) -> Result<(), anyhow::Error> {
        let qry = r#"
            CREATE TABLE IF NOT EXISTS users (
                email TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TIMESTAMPTZ DEFAULT (NOW() AT TIME ZONE 'UTC')
            )
        "#;
        self.pool.get().await?.execute(qry, &[]).await?;

        // Receipt files, referenced by bills
        let qry = r#"
            CREATE TABLE IF NOT EXISTS receipt (
                id UUID PRIMARY KEY,
                file_name TEXT NOT NULL,
                content_type TEXT NOT NULL,
                content BYTEA NOT NULL
            )
        "#;
        self.pool.get().await?.execute(qry, &[]).await?;

        let qry = r#"
            CREATE TABLE IF NOT EXISTS bill (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL,
                expense_type TEXT NOT NULL,
                name TEXT NOT NULL,
                date DATE NOT NULL,
                amount BIGINT NOT NULL,
                vat BIGINT,
                pct INTEGER NOT NULL DEFAULT 20,
                commentary TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                receipt_name TEXT NOT NULL,
                receipt_id UUID NOT NULL REFERENCES receipt (id),
                created_at TIMESTAMPTZ DEFAULT (NOW() AT TIME ZONE 'UTC')
            )
        "#;
        self.pool.get().await?.execute(qry, &[]).await?;
        Ok(())
    }
}
