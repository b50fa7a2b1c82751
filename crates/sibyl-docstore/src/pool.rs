//! Connection pool construction, mirroring the teacher's preference for a
//! single shared pool handle over ad-hoc connections per call.

use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::errors::DocStoreError;

pub fn build_pool(database_url: &str) -> Result<Pool, DocStoreError> {
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| DocStoreError::Pool(e.to_string()))?;

    let mut cfg = PoolConfig::new();
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let mgr = deadpool_postgres::Manager::from_config(
        pg_config,
        NoTls,
        cfg.manager.clone().unwrap_or_default(),
    );
    Pool::builder(mgr)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| DocStoreError::Pool(e.to_string()))
}
