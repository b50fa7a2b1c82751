//! Embedded migrations, run once at process startup against a fresh pool
//! connection (mirrors the teacher's one-shot `build.rs`/init pattern:
//! idempotent, safe to re-run on every boot).

use deadpool_postgres::Pool;

use crate::errors::DocStoreError;

mod embedded {
    refinery::embed_migrations!("src/migrations");
}

pub async fn run_migrations(pool: &Pool) -> Result<(), DocStoreError> {
    let mut client = pool.get().await.map_err(|e| DocStoreError::Pool(e.to_string()))?;
    embedded::migrations::runner()
        .run_async(&mut *client)
        .await
        .map_err(|e| DocStoreError::Migration(e.to_string()))?;
    Ok(())
}
