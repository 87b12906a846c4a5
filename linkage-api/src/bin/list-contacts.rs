//! Dump every stored contact as pretty-printed JSON.
//!
//! Reads the same `LINKAGE_STORE` / `LINKAGE_DB_*` settings as the server.
//! Against the in-memory backend this always prints an empty listing.
//!
//! Usage:
//!   cargo run -p linkage-api --bin list-contacts

use linkage_api::{
    ApiConfig, ApiResult, DbConfig, ListContactsResponse, PgContactStore, StoreBackend,
};
use linkage_storage::{ContactStore, InMemoryContactStore};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let api_config = ApiConfig::from_env()?;

    let contacts = match api_config.store_backend {
        StoreBackend::Postgres => {
            let store = PgContactStore::from_config(&DbConfig::from_env())?;
            store.list_all().await?
        }
        StoreBackend::Memory => InMemoryContactStore::new().list_all().await?,
    };

    if contacts.is_empty() {
        println!("No contacts found.");
        return Ok(());
    }

    let listing = ListContactsResponse::from(contacts);
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}
