use mongodb::{Client, Database};
use tracing::{info, warn};

pub async fn get_db_client(database_url: &str) -> Database {
    let client = Client::with_uri_str(database_url)
        .await
        .expect("Failed to connect to MongoDB");

    let db_name = "parcellink";
    let db = client.database(db_name);

    match db.list_collection_names().await {
        Ok(collections) => {
            info!("Connected to database: {}", db_name);
            if !collections.contains(&"payment_transactions".to_string()) {
                info!("'payment_transactions' collection will be created on first write");
            }
        }
        Err(e) => {
            warn!("Database '{}' may not exist or is inaccessible: {}", db_name, e);
        }
    }

    db
}
