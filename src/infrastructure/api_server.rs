//! Read-only HTTP API over the catalog

use actix_web::{App, HttpResponse, HttpServer, Responder, get, middleware, web};
use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};

use crate::domain::CatalogStore;
use crate::infrastructure::config::ServerConfig;

pub const WELCOME_MESSAGE: &str = "Welcome to the Price Comparison API";

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(WELCOME_MESSAGE)
}

#[get("/products")]
async fn products(store: web::Data<dyn CatalogStore>) -> impl Responder {
    match store.list_all().await {
        Ok(products) => HttpResponse::Ok().json(products),
        Err(e) => {
            error!("Failed to list products: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "failed to read the catalog"
            }))
        }
    }
}

/// Route table, shared by the server and tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index).service(products);
}

/// Serve until the process is stopped
pub async fn serve(store: Arc<dyn CatalogStore>, config: &ServerConfig) -> anyhow::Result<()> {
    let data = web::Data::from(store);
    let address = (config.bind_address.as_str(), config.port);

    info!("Catalog API listening on http://{}:{}", config.bind_address, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(middleware::Logger::new("%r -> %s (%Dms)"))
            .configure(configure)
    })
    .bind(address)
    .with_context(|| format!("binding {}:{}", config.bind_address, config.port))?
    .run()
    .await
    .context("catalog API server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProductRecord, StoredProduct};
    use crate::infrastructure::{DatabaseConnection, SqliteCatalogStore};
    use actix_web::test;

    async fn seeded_store() -> Arc<dyn CatalogStore> {
        let db = DatabaseConnection::open("sqlite::memory:").await.unwrap();
        let store = SqliteCatalogStore::new(Arc::new(db.pool().clone()));
        store
            .upsert(&ProductRecord::new("Checkers").with_name("Bread").with_price("R15"))
            .await
            .unwrap();
        store
            .upsert(
                &ProductRecord::new("Woolworths")
                    .with_name("Milk 1L")
                    .with_image("http://x/milk.png"),
            )
            .await
            .unwrap();
        Arc::new(store)
    }

    #[actix_web::test]
    async fn test_index_greets() {
        let app = test::init_service(App::new().configure(configure)).await;
        let req = test::TestRequest::get().uri("/").to_request();

        let body = test::call_and_read_body(&app, req).await;

        assert_eq!(body, WELCOME_MESSAGE.as_bytes());
    }

    #[actix_web::test]
    async fn test_products_lists_catalog_in_insertion_order() {
        let data = web::Data::from(seeded_store().await);
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;
        let req = test::TestRequest::get().uri("/products").to_request();

        let listed: Vec<StoredProduct> = test::call_and_read_body_json(&app, req).await;

        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "Bread");
        assert_eq!(listed[0].image, None);
        assert_eq!(listed[1].source, "Woolworths");
        assert_eq!(listed[1].price, None);
    }

    #[actix_web::test]
    async fn test_products_json_shape() {
        let data = web::Data::from(seeded_store().await);
        let app = test::init_service(App::new().app_data(data).configure(configure)).await;
        let req = test::TestRequest::get().uri("/products").to_request();

        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let first = &body[0];
        for key in ["id", "image", "name", "price", "source"] {
            assert!(first.get(key).is_some(), "missing key {key}");
        }
    }
}
