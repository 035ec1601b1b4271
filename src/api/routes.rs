// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (no auth required)
        .route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        // API v1 routes (all require authentication)
        .service(
            web::scope("/api/v1")
                // Refresh control
                .route("/refresh", web::post().to(handlers::trigger_refresh))
                .route("/refresh/status", web::get().to(handlers::refresh_status))
                // Conversion queries
                .route("/convert", web::get().to(handlers::convert))
                .route(
                    "/convert/{sku}/breakdown",
                    web::get().to(handlers::unit_breakdown),
                )
                // Rule testing
                .route("/resolve/test", web::post().to(handlers::resolve_test))
                // Mapping rule management
                .route("/rules", web::get().to(handlers::list_rules))
                .route("/rules", web::post().to(handlers::create_rule))
                .route("/rules/{id}", web::put().to(handlers::update_rule))
                .route("/rules/{id}", web::delete().to(handlers::delete_rule))
                // Catalog management
                .route("/products", web::get().to(handlers::list_products))
                .route("/products", web::post().to(handlers::upsert_product))
                .route("/products/{sku}", web::put().to(handlers::update_product))
                .route(
                    "/products/{sku}",
                    web::delete().to(handlers::delete_product),
                )
                // Reporting
                .route("/facts/summary", web::get().to(handlers::facts_summary)),
        );
}
