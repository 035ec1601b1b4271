// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::catalog::model::{MappingRule, PatternType};
use crate::catalog::pg::PgCatalogStore;
use crate::catalog::store::CatalogSource;
use crate::conversion::converter::{ConversionError, Converter, PackagingUnit};
use crate::facts::aggregator::RefreshError;
use crate::facts::snapshot::GroupBy;
use crate::orchestrator::RefreshPipeline;
use crate::resolution::resolver::{ResolveError, Resolver};
use actix_web::{web, HttpResponse, Result};
use std::time::SystemTime;

fn catalog_store(pipeline: &RefreshPipeline) -> PgCatalogStore {
    PgCatalogStore::new(pipeline.db.clone())
}

fn conversion_error(e: &ConversionError) -> HttpResponse {
    let (status, code) = match e {
        ConversionError::ProductNotFound { .. } => {
            (actix_web::http::StatusCode::NOT_FOUND, "product_not_found")
        }
        ConversionError::Undefined { .. } => (
            actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
            "conversion_undefined",
        ),
        ConversionError::InvalidQuantity { .. } => {
            (actix_web::http::StatusCode::BAD_REQUEST, "invalid_quantity")
        }
        ConversionError::InvalidUnit { .. } => {
            (actix_web::http::StatusCode::BAD_REQUEST, "invalid_unit")
        }
        ConversionError::Overflow { .. } => (
            actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
            "quantity_overflow",
        ),
    };
    HttpResponse::build(status).json(ApiResponse::<()>::error(code, e.to_string()))
}

fn store_error(e: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::InternalServerError()
        .json(ApiResponse::<()>::error("backend_error", e.to_string()))
}

/// Health check endpoint
pub async fn health_check(pipeline: web::Data<RefreshPipeline>) -> Result<HttpResponse> {
    let db_status = match sqlx::query_scalar::<_, bool>("SELECT true")
        .fetch_one(&pipeline.db.pool)
        .await
    {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let uptime = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
        uptime_seconds: uptime,
    });

    Ok(HttpResponse::Ok().json(response))
}

/// Trigger a full fact refresh. Rejected while another refresh holds the gate.
pub async fn trigger_refresh(
    payload: Option<web::Json<RefreshTriggerRequest>>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let dry_run = payload.map(|p| p.dry_run).unwrap_or(false);
    tracing::info!(dry_run, "refresh trigger requested");

    match pipeline.run_once(dry_run).await {
        Ok(summary) => {
            let response = ApiResponse::success(RefreshResultResponse {
                row_count: summary.row_count,
                unmapped_count: summary.unmapped_count,
                warning_count: summary.warnings.len(),
                duration_seconds: summary.duration_seconds,
                timestamp: summary.timestamp,
                dry_run,
            });
            Ok(HttpResponse::Ok().json(response))
        }
        Err(RefreshError::InProgress) => Ok(HttpResponse::Conflict().json(
            ApiResponse::<()>::error("refresh_in_progress", RefreshError::InProgress.to_string()),
        )),
        Err(e @ RefreshError::Cancelled) => Ok(HttpResponse::Conflict()
            .json(ApiResponse::<()>::error("refresh_cancelled", e.to_string()))),
        Err(e) => Ok(HttpResponse::InternalServerError()
            .json(ApiResponse::<()>::error("refresh_failed", e.to_string()))),
    }
}

/// Read-only refresh/snapshot status
pub async fn refresh_status(pipeline: web::Data<RefreshPipeline>) -> Result<HttpResponse> {
    let state = pipeline.aggregator.state();
    let snapshot = pipeline.aggregator.store().load();

    let response = match snapshot {
        Some(snap) => {
            let range = snap.order_date_range();
            RefreshStatusResponse {
                state: state.as_str().to_string(),
                populated: true,
                row_count: snap.row_count(),
                unmapped_count: snap.unmapped_count(),
                total_revenue_minor: snap.total_revenue_minor(),
                order_date_from: range.map(|(from, _)| from),
                order_date_to: range.map(|(_, to)| to),
                distinct_channels: snap.distinct_channel_count(),
                generated_at: Some(snap.generated_at()),
            }
        }
        None => RefreshStatusResponse {
            state: state.as_str().to_string(),
            populated: false,
            row_count: 0,
            unmapped_count: 0,
            total_revenue_minor: 0,
            order_date_from: None,
            order_date_to: None,
            distinct_channels: 0,
            generated_at: None,
        },
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

/// Convert a quantity between packaging tiers for one SKU.
pub async fn convert(
    query: web::Query<ConvertQuery>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let from = match PackagingUnit::parse(&query.from) {
        Ok(u) => u,
        Err(e) => return Ok(conversion_error(&e)),
    };
    let to = match PackagingUnit::parse(&query.to) {
        Ok(u) => u,
        Err(e) => return Ok(conversion_error(&e)),
    };

    let snapshot = pipeline.catalog.current();
    let converter = Converter::new(&snapshot);
    let canonical_units = match converter.to_units(&query.sku, query.quantity, from) {
        Ok(u) => u,
        Err(e) => return Ok(conversion_error(&e)),
    };
    match converter.convert(&query.sku, query.quantity, from, to) {
        Ok(result) => Ok(HttpResponse::Ok().json(ApiResponse::success(ConvertResponse {
            sku: query.sku.clone(),
            quantity: query.quantity,
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
            result,
            canonical_units,
        }))),
        Err(e) => Ok(conversion_error(&e)),
    }
}

/// Per-tier breakdown of a canonical unit total for one SKU.
pub async fn unit_breakdown(
    path: web::Path<String>,
    query: web::Query<BreakdownQuery>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let sku = path.into_inner();
    let snapshot = pipeline.catalog.current();
    let converter = Converter::new(&snapshot);
    match converter.unit_breakdown(&sku, query.units) {
        Ok(breakdown) => Ok(HttpResponse::Ok()
            .json(ApiResponse::success(BreakdownResponse { sku, breakdown }))),
        Err(e) => Ok(conversion_error(&e)),
    }
}

/// Admin rule testing: resolution outcome plus every rule that matched and
/// near-miss suggestions.
pub async fn resolve_test(
    payload: web::Json<ResolveTestRequest>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let snapshot = pipeline.catalog.current();
    let resolver = Resolver::new(&snapshot);
    match resolver.explain(&payload.external_sku) {
        Ok(report) => Ok(HttpResponse::Ok().json(ApiResponse::success(report))),
        Err(e @ ResolveError::EmptySku) => Ok(HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("empty_sku", e.to_string()))),
    }
}

/// List active mapping rules in precedence order.
pub async fn list_rules(pipeline: web::Data<RefreshPipeline>) -> Result<HttpResponse> {
    let store = catalog_store(&pipeline);
    match store.list_active_rules().await {
        Ok(rules) => Ok(HttpResponse::Ok().json(ApiResponse::success(rules))),
        Err(e) => Ok(store_error(e)),
    }
}

pub async fn create_rule(
    payload: web::Json<RulePayload>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let pattern_type = match payload.pattern_type.parse::<PatternType>() {
        Ok(pt) => pt,
        Err(e) => {
            return Ok(HttpResponse::BadRequest()
                .json(ApiResponse::<()>::error("invalid_pattern_type", e)))
        }
    };
    let mut rule = MappingRule {
        id: 0,
        source_pattern: payload.source_pattern.clone(),
        pattern_type,
        target_sku: payload.target_sku.clone(),
        quantity_multiplier: payload.quantity_multiplier,
        confidence: payload.confidence,
        priority: payload.priority,
        is_active: payload.is_active,
    };
    let store = catalog_store(&pipeline);
    match store.insert_rule(&rule).await {
        Ok(id) => {
            rule.id = id;
            Ok(HttpResponse::Created().json(ApiResponse::success(rule)))
        }
        Err(e) => Ok(store_error(e)),
    }
}

pub async fn update_rule(
    path: web::Path<i64>,
    payload: web::Json<RulePayload>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let pattern_type = match payload.pattern_type.parse::<PatternType>() {
        Ok(pt) => pt,
        Err(e) => {
            return Ok(HttpResponse::BadRequest()
                .json(ApiResponse::<()>::error("invalid_pattern_type", e)))
        }
    };
    let rule = MappingRule {
        id,
        source_pattern: payload.source_pattern.clone(),
        pattern_type,
        target_sku: payload.target_sku.clone(),
        quantity_multiplier: payload.quantity_multiplier,
        confidence: payload.confidence,
        priority: payload.priority,
        is_active: payload.is_active,
    };
    let store = catalog_store(&pipeline);
    match store.update_rule(&rule).await {
        Ok(true) => Ok(HttpResponse::Ok().json(ApiResponse::success(rule))),
        Ok(false) => Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
            "rule_not_found",
            format!("no mapping rule with id {id}"),
        ))),
        Err(e) => Ok(store_error(e)),
    }
}

/// Soft delete: the rule row survives for audit, resolution stops using it.
pub async fn delete_rule(
    path: web::Path<i64>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let store = catalog_store(&pipeline);
    match store.deactivate_rule(id).await {
        Ok(true) => Ok(HttpResponse::Ok().json(ApiResponse::success(
            serde_json::json!({"id": id, "is_active": false}),
        ))),
        Ok(false) => Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
            "rule_not_found",
            format!("no mapping rule with id {id}"),
        ))),
        Err(e) => Ok(store_error(e)),
    }
}

pub async fn list_products(pipeline: web::Data<RefreshPipeline>) -> Result<HttpResponse> {
    let store = catalog_store(&pipeline);
    match store.list_active_products().await {
        Ok(products) => Ok(HttpResponse::Ok().json(ApiResponse::success(products))),
        Err(e) => Ok(store_error(e)),
    }
}

pub async fn upsert_product(
    payload: web::Json<ProductPayload>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let product = payload.into_inner();
    if let Err(e) = product.validate_hierarchy() {
        return Ok(HttpResponse::UnprocessableEntity()
            .json(ApiResponse::<()>::error("invalid_hierarchy", e.to_string())));
    }
    let store = catalog_store(&pipeline);
    match store.upsert_product(&product).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(product))),
        Err(e) => Ok(store_error(e)),
    }
}

pub async fn update_product(
    path: web::Path<String>,
    payload: web::Json<ProductPayload>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let sku = path.into_inner();
    let mut product = payload.into_inner();
    product.sku = sku;
    if let Err(e) = product.validate_hierarchy() {
        return Ok(HttpResponse::UnprocessableEntity()
            .json(ApiResponse::<()>::error("invalid_hierarchy", e.to_string())));
    }
    let store = catalog_store(&pipeline);
    match store.upsert_product(&product).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success(product))),
        Err(e) => Ok(store_error(e)),
    }
}

pub async fn delete_product(
    path: web::Path<String>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let sku = path.into_inner();
    let store = catalog_store(&pipeline);
    match store.deactivate_product(&sku).await {
        Ok(true) => Ok(HttpResponse::Ok().json(ApiResponse::success(
            serde_json::json!({"sku": sku, "is_active": false}),
        ))),
        Ok(false) => Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
            "product_not_found",
            format!("no catalog product with sku {sku}"),
        ))),
        Err(e) => Ok(store_error(e)),
    }
}

/// Grouped totals off the current fact snapshot.
pub async fn facts_summary(
    query: web::Query<SummaryQuery>,
    pipeline: web::Data<RefreshPipeline>,
) -> Result<HttpResponse> {
    let group_by = match query.group_by.parse::<GroupBy>() {
        Ok(g) => g,
        Err(e) => {
            return Ok(
                HttpResponse::BadRequest().json(ApiResponse::<()>::error("invalid_group_by", e))
            )
        }
    };
    let Some(snapshot) = pipeline.aggregator.store().load() else {
        return Ok(HttpResponse::Conflict().json(ApiResponse::<()>::error(
            "facts_not_populated",
            "no fact snapshot yet; trigger a refresh first",
        )));
    };
    let groups = snapshot.summary_by(group_by);
    Ok(HttpResponse::Ok().json(ApiResponse::success(SummaryResponse {
        group_by: query.group_by.clone(),
        groups,
        total_revenue_minor: snapshot.total_revenue_minor(),
    })))
}
