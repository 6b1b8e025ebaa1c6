//! Route definitions for the seed warehouse API

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes; everything under `/api/v1` requires a bearer token
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/stock", stock_routes())
        .nest("/history", history_routes())
        .route("/photos/:photo_id/content", get(handlers::photo_content))
        .nest("/empenho", empenho_routes())
        .nest("/warehouse", warehouse_routes())
        .route("/address/:address/stock", get(handlers::address_stock))
        .nest("/taxonomy", taxonomy_routes())
        .nest("/products", product_routes())
        .route(
            "/configuration",
            get(handlers::get_configuration).put(handlers::update_configuration),
        )
        .route("/profile/me", get(handlers::get_profile))
        .route(
            "/profile/me/password-changed",
            post(handlers::password_changed),
        )
        .route("/audit", get(handlers::run_audit))
        .route("/dashboard", get(handlers::get_dashboard))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Lot ledger routes
fn stock_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_stock))
        .route("/entry", post(handlers::create_entry))
        .route("/lookup", get(handlers::lookup_lot))
        .route("/:stock_id", get(handlers::get_stock))
        .route("/:stock_id/balance", get(handlers::get_balance))
        .route("/:stock_id/transfer", post(handlers::transfer_stock))
        .route("/:stock_id/exit", post(handlers::register_exit))
        .route("/:stock_id/edit", post(handlers::edit_stock))
        .route("/:stock_id/delete", post(handlers::delete_stock))
        .route("/:stock_id/history", get(handlers::stock_history))
}

/// Movement history and photo routes
fn history_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::history_page))
        .route(
            "/:history_id/photos",
            get(handlers::list_photos).post(handlers::attach_photo),
        )
}

/// Empenho routes
fn empenho_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_empenhos).post(handlers::create_empenho),
        )
        .route(
            "/:empenho_id",
            get(handlers::get_empenho).put(handlers::update_header),
        )
        .route("/:empenho_id/items", post(handlers::add_item))
        .route(
            "/:empenho_id/items/:item_id",
            put(handlers::edit_item).delete(handlers::remove_item),
        )
        .route("/:empenho_id/confirm", post(handlers::confirm_empenho))
        .route("/:empenho_id/execute", post(handlers::execute_empenho))
        .route("/:empenho_id/cancel", post(handlers::cancel_empenho))
}

/// Warehouse layout routes
fn warehouse_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_warehouses).post(handlers::create_warehouse),
        )
        .route("/auto-create", post(handlers::auto_create_warehouses))
        .route("/import", post(handlers::import_map))
        .route(
            "/:number",
            get(handlers::get_warehouse).put(handlers::update_warehouse),
        )
        .route(
            "/:number/elements",
            get(handlers::list_elements).post(handlers::save_elements),
        )
        .route("/:number/export", get(handlers::export_map))
        .route("/:number/occupancy", get(handlers::warehouse_occupancy))
}

/// Taxonomy routes, one contract for the five kinds
fn taxonomy_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:kind",
            get(handlers::list_taxonomy).post(handlers::create_taxonomy),
        )
        .route(
            "/:kind/:id",
            put(handlers::rename_taxonomy).delete(handlers::delete_taxonomy),
        )
}

/// Product routes
fn product_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_products).post(handlers::create_product),
        )
        .route(
            "/:product_id",
            get(handlers::get_product).put(handlers::update_product),
        )
        .route("/:product_id/active", post(handlers::set_product_active))
}
