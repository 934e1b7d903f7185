use super::handlers;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// `{repo}` is the percent-encoded repository URL
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/repositories",
            get(handlers::list_repositories).post(handlers::create_repository),
        )
        .route(
            "/repositories/{repo}",
            get(handlers::get_repository)
                .put(handlers::update_repository)
                .delete(handlers::delete_repository),
        )
        .route(
            "/repositories/{repo}/validate",
            post(handlers::validate_access),
        )
        .route("/repositories/{repo}/refs", get(handlers::list_refs))
        .route("/repositories/{repo}/oci-tags", get(handlers::list_oci_tags))
        .route("/repositories/{repo}/apps", get(handlers::list_apps))
        .route(
            "/repositories/{repo}/helmcharts",
            get(handlers::get_helm_charts),
        )
        .route(
            "/repositories/{repo}/appdetails",
            post(handlers::get_app_details),
        )
        .route(
            "/write-repositories",
            get(handlers::list_write_repositories).post(handlers::create_write_repository),
        )
        .route(
            "/write-repositories/{repo}",
            get(handlers::get_write_repository)
                .put(handlers::update_write_repository)
                .delete(handlers::delete_write_repository),
        )
        .route(
            "/write-repositories/{repo}/validate",
            post(handlers::validate_write_access),
        )
}
