use super::models::{
    RepoAccessQuery, RepoAppDetailsQuery, RepoAppsQuery, RepoCreateRequest, RepoQuery,
    RepoResponse, RepoUpdateRequest, Repository, RepositoryList, RepositorySummary,
    RepositoryView, UpsertParams,
};
use crate::auth::Principal;
use crate::db::RepoScope;
use crate::error::ServerError;
use crate::reposerver::models::{AppList, HelmCharts, Refs, RepoAppDetails};
use crate::state::AppState;
use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};

fn with_repo(mut query: RepoQuery, repo: String) -> RepoQuery {
    query.repo = repo;
    query
}

async fn list(
    state: AppState,
    principal: Principal,
    scope: RepoScope,
    query: RepoQuery,
) -> Result<Json<RepositoryList>, ServerError> {
    let list = state.repositories.list(&principal, scope, &query).await?;
    Ok(Json(list))
}

async fn get(
    state: AppState,
    principal: Principal,
    scope: RepoScope,
    query: RepoQuery,
) -> Result<Json<RepositoryView>, ServerError> {
    let repo = state.repositories.get(&principal, scope, &query).await?;
    Ok(Json(repo))
}

async fn create(
    state: AppState,
    principal: Principal,
    scope: RepoScope,
    params: UpsertParams,
    repo: Repository,
) -> Result<Json<RepositorySummary>, ServerError> {
    let request = RepoCreateRequest {
        repo: Some(repo),
        upsert: params.upsert,
    };
    let summary = state.repositories.create(&principal, scope, request).await?;
    Ok(Json(summary))
}

async fn update(
    state: AppState,
    principal: Principal,
    scope: RepoScope,
    url: String,
    mut repo: Repository,
) -> Result<Json<RepositorySummary>, ServerError> {
    repo.repo = url;
    let request = RepoUpdateRequest { repo: Some(repo) };
    let summary = state.repositories.update(&principal, scope, request).await?;
    Ok(Json(summary))
}

async fn delete(
    state: AppState,
    principal: Principal,
    scope: RepoScope,
    query: RepoQuery,
) -> Result<Json<RepoResponse>, ServerError> {
    let response = state.repositories.delete(&principal, scope, &query).await?;
    Ok(Json(response))
}

async fn validate(
    state: AppState,
    principal: Principal,
    scope: RepoScope,
    url: String,
    mut query: RepoAccessQuery,
) -> Result<Json<RepoResponse>, ServerError> {
    query.repo = url;
    let response = state
        .repositories
        .validate_access(&principal, scope, query)
        .await?;
    Ok(Json(response))
}

pub async fn list_repositories(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<RepositoryList>, ServerError> {
    list(state, principal, RepoScope::Read, query).await
}

pub async fn list_write_repositories(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<RepositoryList>, ServerError> {
    list(state, principal, RepoScope::Write, query).await
}

pub async fn get_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(repo): Path<String>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<RepositoryView>, ServerError> {
    get(state, principal, RepoScope::Read, with_repo(query, repo)).await
}

pub async fn get_write_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(repo): Path<String>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<RepositoryView>, ServerError> {
    get(state, principal, RepoScope::Write, with_repo(query, repo)).await
}

pub async fn create_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<UpsertParams>,
    Json(repo): Json<Repository>,
) -> Result<Json<RepositorySummary>, ServerError> {
    create(state, principal, RepoScope::Read, params, repo).await
}

pub async fn create_write_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<UpsertParams>,
    Json(repo): Json<Repository>,
) -> Result<Json<RepositorySummary>, ServerError> {
    create(state, principal, RepoScope::Write, params, repo).await
}

pub async fn update_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(url): Path<String>,
    Json(repo): Json<Repository>,
) -> Result<Json<RepositorySummary>, ServerError> {
    update(state, principal, RepoScope::Read, url, repo).await
}

pub async fn update_write_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(url): Path<String>,
    Json(repo): Json<Repository>,
) -> Result<Json<RepositorySummary>, ServerError> {
    update(state, principal, RepoScope::Write, url, repo).await
}

pub async fn delete_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(repo): Path<String>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<RepoResponse>, ServerError> {
    delete(state, principal, RepoScope::Read, with_repo(query, repo)).await
}

pub async fn delete_write_repository(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(repo): Path<String>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<RepoResponse>, ServerError> {
    delete(state, principal, RepoScope::Write, with_repo(query, repo)).await
}

/// Credentials travel in the body, never in the query string
pub async fn validate_access(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(url): Path<String>,
    Json(query): Json<RepoAccessQuery>,
) -> Result<Json<RepoResponse>, ServerError> {
    validate(state, principal, RepoScope::Read, url, query).await
}

pub async fn validate_write_access(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(url): Path<String>,
    Json(query): Json<RepoAccessQuery>,
) -> Result<Json<RepoResponse>, ServerError> {
    validate(state, principal, RepoScope::Write, url, query).await
}

pub async fn list_refs(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(repo): Path<String>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<Refs>, ServerError> {
    let refs = state
        .repositories
        .list_refs(&principal, &with_repo(query, repo))
        .await?;
    Ok(Json(refs))
}

pub async fn list_oci_tags(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(repo): Path<String>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<Refs>, ServerError> {
    let refs = state
        .repositories
        .list_oci_tags(&principal, &with_repo(query, repo))
        .await?;
    Ok(Json(refs))
}

pub async fn get_helm_charts(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(repo): Path<String>,
    Query(query): Query<RepoQuery>,
) -> Result<Json<HelmCharts>, ServerError> {
    let charts = state
        .repositories
        .get_helm_charts(&principal, &with_repo(query, repo))
        .await?;
    Ok(Json(charts))
}

pub async fn list_apps(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(repo): Path<String>,
    Query(mut query): Query<RepoAppsQuery>,
) -> Result<Json<AppList>, ServerError> {
    query.repo = repo;
    let apps = state.repositories.list_apps(&principal, &query).await?;
    Ok(Json(apps))
}

/// The path names the source's repository; the source in the body is authoritative
pub async fn get_app_details(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(query): Json<RepoAppDetailsQuery>,
) -> Result<Json<RepoAppDetails>, ServerError> {
    let details = state
        .repositories
        .get_app_details(&principal, query)
        .await?;
    Ok(Json(details))
}
