use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use collections_core::{Collection, CollectionId, Company, CompanyId, ErrorKind};
use collections_storage::{AssociationError, CollectionError, CompanyError};

use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;
use crate::telemetry;

const DEFAULT_PAGE_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl PageQuery {
    fn resolve(&self) -> Result<(i64, u32), ProblemResponse> {
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if offset < 0 {
            return Err(ProblemResponse::from_kind(
                ErrorKind::InvalidArgument,
                "invalid_pagination",
                "offset must be a non-negative integer",
            ));
        }
        let limit = u32::try_from(limit)
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| {
                ProblemResponse::from_kind(
                    ErrorKind::InvalidArgument,
                    "invalid_pagination",
                    "limit must be a positive integer",
                )
            })?;
        Ok((offset, limit))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub id: CollectionId,
    pub collection_name: String,
    pub companies: Vec<Company>,
    pub total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompanyBatchResponse {
    pub companies: Vec<Company>,
    pub total: u64,
}

#[derive(Debug, Deserialize)]
pub struct AddCompaniesRequest {
    pub collection_id: CollectionId,
    pub company_ids: Vec<CompanyId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddCompaniesResponse {
    pub message: String,
    pub collection_id: CollectionId,
    pub added_count: u64,
}

pub async fn list_collections(
    State(state): State<AppState>,
) -> Result<Json<Vec<Collection>>, ProblemResponse> {
    let collections = state
        .storage()
        .collections()
        .list()
        .await
        .map_err(collection_problem)?;
    Ok(Json(collections))
}

pub async fn get_collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<CollectionResponse>, ProblemResponse> {
    let collection_id = parse_collection_id(&collection_id)?;
    let (offset, limit) = page.resolve()?;

    let repo = state.storage().collections();
    let collection = repo.fetch(&collection_id).await.map_err(collection_problem)?;
    let page = repo
        .list_companies(&collection_id, offset, limit)
        .await
        .map_err(collection_problem)?;

    Ok(Json(CollectionResponse {
        id: collection.id,
        collection_name: collection.collection_name,
        companies: page.companies,
        total: page.total,
    }))
}

pub async fn list_companies(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<CompanyBatchResponse>, ProblemResponse> {
    let (offset, limit) = page.resolve()?;
    let page = state
        .storage()
        .companies()
        .list(offset, limit)
        .await
        .map_err(company_problem)?;
    Ok(Json(CompanyBatchResponse {
        companies: page.companies,
        total: page.total,
    }))
}

/// Adds companies to a collection in one transaction, skipping existing members.
pub async fn add_companies_to_collection(
    State(state): State<AppState>,
    Json(request): Json<AddCompaniesRequest>,
) -> Result<Json<AddCompaniesResponse>, ProblemResponse> {
    let storage = state.storage();
    storage
        .collections()
        .fetch(&request.collection_id)
        .await
        .map_err(collection_problem)?;

    let missing = storage
        .companies()
        .find_missing(&request.company_ids)
        .await
        .map_err(company_problem)?;
    if !missing.is_empty() {
        telemetry::record_api_request("add_companies", "not_found");
        return Err(ProblemResponse::from_kind(
            ErrorKind::NotFound,
            "company_not_found",
            format!("One or more companies not found: {missing:?}"),
        ));
    }

    let associations = storage.associations();
    let mut tx = associations.begin().await.map_err(|err| {
        error!(stage = "collections", error = %err, "failed to begin transaction");
        internal_error("failed to add companies")
    })?;
    let added_count = associations
        .insert_ignoring_duplicates(&mut tx, &request.collection_id, &request.company_ids, state.now())
        .await
        .map_err(association_problem)?;
    tx.commit().await.map_err(|err| {
        error!(stage = "collections", error = %err, "failed to commit added companies");
        internal_error("failed to add companies")
    })?;

    telemetry::record_api_request("add_companies", "ok");
    info!(
        stage = "collections",
        collection = %request.collection_id,
        added = added_count,
        "companies added to collection"
    );
    Ok(Json(AddCompaniesResponse {
        message: format!("Successfully added {added_count} companies to collection"),
        collection_id: request.collection_id,
        added_count,
    }))
}

pub(crate) fn parse_collection_id(raw: &str) -> Result<CollectionId, ProblemResponse> {
    raw.parse().map_err(|_| {
        ProblemResponse::from_kind(
            ErrorKind::InvalidArgument,
            "invalid_collection_id",
            format!("{raw:?} is not a valid collection id"),
        )
    })
}

fn collection_problem(err: CollectionError) -> ProblemResponse {
    match err {
        CollectionError::NotFound(id) => ProblemResponse::from_kind(
            ErrorKind::NotFound,
            "collection_not_found",
            format!("collection {id} not found"),
        ),
        other => {
            error!(stage = "collections", error = %other, "collection query failed");
            internal_error("failed to load collection")
        }
    }
}

fn company_problem(err: CompanyError) -> ProblemResponse {
    error!(stage = "collections", error = %err, "company query failed");
    internal_error("failed to load companies")
}

fn association_problem(err: AssociationError) -> ProblemResponse {
    match err {
        AssociationError::MissingCollection(id) => ProblemResponse::from_kind(
            ErrorKind::NotFound,
            "collection_not_found",
            format!("collection {id} not found"),
        ),
        AssociationError::MissingCompanies(missing) => ProblemResponse::from_kind(
            ErrorKind::NotFound,
            "company_not_found",
            format!("One or more companies not found: {missing:?}"),
        ),
        other => {
            error!(stage = "collections", error = %other, "association write failed");
            internal_error("failed to add companies")
        }
    }
}
