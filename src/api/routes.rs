use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{AuctionRow, StatusCountRow};
use crate::db::Store;
use crate::error::AppError;
use crate::types::{AuctionFile, Realm, Region};

const DEFAULT_FILE_LIMIT: i64 = 50;
const MAX_FILE_LIMIT: i64 = 500;
const DEFAULT_AUCTION_LIMIT: i64 = 100;
const MAX_AUCTION_LIMIT: i64 = 5_000;

#[derive(Clone)]
pub struct ApiState {
    pub store: Store,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/realms", get(get_realms))
        .route("/realms/:id/files", get(get_realm_files))
        .route("/realms/:id/auctions", get(get_realm_auctions))
        .route("/stats/summary", get(get_stats_summary))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RealmsQuery {
    pub region: Option<String>,
}

#[derive(Deserialize)]
pub struct FilesQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct AuctionsQuery {
    pub item: Option<i64>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub realms: i64,
    pub files_by_status: Vec<StatusCountRow>,
    pub auctions: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    state.store.ping().await?;
    Ok(Json(HealthResponse { status: "ok" }))
}

async fn get_realms(
    State(state): State<ApiState>,
    Query(params): Query<RealmsQuery>,
) -> Result<Json<Vec<Realm>>, AppError> {
    let realms = match params.region.as_deref() {
        Some(raw) => state.store.list_realms_in(raw.parse::<Region>()?).await?,
        None => state.store.list_realms().await?,
    };
    Ok(Json(realms))
}

async fn get_realm_files(
    State(state): State<ApiState>,
    Path(realm_id): Path<i64>,
    Query(params): Query<FilesQuery>,
) -> Result<Json<Vec<AuctionFile>>, AppError> {
    let realm = state.store.find_realm(realm_id).await?;
    let limit = params.limit.unwrap_or(DEFAULT_FILE_LIMIT).clamp(1, MAX_FILE_LIMIT);
    let files = state.store.list_files_for_realm(realm.id, limit).await?;
    Ok(Json(files))
}

async fn get_realm_auctions(
    State(state): State<ApiState>,
    Path(realm_id): Path<i64>,
    Query(params): Query<AuctionsQuery>,
) -> Result<Json<Vec<AuctionRow>>, AppError> {
    let realm = state.store.find_realm(realm_id).await?;
    let limit = params.limit.unwrap_or(DEFAULT_AUCTION_LIMIT).clamp(1, MAX_AUCTION_LIMIT);
    let rows = state
        .store
        .latest_auctions_for_realm(realm.id, params.item, limit)
        .await?;
    Ok(Json(rows))
}

async fn get_stats_summary(
    State(state): State<ApiState>,
) -> Result<Json<SummaryResponse>, AppError> {
    Ok(Json(SummaryResponse {
        realms: state.store.count_realms().await?,
        files_by_status: state.store.file_status_counts().await?,
        auctions: state.store.count_records().await?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_store;
    use crate::testing::serve;
    use crate::types::{AuctionRecord, FileDescriptor, FileStatus, RealmDescriptor, TimeLeft};
    use serde_json::Value;
    use tempfile::TempDir;

    /// One EU realm with one processed file holding items 25 and 82800.
    async fn seeded() -> (TempDir, Store, Realm, String) {
        let (dir, store) = temp_store().await;
        let desc = RealmDescriptor { name: "Hellscream".into(), slug: "hellscream".into() };
        let (realm, _) = store.upsert_realm(Region::Eu, &desc).await.unwrap();
        let us = RealmDescriptor { name: "Stormrage".into(), slug: "stormrage".into() };
        store.upsert_realm(Region::Us, &us).await.unwrap();

        let file = store
            .create_auction_file(
                realm.id,
                &FileDescriptor { url: "http://snap".into(), last_modified: 1 },
                "eu-hellscream-1.json",
                FileStatus::Downloaded,
            )
            .await
            .unwrap()
            .unwrap();
        let records: Vec<_> = [25, 82_800]
            .into_iter()
            .map(|item_id| AuctionRecord {
                auction_id: Some(item_id + 1),
                item_id,
                owner: Some("Jaina".into()),
                owner_realm: None,
                quantity: 1,
                bid: 10,
                buyout: 20,
                time_left: TimeLeft::Medium,
                auction_file_id: file.id,
                realm_id: realm.id,
            })
            .collect();
        assert!(store.claim_for_processing(file.id).await.unwrap());
        assert!(store.commit_records(file.id, &records).await.unwrap());

        let base = serve(router(ApiState { store: store.clone() })).await;
        (dir, store, realm, base)
    }

    async fn get(url: String) -> (u16, Value) {
        let resp = reqwest::get(url).await.unwrap();
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (_dir, _store, _realm, base) = seeded().await;
        let (status, body) = get(format!("{base}/health")).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn realms_filter_by_region() {
        let (_dir, _store, _realm, base) = seeded().await;
        let (_, all) = get(format!("{base}/realms")).await;
        assert_eq!(all.as_array().unwrap().len(), 2);

        let (_, eu) = get(format!("{base}/realms?region=EU")).await;
        assert_eq!(eu.as_array().unwrap().len(), 1);
        assert_eq!(eu[0]["slug"], "hellscream");

        let (status, _) = get(format!("{base}/realms?region=atlantis")).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn files_and_auctions_of_a_realm() {
        let (_dir, _store, realm, base) = seeded().await;

        let (_, files) = get(format!("{base}/realms/{}/files", realm.id)).await;
        assert_eq!(files[0]["status"], "processed");

        let (_, auctions) = get(format!("{base}/realms/{}/auctions", realm.id)).await;
        assert_eq!(auctions.as_array().unwrap().len(), 2);

        let (_, one) = get(format!("{base}/realms/{}/auctions?item=82800", realm.id)).await;
        assert_eq!(one.as_array().unwrap().len(), 1);
        assert_eq!(one[0]["time_left"], "medium");
    }

    #[tokio::test]
    async fn unknown_realm_is_404() {
        let (_dir, _store, _realm, base) = seeded().await;
        let (status, _) = get(format!("{base}/realms/999/files")).await;
        assert_eq!(status, 404);
    }

    #[tokio::test]
    async fn summary_counts_everything() {
        let (_dir, _store, _realm, base) = seeded().await;
        let (_, body) = get(format!("{base}/stats/summary")).await;
        assert_eq!(body["realms"], 2);
        assert_eq!(body["auctions"], 2);
        assert_eq!(body["files_by_status"][0]["status"], "processed");
        assert_eq!(body["files_by_status"][0]["files"], 1);
    }
}
