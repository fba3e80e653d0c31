use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::directory::DirectoryService;
use crate::error::{AppError, Result};
use crate::types::{FileDescriptor, Realm, RealmDescriptor, Region};

#[derive(Debug, Deserialize)]
struct RealmStatusResponse {
    #[serde(default)]
    realms: Vec<RealmDescriptor>,
}

#[derive(Debug, Deserialize)]
struct AuctionDataResponse {
    #[serde(default)]
    files: Vec<FileDescriptor>,
}

/// Directory client for the Battle.net community API.
///
/// - realm list: `GET {base}/wow/realm/status?locale=..&apikey=..`
/// - snapshot descriptors: `GET {base}/wow/auction/data/{slug}?locale=..&apikey=..`
///
/// `{base}` is `DIRECTORY_API_URL` with `{region}` substituted. Any transport
/// error, non-2xx status or undecodable body is `DirectoryUnavailable`.
pub struct BattleNetDirectory {
    client: reqwest::Client,
    cfg: Config,
}

impl BattleNetDirectory {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.directory_timeout)
            .build()?;
        Ok(Self { client, cfg: cfg.clone() })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut query = vec![("locale", self.cfg.directory_locale.as_str())];
        if !self.cfg.directory_api_key.is_empty() {
            query.push(("apikey", self.cfg.directory_api_key.as_str()));
        }

        // Errors mention `url` only; the query string carries the API key.
        let resp = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await
            .map_err(|e| AppError::DirectoryUnavailable(format!("{url}: {}", e.without_url())))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::DirectoryUnavailable(format!("{url}: HTTP {status}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| AppError::DirectoryUnavailable(format!("{url}: bad body: {}", e.without_url())))
    }
}

#[async_trait]
impl DirectoryService for BattleNetDirectory {
    async fn realms(&self, region: Region) -> Result<Vec<RealmDescriptor>> {
        let url = format!("{}/wow/realm/status", self.cfg.directory_base_url(region));
        let body: RealmStatusResponse = self.get_json(&url).await?;
        debug!(region = %region, realms = body.realms.len(), "Realm list fetched");
        Ok(body.realms)
    }

    async fn auction_files(&self, realm: &Realm) -> Result<Vec<FileDescriptor>> {
        let url = format!(
            "{}/wow/auction/data/{}",
            self.cfg.directory_base_url(realm.region),
            realm.slug
        );
        let body: AuctionDataResponse = self.get_json(&url).await?;
        Ok(body.files)
    }
}
