//! Realm directory: the typed registry of known realms and their folders.

use std::path::Path;

use crate::db::models::{RealmFolderRow, RealmRow};
use crate::db::{unix_now, Store};
use crate::error::{AppError, Result};
use crate::types::{FolderKind, Realm, RealmDescriptor, RealmFolder, Region};

impl Store {
    pub async fn list_realms(&self) -> Result<Vec<Realm>> {
        let rows = sqlx::query_as::<_, RealmRow>(
            "SELECT id, name, slug, region FROM realms ORDER BY region, name",
        )
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Realm::try_from).collect()
    }

    pub async fn list_realms_in(&self, region: Region) -> Result<Vec<Realm>> {
        let rows = sqlx::query_as::<_, RealmRow>(
            "SELECT id, name, slug, region FROM realms WHERE region = ? ORDER BY name",
        )
        .bind(region.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(Realm::try_from).collect()
    }

    pub async fn find_realm(&self, realm_id: i64) -> Result<Realm> {
        sqlx::query_as::<_, RealmRow>("SELECT id, name, slug, region FROM realms WHERE id = ?")
            .bind(realm_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("realm {realm_id}")))?
            .try_into()
    }

    /// Look a realm up by display name (case-insensitive) or slug.
    pub async fn find_realm_by_name_or_slug(&self, name: &str, region: Region) -> Result<Realm> {
        sqlx::query_as::<_, RealmRow>(
            r#"
            SELECT id, name, slug, region FROM realms
            WHERE region = ? AND (name = ? COLLATE NOCASE OR slug = ?)
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(region.as_str())
        .bind(name)
        .bind(slugify(name))
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("realm '{name}' in {region}")))?
        .try_into()
    }

    /// Insert the realm unless (slug, region) already exists. Existing rows are
    /// left untouched. Returns the stored realm and whether it was new.
    pub async fn upsert_realm(&self, region: Region, desc: &RealmDescriptor) -> Result<(Realm, bool)> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO realms (name, slug, region, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (slug, region) DO NOTHING
            "#,
        )
        .bind(&desc.name)
        .bind(&desc.slug)
        .bind(region.as_str())
        .bind(unix_now())
        .execute(self.pool())
        .await?
        .rows_affected()
            == 1;

        let realm: Realm = sqlx::query_as::<_, RealmRow>(
            "SELECT id, name, slug, region FROM realms WHERE slug = ? AND region = ?",
        )
        .bind(&desc.slug)
        .bind(region.as_str())
        .fetch_one(self.pool())
        .await?
        .try_into()?;

        Ok((realm, inserted))
    }

    /// Register a folder for the realm. A folder already registered for the
    /// same kind keeps its original path.
    pub async fn ensure_realm_folder(
        &self,
        realm_id: i64,
        kind: FolderKind,
        path: &Path,
    ) -> Result<RealmFolder> {
        sqlx::query(
            "INSERT INTO realm_folders (realm_id, kind, path) VALUES (?, ?, ?) \
             ON CONFLICT (realm_id, kind) DO NOTHING",
        )
        .bind(realm_id)
        .bind(kind.as_str())
        .bind(path.to_string_lossy().into_owned())
        .execute(self.pool())
        .await?;

        self.find_realm_folder(realm_id, kind).await
    }

    pub async fn find_realm_folder(&self, realm_id: i64, kind: FolderKind) -> Result<RealmFolder> {
        sqlx::query_as::<_, RealmFolderRow>(
            "SELECT id, realm_id, kind, path FROM realm_folders WHERE realm_id = ? AND kind = ?",
        )
        .bind(realm_id)
        .bind(kind.as_str())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{kind} folder for realm {realm_id}")))?
        .try_into()
    }
}

/// Lowercase, ASCII alphanumerics and single dashes. Matches how realm slugs
/// are published ("Twisting Nether" → "twisting-nether").
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
