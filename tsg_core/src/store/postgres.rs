use crate::config::PostgresConfig;
use crate::models::{
    Account, AccountId, InstanceTemplate, ListQuery, ServiceGroup, TritonCredential,
};
use crate::store::traits::Store;
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

const MIGRATION_0001: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[tracing::instrument(level = "debug", skip(cfg))]
    pub async fn connect(cfg: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout)
            .connect(&cfg.url)
            .await
            .map_err(|e| Error::backend("connect postgres", e))?;
        Ok(Self { pool })
    }

    #[tracing::instrument(level = "debug", skip(pool))]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_0001)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("apply migrations", e))?;
        Ok(())
    }

    fn account_from_row(row: &PgRow) -> Result<Account> {
        Ok(Account {
            account_id: AccountId(
                row.try_get::<Uuid, _>("account_id")
                    .map_err(|e| Error::backend("account_id", e))?,
            ),
            account_name: row
                .try_get("account_name")
                .map_err(|e| Error::backend("account_name", e))?,
            triton_uuid: row
                .try_get("triton_uuid")
                .map_err(|e| Error::backend("triton_uuid", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::backend("updated_at", e))?,
        })
    }

    fn credential_from_row(row: &PgRow) -> Result<TritonCredential> {
        Ok(TritonCredential {
            account_id: AccountId(
                row.try_get::<Uuid, _>("account_id")
                    .map_err(|e| Error::backend("account_id", e))?,
            ),
            account_name: row
                .try_get("account_name")
                .map_err(|e| Error::backend("account_name", e))?,
            key_id: row
                .try_get("key_id")
                .map_err(|e| Error::backend("key_id", e))?,
            key_material: row
                .try_get("key_material")
                .map_err(|e| Error::backend("key_material", e))?,
        })
    }

    fn template_from_row(row: &PgRow) -> Result<InstanceTemplate> {
        let tags: Json<BTreeMap<String, String>> =
            row.try_get("tags").map_err(|e| Error::backend("tags", e))?;
        let metadata: Json<BTreeMap<String, String>> = row
            .try_get("metadata")
            .map_err(|e| Error::backend("metadata", e))?;

        Ok(InstanceTemplate {
            template_id: row
                .try_get("template_id")
                .map_err(|e| Error::backend("template_id", e))?,
            account_id: AccountId(
                row.try_get::<Uuid, _>("account_id")
                    .map_err(|e| Error::backend("account_id", e))?,
            ),
            name: row.try_get("name").map_err(|e| Error::backend("name", e))?,
            package: row
                .try_get("package")
                .map_err(|e| Error::backend("package", e))?,
            image_id: row
                .try_get("image_id")
                .map_err(|e| Error::backend("image_id", e))?,
            firewall_enabled: row
                .try_get("firewall_enabled")
                .map_err(|e| Error::backend("firewall_enabled", e))?,
            networks: row
                .try_get("networks")
                .map_err(|e| Error::backend("networks", e))?,
            user_data: row
                .try_get("user_data")
                .map_err(|e| Error::backend("user_data", e))?,
            tags: tags.0,
            metadata: metadata.0,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
        })
    }

    fn group_from_row(row: &PgRow) -> Result<ServiceGroup> {
        let capacity: i32 = row
            .try_get("capacity")
            .map_err(|e| Error::backend("capacity", e))?;
        let capacity = u32::try_from(capacity)
            .map_err(|_| Error::BackendMessage(format!("invalid capacity in db: {capacity}")))?;

        Ok(ServiceGroup {
            group_id: row
                .try_get("group_id")
                .map_err(|e| Error::backend("group_id", e))?,
            account_id: AccountId(
                row.try_get::<Uuid, _>("account_id")
                    .map_err(|e| Error::backend("account_id", e))?,
            ),
            group_name: row
                .try_get("group_name")
                .map_err(|e| Error::backend("group_name", e))?,
            template_id: row
                .try_get("template_id")
                .map_err(|e| Error::backend("template_id", e))?,
            capacity,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::backend("updated_at", e))?,
        })
    }
}

/// Turn constraint violations into `Conflict`; everything else stays a backend error.
fn write_error(context: &'static str, err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            // unique_violation
            Some("23505") => return Error::Conflict(format!("{context}: {}", db.message())),
            // foreign_key_violation
            Some("23503") => return Error::Conflict(format!("{context}: {}", db.message())),
            _ => {}
        }
    }
    Error::backend(context, err)
}

const MAX_PAGE: usize = 1_000;

fn page(query: ListQuery) -> Result<(i64, i64)> {
    let limit = query.limit.min(MAX_PAGE) as i64;
    let offset = i64::try_from(query.offset)
        .map_err(|_| Error::InvalidInput(format!("offset out of range: {}", query.offset)))?;
    Ok((limit, offset))
}

fn capacity_column(group: &ServiceGroup) -> Result<i32> {
    i32::try_from(group.capacity)
        .map_err(|_| Error::InvalidInput(format!("capacity too large: {}", group.capacity)))
}

#[async_trait]
impl Store for PostgresStore {
    #[tracing::instrument(level = "debug", skip(self, account), fields(account_id = %account.account_id))]
    async fn upsert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tsg_accounts (account_id, account_name, triton_uuid, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id) DO UPDATE
               SET account_name = EXCLUDED.account_name,
                   triton_uuid = EXCLUDED.triton_uuid,
                   updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account.account_id.0)
        .bind(&account.account_name)
        .bind(account.triton_uuid)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("upsert account", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT account_id, account_name, triton_uuid, created_at, updated_at
              FROM tsg_accounts
             WHERE account_id = $1
            "#,
        )
        .bind(account_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get account", e))?;

        row.as_ref().map(Self::account_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, credential), fields(account_id = %credential.account_id))]
    async fn upsert_triton_credential(&self, credential: &TritonCredential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tsg_triton_credentials (account_id, account_name, key_id, key_material)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id) DO UPDATE
               SET account_name = EXCLUDED.account_name,
                   key_id = EXCLUDED.key_id,
                   key_material = EXCLUDED.key_material
            "#,
        )
        .bind(credential.account_id.0)
        .bind(&credential.account_name)
        .bind(&credential.key_id)
        .bind(&credential.key_material)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("upsert triton credential", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_triton_credential(
        &self,
        account_id: AccountId,
    ) -> Result<Option<TritonCredential>> {
        let row = sqlx::query(
            r#"
            SELECT account_id, account_name, key_id, key_material
              FROM tsg_triton_credentials
             WHERE account_id = $1
            "#,
        )
        .bind(account_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get triton credential", e))?;

        row.as_ref().map(Self::credential_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, template), fields(template_id = %template.template_id))]
    async fn upsert_template(&self, template: &InstanceTemplate) -> Result<()> {
        let res = sqlx::query(
            r#"
            INSERT INTO tsg_templates (
                template_id, account_id, name, package, image_id, firewall_enabled,
                networks, user_data, tags, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (template_id) DO UPDATE
               SET name = EXCLUDED.name,
                   package = EXCLUDED.package,
                   image_id = EXCLUDED.image_id,
                   firewall_enabled = EXCLUDED.firewall_enabled,
                   networks = EXCLUDED.networks,
                   user_data = EXCLUDED.user_data,
                   tags = EXCLUDED.tags,
                   metadata = EXCLUDED.metadata
             WHERE tsg_templates.account_id = EXCLUDED.account_id
            "#,
        )
        .bind(template.template_id)
        .bind(template.account_id.0)
        .bind(&template.name)
        .bind(&template.package)
        .bind(&template.image_id)
        .bind(template.firewall_enabled)
        .bind(&template.networks)
        .bind(&template.user_data)
        .bind(Json(&template.tags))
        .bind(Json(&template.metadata))
        .bind(template.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("upsert template", e))?;

        if res.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "template {} belongs to another account",
                template.template_id
            )));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_template(
        &self,
        account_id: AccountId,
        template_id: Uuid,
    ) -> Result<Option<InstanceTemplate>> {
        let row = sqlx::query(
            r#"
            SELECT template_id, account_id, name, package, image_id, firewall_enabled,
                   networks, user_data, tags, metadata, created_at
              FROM tsg_templates
             WHERE account_id = $1 AND template_id = $2
            "#,
        )
        .bind(account_id.0)
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get template", e))?;

        row.as_ref().map(Self::template_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_templates(
        &self,
        account_id: AccountId,
        query: ListQuery,
    ) -> Result<Vec<InstanceTemplate>> {
        let (limit, offset) = page(query)?;
        let rows = sqlx::query(
            r#"
            SELECT template_id, account_id, name, package, image_id, firewall_enabled,
                   networks, user_data, tags, metadata, created_at
              FROM tsg_templates
             WHERE account_id = $1
             ORDER BY created_at ASC, template_id ASC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id.0)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list templates", e))?;

        rows.iter().map(Self::template_from_row).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_template(&self, account_id: AccountId, template_id: Uuid) -> Result<()> {
        let res = sqlx::query("DELETE FROM tsg_templates WHERE account_id = $1 AND template_id = $2")
            .bind(account_id.0)
            .bind(template_id)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error("delete template", e))?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("template {template_id}")));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, group), fields(group_name = %group.group_name))]
    async fn insert_group(&self, group: &ServiceGroup) -> Result<()> {
        let capacity = capacity_column(group)?;
        sqlx::query(
            r#"
            INSERT INTO tsg_groups (
                group_id, account_id, group_name, template_id, capacity, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(group.group_id)
        .bind(group.account_id.0)
        .bind(&group.group_name)
        .bind(group.template_id)
        .bind(capacity)
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("insert group", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, group), fields(group_name = %group.group_name))]
    async fn upsert_group(&self, group: &ServiceGroup) -> Result<()> {
        let capacity = capacity_column(group)?;
        sqlx::query(
            r#"
            INSERT INTO tsg_groups (
                group_id, account_id, group_name, template_id, capacity, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id, group_name) DO UPDATE
               SET template_id = EXCLUDED.template_id,
                   capacity = EXCLUDED.capacity,
                   updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(group.group_id)
        .bind(group.account_id.0)
        .bind(&group.group_name)
        .bind(group.template_id)
        .bind(capacity)
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error("upsert group", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_group(
        &self,
        account_id: AccountId,
        group_name: &str,
    ) -> Result<Option<ServiceGroup>> {
        let row = sqlx::query(
            r#"
            SELECT group_id, account_id, group_name, template_id, capacity, created_at, updated_at
              FROM tsg_groups
             WHERE account_id = $1 AND group_name = $2
            "#,
        )
        .bind(account_id.0)
        .bind(group_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::backend("get group", e))?;

        row.as_ref().map(Self::group_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_groups(
        &self,
        account_id: AccountId,
        query: ListQuery,
    ) -> Result<Vec<ServiceGroup>> {
        let (limit, offset) = page(query)?;
        let rows = sqlx::query(
            r#"
            SELECT group_id, account_id, group_name, template_id, capacity, created_at, updated_at
              FROM tsg_groups
             WHERE account_id = $1
             ORDER BY group_name ASC
             LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id.0)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list groups", e))?;

        rows.iter().map(Self::group_from_row).collect()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_group(&self, account_id: AccountId, group_name: &str) -> Result<()> {
        let res = sqlx::query("DELETE FROM tsg_groups WHERE account_id = $1 AND group_name = $2")
            .bind(account_id.0)
            .bind(group_name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::backend("delete group", e))?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("service group {group_name}")));
        }
        Ok(())
    }
}
