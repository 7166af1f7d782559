use crate::Result;
use crate::models::{
    Account, AccountId, InstanceTemplate, ListQuery, ServiceGroup, TritonCredential,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistent state behind the agent: accounts and their Triton credentials,
/// instance templates and service groups.
///
/// Template and group reads are always scoped by account; a row owned by another
/// account reads as missing.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_account(&self, account: &Account) -> Result<()>;
    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>>;

    async fn upsert_triton_credential(&self, credential: &TritonCredential) -> Result<()>;
    async fn get_triton_credential(
        &self,
        account_id: AccountId,
    ) -> Result<Option<TritonCredential>>;

    async fn upsert_template(&self, template: &InstanceTemplate) -> Result<()>;
    async fn get_template(
        &self,
        account_id: AccountId,
        template_id: Uuid,
    ) -> Result<Option<InstanceTemplate>>;
    async fn list_templates(
        &self,
        account_id: AccountId,
        query: ListQuery,
    ) -> Result<Vec<InstanceTemplate>>;
    async fn delete_template(&self, account_id: AccountId, template_id: Uuid) -> Result<()>;

    /// Create a group; `Conflict` if the account already has one with that name.
    async fn insert_group(&self, group: &ServiceGroup) -> Result<()>;
    async fn upsert_group(&self, group: &ServiceGroup) -> Result<()>;
    async fn get_group(
        &self,
        account_id: AccountId,
        group_name: &str,
    ) -> Result<Option<ServiceGroup>>;
    async fn list_groups(&self, account_id: AccountId, query: ListQuery)
    -> Result<Vec<ServiceGroup>>;
    async fn delete_group(&self, account_id: AccountId, group_name: &str) -> Result<()>;
}
