use crate::models::{
    Account, AccountId, InstanceTemplate, ListQuery, ServiceGroup, TritonCredential,
};
use crate::store::traits::Store;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process `Store` used by tests and local runs without Postgres.
#[derive(Clone, Default)]
pub struct MemoryStore {
    accounts: Arc<RwLock<HashMap<AccountId, Account>>>,
    credentials: Arc<RwLock<HashMap<AccountId, TritonCredential>>>,
    templates: Arc<RwLock<HashMap<Uuid, InstanceTemplate>>>,
    groups: Arc<RwLock<HashMap<(AccountId, String), ServiceGroup>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same outcome as the Postgres foreign key on `account_id`.
    async fn require_account(&self, account_id: AccountId) -> Result<()> {
        if !self.accounts.read().await.contains_key(&account_id) {
            return Err(Error::Conflict(format!("account {account_id} does not exist")));
        }
        Ok(())
    }
}

fn paginate<T>(items: Vec<T>, query: ListQuery) -> Vec<T> {
    items
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_account(&self, account: &Account) -> Result<()> {
        self.accounts
            .write()
            .await
            .insert(account.account_id, account.clone());
        Ok(())
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&account_id).cloned())
    }

    async fn upsert_triton_credential(&self, credential: &TritonCredential) -> Result<()> {
        self.require_account(credential.account_id).await?;
        self.credentials
            .write()
            .await
            .insert(credential.account_id, credential.clone());
        Ok(())
    }

    async fn get_triton_credential(
        &self,
        account_id: AccountId,
    ) -> Result<Option<TritonCredential>> {
        Ok(self.credentials.read().await.get(&account_id).cloned())
    }

    async fn upsert_template(&self, template: &InstanceTemplate) -> Result<()> {
        self.require_account(template.account_id).await?;
        let mut templates = self.templates.write().await;
        if let Some(existing) = templates.get(&template.template_id) {
            if existing.account_id != template.account_id {
                return Err(Error::Conflict(format!(
                    "template {} belongs to another account",
                    template.template_id
                )));
            }
        }
        templates.insert(template.template_id, template.clone());
        Ok(())
    }

    async fn get_template(
        &self,
        account_id: AccountId,
        template_id: Uuid,
    ) -> Result<Option<InstanceTemplate>> {
        Ok(self
            .templates
            .read()
            .await
            .get(&template_id)
            .filter(|t| t.account_id == account_id)
            .cloned())
    }

    async fn list_templates(
        &self,
        account_id: AccountId,
        query: ListQuery,
    ) -> Result<Vec<InstanceTemplate>> {
        let mut out: Vec<InstanceTemplate> = self
            .templates
            .read()
            .await
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.template_id.cmp(&b.template_id))
        });
        Ok(paginate(out, query))
    }

    async fn delete_template(&self, account_id: AccountId, template_id: Uuid) -> Result<()> {
        let in_use = self
            .groups
            .read()
            .await
            .values()
            .any(|g| g.template_id == template_id);
        if in_use {
            return Err(Error::Conflict(format!(
                "template {template_id} is used by a service group"
            )));
        }

        let mut templates = self.templates.write().await;
        match templates.get(&template_id) {
            Some(t) if t.account_id == account_id => {
                templates.remove(&template_id);
                Ok(())
            }
            _ => Err(Error::NotFound(format!("template {template_id}"))),
        }
    }

    async fn insert_group(&self, group: &ServiceGroup) -> Result<()> {
        self.require_account(group.account_id).await?;
        let mut groups = self.groups.write().await;
        let key = (group.account_id, group.group_name.clone());
        if groups.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "service group {} already exists",
                group.group_name
            )));
        }
        groups.insert(key, group.clone());
        Ok(())
    }

    async fn upsert_group(&self, group: &ServiceGroup) -> Result<()> {
        self.require_account(group.account_id).await?;
        let mut groups = self.groups.write().await;
        let key = (group.account_id, group.group_name.clone());
        let mut next = group.clone();
        if let Some(existing) = groups.get(&key) {
            next.group_id = existing.group_id;
            next.created_at = existing.created_at;
        }
        groups.insert(key, next);
        Ok(())
    }

    async fn get_group(
        &self,
        account_id: AccountId,
        group_name: &str,
    ) -> Result<Option<ServiceGroup>> {
        Ok(self
            .groups
            .read()
            .await
            .get(&(account_id, group_name.to_string()))
            .cloned())
    }

    async fn list_groups(
        &self,
        account_id: AccountId,
        query: ListQuery,
    ) -> Result<Vec<ServiceGroup>> {
        let mut out: Vec<ServiceGroup> = self
            .groups
            .read()
            .await
            .values()
            .filter(|g| g.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.group_name.cmp(&b.group_name));
        Ok(paginate(out, query))
    }

    async fn delete_group(&self, account_id: AccountId, group_name: &str) -> Result<()> {
        self.groups
            .write()
            .await
            .remove(&(account_id, group_name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("service group {group_name}")))
    }
}
