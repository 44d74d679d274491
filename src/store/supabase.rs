//! Supabase REST API client using service_role key

use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::SupabaseConfig;

use super::StoreError;

/// Supabase client for server-side database operations
/// Uses service_role key which bypasses RLS - handle with care!
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

/// PostgREST query parameters, e.g. `("name", "eq.alice")`
pub type Params<'a> = &'a [(&'a str, String)];

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            service_role_key: config.service_role_key.clone(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        params: Params<'_>,
    ) -> Result<Vec<T>, StoreError> {
        let response = self
            .authed(self.client.get(self.rest_url(table)).query(params))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status: status.as_u16(), body });
        }

        response.json().await.map_err(StoreError::Parse)
    }

    /// Make an authenticated GET request expecting at most one row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        params: Params<'_>,
    ) -> Result<Option<T>, StoreError> {
        let response = self
            .authed(self.client.get(self.rest_url(table)).query(params))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status: status.as_u16(), body });
        }

        response.json().await.map(Some).map_err(StoreError::Parse)
    }

    /// Make an authenticated POST request (insert), discarding the row
    pub async fn insert<T: Serialize>(&self, table: &str, data: &T) -> Result<(), StoreError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=minimal")
            .json(data)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status: status.as_u16(), body });
        }

        Ok(())
    }

    /// Upsert (insert or update on conflict)
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), StoreError> {
        let response = self
            .authed(
                self.client
                    .post(self.rest_url(table))
                    .query(&[("on_conflict", on_conflict)]),
            )
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(data)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status: status.as_u16(), body });
        }

        Ok(())
    }
}
