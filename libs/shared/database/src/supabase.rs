use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;

/// Prefer header asking PostgREST to echo the affected rows.
pub const RETURN_REPRESENTATION: &str = "return=representation";

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self, prefer: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.anon_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(prefer) = prefer {
            headers.insert("Prefer", HeaderValue::from_str(prefer)?);
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            body: Option<Value>, prefer: Option<&str>)
                            -> Result<T>
    where T: DeserializeOwned {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let headers = self.get_headers(prefer)?;

        let mut req = self.client.request(method, &url)
            .headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            error!("API error ({}): {}", status, error_text);

            return Err(match status.as_u16() {
                401 | 403 => anyhow!("Authentication error: {}", error_text),
                404 => anyhow!("Resource not found: {}", error_text),
                409 => anyhow!("Conflict: {}", error_text),
                _ => anyhow!("API error ({}): {}", status, error_text),
            });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }

    /// GET `/rest/v1/{table}?{query}`.
    pub async fn select<T>(&self, table: &str, query: &str) -> Result<Vec<T>>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/{}?{}", table, query);
        self.request(Method::GET, &path, None, None).await
    }

    /// POST a row; `prefer` lets callers add e.g. `resolution=ignore-duplicates`.
    pub async fn insert<T>(&self, table: &str, row: Value, prefer: &str) -> Result<Vec<T>>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/{}", table);
        self.request(Method::POST, &path, Some(row), Some(prefer)).await
    }

    /// PATCH rows matching `filter`, returning the rows actually updated.
    pub async fn update<T>(&self, table: &str, filter: &str, changes: Value) -> Result<Vec<T>>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/{}?{}", table, filter);
        self.request(Method::PATCH, &path, Some(changes), Some(RETURN_REPRESENTATION)).await
    }

    pub async fn rpc<T>(&self, function: &str, args: Value) -> Result<T>
    where T: DeserializeOwned {
        let path = format!("/rest/v1/rpc/{}", function);
        self.request(Method::POST, &path, Some(args), None).await
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
