use async_trait::async_trait;
use reqwest::header;
use serde_json::Value;
use url::Url;

use crate::error::{ClientError, Result};
use crate::reconcile::CatalogFetcher;

/// [`CatalogFetcher`] over the catalog HTTP API.
///
/// Reads ask intermediaries to revalidate (`Cache-Control: no-cache`) so a
/// reconciliation never absorbs a response captured before the write.
#[derive(Debug, Clone)]
pub struct HttpCatalogFetcher {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpCatalogFetcher {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url.trim_end_matches('/'))?,
        })
    }

    fn products_url(&self, suffix: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("/api/products{suffix}"))?)
    }

    async fn get_json(&self, mut url: Url, query: Option<&str>) -> Result<Value> {
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.set_query(Some(query));
        }
        let resp = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        handle_response(resp).await
    }
}

async fn handle_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json().await?)
}

#[async_trait]
impl CatalogFetcher for HttpCatalogFetcher {
    async fn fetch_list(&self, query: &str) -> Result<Value> {
        let url = self.products_url("")?;
        self.get_json(url, Some(query)).await
    }

    async fn fetch_detail(&self, id: &str) -> Result<Value> {
        let url = self.products_url(&format!("/{id}"))?;
        self.get_json(url, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_urls() {
        let fetcher = HttpCatalogFetcher::new("http://localhost:8080/").unwrap();
        assert_eq!(
            fetcher.products_url("").unwrap().as_str(),
            "http://localhost:8080/api/products"
        );
        assert_eq!(
            fetcher.products_url("/p1").unwrap().as_str(),
            "http://localhost:8080/api/products/p1"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpCatalogFetcher::new("not a url"),
            Err(ClientError::Url(_))
        ));
    }
}
