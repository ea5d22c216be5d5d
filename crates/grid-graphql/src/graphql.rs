//! Minimal GraphQL-over-HTTP client with endpoint rotation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::error::{GraphQlError, GraphQlResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TRIES: usize = 3;

/// Posts queries to one of several equivalent endpoints.
///
/// Endpoints are shuffled once; each request probes the next endpoint in
/// rotation and moves on if it does not answer.
pub struct GraphQl {
    urls: Vec<String>,
    next: AtomicUsize,
    http: reqwest::Client,
}

impl GraphQl {
    pub fn new(mut urls: Vec<String>) -> GraphQlResult<Self> {
        if urls.is_empty() {
            return Err(GraphQlError::NoUrls);
        }
        let mut rng = rand::thread_rng();
        urls.shuffle(&mut rng);
        let start = rng.gen_range(0..urls.len());
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            urls,
            next: AtomicUsize::new(start),
            http,
        })
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    async fn base_url(&self) -> GraphQlResult<String> {
        let mut last_error = String::new();
        for _ in 0..PROBE_TRIES {
            let i = self.next.fetch_add(1, Ordering::Relaxed) % self.urls.len();
            let url = &self.urls[i];
            debug!(%url, "checking graphql endpoint");
            match self.http.get(url).send().await {
                Ok(_) => return Ok(url.clone()),
                Err(e) => {
                    error!(%url, error = %e, "failed to connect to endpoint, retrying");
                    last_error = e.to_string();
                }
            }
        }
        Err(GraphQlError::NoWorkingUrl(last_error))
    }

    async fn post(&self, body: Value) -> GraphQlResult<Value> {
        let url = self.base_url().await?;
        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(GraphQlError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let mut reply: Value = serde_json::from_str(&text)?;
        if let Some(errors) = reply.get("errors").filter(|e| !e.is_null()) {
            return Err(GraphQlError::Response(errors.to_string()));
        }
        match reply.get_mut("data").map(Value::take) {
            Some(data) if !data.is_null() => Ok(data),
            _ => Err(GraphQlError::Response("missing data".to_string())),
        }
    }

    /// `totalCount` of `item` under `options`, e.g.
    /// `(where: {twinID_eq: 12}, orderBy: twinID_ASC)`.
    pub async fn item_total_count(&self, item: &str, options: &str) -> GraphQlResult<u64> {
        let query = format!("query {{ items: {item}Connection{options} {{ count: totalCount }} }}");
        let data = self.post(json!({ "query": query })).await?;
        data.pointer("/items/count")
            .and_then(Value::as_u64)
            .ok_or_else(|| GraphQlError::Response(format!("no count for {item}")))
    }

    /// Run `body` with `variables`, returning the `data` object.
    pub async fn query(&self, body: &str, variables: Value) -> GraphQlResult<Value> {
        self.post(json!({ "query": body, "variables": variables })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_urls() {
        assert!(matches!(GraphQl::new(Vec::new()), Err(GraphQlError::NoUrls)));
    }

    #[test]
    fn test_shuffle_keeps_all_urls() {
        let urls = vec![
            "https://graphql.dev.grid.tf/graphql".to_string(),
            "https://graphql.02.dev.grid.tf/graphql".to_string(),
        ];
        let client = GraphQl::new(urls.clone()).unwrap();
        let mut got = client.urls().to_vec();
        got.sort();
        let mut want = urls;
        want.sort();
        assert_eq!(got, want);
    }
}
