use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{EsaConfig, MAX_PER_PAGE};
use crate::http::{QueryParam, Requester, build_url, encode_plain};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Author {
    #[serde(default, deserialize_with = "null_as_default")]
    pub screen_name: String,
}

/// A post as returned by the esa API. Search results and full fetches share
/// this shape; only the full fetch is guaranteed to carry the whole body.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CatalogItem {
    pub number: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body_md: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_at: String,
    #[serde(default)]
    pub created_by: Option<Author>,
    #[serde(default)]
    pub updated_by: Option<Author>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub wip: bool,
}

impl CatalogItem {
    pub fn category_path(&self) -> &str {
        self.category.as_deref().unwrap_or("")
    }

    pub fn created_by_name(&self) -> &str {
        self.created_by
            .as_ref()
            .map(|author| author.screen_name.as_str())
            .unwrap_or("")
    }

    pub fn updated_by_name(&self) -> &str {
        self.updated_by
            .as_ref()
            .map(|author| author.screen_name.as_str())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SearchPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub posts: Vec<CatalogItem>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_count: u64,
    #[serde(default)]
    pub next_page: Option<u64>,
}

pub trait CatalogApi {
    fn search(&mut self, query: Option<&str>, page: u32, per_page: u32) -> Result<SearchPage>;
    fn fetch_full(&mut self, number: u64) -> Result<CatalogItem>;
    fn request_count(&self) -> usize;
}

pub struct EsaClient {
    requester: Requester,
    base_url: String,
    team: String,
    access_token: String,
}

impl EsaClient {
    pub fn new(config: &EsaConfig, team: &str, access_token: &str) -> Result<Self> {
        Ok(Self::with_requester(
            Requester::from_config(config)?,
            &config.api_url(),
            team,
            access_token,
        ))
    }

    pub fn with_requester(
        requester: Requester,
        base_url: &str,
        team: &str,
        access_token: &str,
    ) -> Self {
        Self {
            requester,
            base_url: base_url.to_string(),
            team: team.trim().to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn request_json<T: DeserializeOwned>(&mut self, endpoint: &str, params: &[QueryParam]) -> Result<T> {
        let url = build_url(&self.base_url, endpoint, params)?;
        let body = self.requester.get(&url, Some(&self.access_token))?;
        serde_json::from_slice(&body)
            .with_context(|| format!("failed to decode esa API JSON response from {url}"))
    }

    fn posts_endpoint(&self) -> String {
        format!("/v1/teams/{}/posts", encode_plain(&self.team))
    }
}

impl CatalogApi for EsaClient {
    fn search(&mut self, query: Option<&str>, page: u32, per_page: u32) -> Result<SearchPage> {
        let mut params = vec![
            QueryParam::plain("page", page),
            QueryParam::plain("per_page", per_page.min(MAX_PER_PAGE)),
        ];
        if let Some(query) = query {
            params.push(QueryParam::free_text("q", query));
        }
        let endpoint = self.posts_endpoint();
        self.request_json(&endpoint, &params)
    }

    fn fetch_full(&mut self, number: u64) -> Result<CatalogItem> {
        let endpoint = format!("{}/{number}", self.posts_endpoint());
        self.request_json(&endpoint, &[])
    }

    fn request_count(&self) -> usize {
        self.requester.request_count()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::{CatalogApi, EsaClient};
    use crate::http::{HttpOutcome, RequestError, is_unauthorized};
    use crate::test_support::{FakeTransport, RecordingSleeper, requester};

    const BASE: &str = "https://api.esa.io";

    fn client(transport: FakeTransport) -> EsaClient {
        EsaClient::with_requester(
            requester(transport, RecordingSleeper::default()),
            BASE,
            "docs",
            "secret-token",
        )
    }

    #[test]
    fn search_builds_paged_request_with_bearer_token() {
        let payload = r#"{
            "posts": [
                {"number": 1, "name": "Hello", "category": "dev/spec", "tags": ["a"], "wip": true},
                {"number": 2, "name": "World", "category": null, "tags": null, "body_md": null}
            ],
            "total_count": 2,
            "next_page": null
        }"#;
        let transport =
            FakeTransport::scripted([HttpOutcome::Success(payload.as_bytes().to_vec())]);
        let mut client = client(transport.clone());

        let page = client
            .search(Some("tag:important"), 1, 500)
            .expect("search");
        assert_eq!(page.total_count, 2);
        assert_eq!(page.next_page, None);
        assert_eq!(page.posts.len(), 2);
        assert_eq!(page.posts[0].category_path(), "dev/spec");
        assert!(page.posts[0].wip);
        assert_eq!(page.posts[1].category_path(), "");
        assert!(page.posts[1].tags.is_empty());
        assert!(page.posts[1].body_md.is_empty());

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].url,
            "https://api.esa.io/v1/teams/docs/posts?page=1&per_page=100&q=tag%3Aimportant"
        );
        assert_eq!(calls[0].bearer_token.as_deref(), Some("secret-token"));
        assert_eq!(client.request_count(), 1);
    }

    #[test]
    fn search_without_query_omits_q() {
        let transport = FakeTransport::scripted([HttpOutcome::Success(
            br#"{"posts": [], "total_count": 0}"#.to_vec(),
        )]);
        let mut client = client(transport.clone());

        let page = client.search(None, 3, 20).expect("search");
        assert!(page.posts.is_empty());
        assert_eq!(
            transport.calls()[0].url,
            "https://api.esa.io/v1/teams/docs/posts?page=3&per_page=20"
        );
    }

    #[test]
    fn fetch_full_decodes_authors_and_timestamps() {
        let payload = r#"{
            "number": 42,
            "name": "Design",
            "body_md": "body",
            "created_at": "2024-01-02T03:04:05+09:00",
            "updated_at": "2024-02-02T03:04:05+09:00",
            "created_by": {"screen_name": "alice"},
            "updated_by": {"screen_name": "bob"},
            "wip": false
        }"#;
        let transport =
            FakeTransport::scripted([HttpOutcome::Success(payload.as_bytes().to_vec())]);
        let mut client = client(transport.clone());

        let item = client.fetch_full(42).expect("fetch");
        assert_eq!(item.number, 42);
        assert_eq!(item.created_by_name(), "alice");
        assert_eq!(item.updated_by_name(), "bob");
        assert_eq!(item.created_at, "2024-01-02T03:04:05+09:00");
        assert_eq!(
            transport.calls()[0].url,
            "https://api.esa.io/v1/teams/docs/posts/42"
        );
    }

    #[test]
    fn fetch_full_propagates_not_found() {
        let transport = FakeTransport::scripted([HttpOutcome::NotFound]);
        let mut client = client(transport);

        let error = client.fetch_full(7).expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<RequestError>(),
            Some(RequestError::NotFound { .. })
        ));
        assert!(!is_unauthorized(&error));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let transport = FakeTransport::scripted([HttpOutcome::Success(b"<html>".to_vec())]);
        let mut client = client(transport);

        let error = client.search(None, 1, 100).expect_err("must fail");
        assert!(error.to_string().contains("failed to decode"));
    }
}
