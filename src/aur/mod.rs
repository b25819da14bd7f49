//! Client for the AUR RPC interface (v5).
//!
//! Every call is a plain async method returning a `Result`. Front ends that
//! want fire-and-forget requests with results delivered on a channel use
//! [`AurClient::dispatch`] instead.

mod events;

pub use events::{AurEvent, AurRequest};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::config::AppConfig;
use crate::models::{AurPackage, UpdateInfo};

/// Most names the AUR accepts in a single info request.
pub const INFO_BATCH_SIZE: usize = 200;

/// Shortest search term the AUR accepts.
pub const MIN_QUERY_LEN: usize = 2;

#[derive(Debug, Error)]
pub enum AurError {
    /// The AUR answered with `"type": "error"`.
    #[error("AUR error: {0}")]
    Api(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Search query must be at least 2 characters")]
    QueryTooShort,
}

#[derive(Debug, Clone)]
pub struct AurClient {
    base_url: String,
    client: Client,
    last_error: Arc<Mutex<Option<String>>>,
}

impl AurClient {
    pub fn new(base_url: impl Into<String>, user_agent: &str) -> Result<Self, AurError> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: Arc::new(Mutex::new(None)),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AurError> {
        Self::new(&config.aur_base_url, &config.user_agent)
    }

    /// Message of the most recent failed request, shared by all clones.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .expect("last_error lock poisoned")
            .clone()
    }

    // ============================================================
    // Search
    // ============================================================

    /// Search names and descriptions.
    pub async fn search(&self, query: &str) -> Result<Vec<AurPackage>, AurError> {
        self.search_by(query, None).await
    }

    pub async fn search_by_maintainer(&self, maintainer: &str) -> Result<Vec<AurPackage>, AurError> {
        self.search_by(maintainer, Some("maintainer")).await
    }

    pub async fn search_by_name(&self, name: &str) -> Result<Vec<AurPackage>, AurError> {
        self.search_by(name, Some("name")).await
    }

    async fn search_by(&self, query: &str, by: Option<&str>) -> Result<Vec<AurPackage>, AurError> {
        if query.chars().count() < MIN_QUERY_LEN {
            return self.track(Err(AurError::QueryTooShort));
        }
        let path = format!("/search/{}", urlencoding::encode(query));
        let params: Vec<(&str, &str)> = by.map(|b| ("by", b)).into_iter().collect();
        let result = self.get(&path, &params).await;
        self.track(result)
    }

    /// Packages without a maintainer. The AUR treats an empty maintainer
    /// search as "orphaned".
    pub async fn orphans(&self) -> Result<Vec<AurPackage>, AurError> {
        let result = self.get("/search/", &[("by", "maintainer")]).await;
        self.track(result)
    }

    // ============================================================
    // Info
    // ============================================================

    /// Full records for `names`, fetched [`INFO_BATCH_SIZE`] at a time.
    /// Names the AUR does not know are silently absent from the result.
    pub async fn info(&self, names: &[String]) -> Result<Vec<AurPackage>, AurError> {
        let mut packages = Vec::new();
        for batch in info_batches(names) {
            let params: Vec<(&str, &str)> = batch.iter().map(|n| ("arg[]", n.as_str())).collect();
            let result = self.get("/info", &params).await;
            packages.extend(self.track(result)?);
        }
        Ok(packages)
    }

    /// Compare installed versions (typically the foreign packages) with the
    /// AUR. Every package whose AUR version differs is reported.
    pub async fn check_for_updates(
        &self,
        installed: &BTreeMap<String, String>,
    ) -> Result<Vec<UpdateInfo>, AurError> {
        let names: Vec<String> = installed.keys().cloned().collect();
        let remote = self.info(&names).await?;

        let updates: Vec<UpdateInfo> = remote
            .into_iter()
            .filter_map(|pkg| {
                let current = installed.get(&pkg.name)?;
                (*current != pkg.version)
                    .then(|| UpdateInfo::new(pkg.name, current.clone(), pkg.version, true))
            })
            .collect();

        tracing::info!(
            "Checked {} AUR packages, {} updates",
            installed.len(),
            updates.len()
        );
        Ok(updates)
    }

    // ============================================================
    // Transport
    // ============================================================

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<AurPackage>, AurError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {} ({} params)", url, params.len());

        let response = self.client.get(&url).query(params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AurError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_response(&serde_json::from_str(&body)?)
    }

    fn track<T>(&self, result: Result<T, AurError>) -> Result<T, AurError> {
        if let Err(e) = &result {
            tracing::warn!("AUR request failed: {}", e);
            *self.last_error.lock().expect("last_error lock poisoned") = Some(e.to_string());
        }
        result
    }
}

/// Split `names` into request-sized groups.
pub fn info_batches(names: &[String]) -> impl Iterator<Item = &[String]> {
    names.chunks(INFO_BATCH_SIZE)
}

/// Decode an RPC envelope: `{"type": ..., "error": ..., "results": [...]}`.
pub fn parse_response(root: &Value) -> Result<Vec<AurPackage>, AurError> {
    if root["type"].as_str() == Some("error") {
        let message = root["error"].as_str().unwrap_or("unknown error");
        return Err(AurError::Api(message.to_string()));
    }

    Ok(root["results"]
        .as_array()
        .map(|results| results.iter().map(parse_package).collect())
        .unwrap_or_default())
}

/// Decode one result object. Missing or mistyped fields fall back to empty
/// values instead of failing the whole response.
pub fn parse_package(obj: &Value) -> AurPackage {
    let string = |key: &str| obj[key].as_str().unwrap_or_default().to_string();
    let optional = |key: &str| {
        obj[key]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let list = |key: &str| -> Vec<String> {
        obj[key]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };
    let time = |key: &str| -> Option<DateTime<Utc>> {
        let secs = obj[key]
            .as_i64()
            .or_else(|| obj[key].as_f64().map(|f| f as i64))?;
        DateTime::from_timestamp(secs, 0)
    };

    AurPackage {
        name: string("Name"),
        version: string("Version"),
        description: string("Description"),
        url: optional("URL"),
        maintainer: optional("Maintainer"),
        package_base: string("PackageBase"),
        num_votes: obj["NumVotes"]
            .as_i64()
            .or_else(|| obj["NumVotes"].as_f64().map(|f| f as i64))
            .unwrap_or(0),
        popularity: obj["Popularity"].as_f64().unwrap_or(0.0),
        first_submitted: time("FirstSubmitted"),
        last_modified: time("LastModified"),
        out_of_date: time("OutOfDate"),
        depends: list("Depends"),
        make_depends: list("MakeDepends"),
        opt_depends: list("OptDepends"),
        conflicts: list("Conflicts"),
        provides: list("Provides"),
        replaces: list("Replaces"),
        keywords: list("Keywords"),
        licenses: list("License"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_envelope_is_an_error_not_empty() {
        let root = json!({"type": "error", "error": "Too many package results.", "results": []});
        assert!(matches!(parse_response(&root), Err(AurError::Api(m)) if m == "Too many package results."));

        let empty = json!({"type": "search", "resultcount": 0, "results": []});
        assert!(parse_response(&empty).unwrap().is_empty());
    }

    #[test]
    fn parses_result_fields_with_coercion() {
        let pkg = parse_package(&json!({
            "Name": "yay",
            "Version": "12.3.5-1",
            "Description": "Yet another yogurt",
            "URL": "https://github.com/Jguer/yay",
            "Maintainer": null,
            "PackageBase": "yay",
            "NumVotes": 2000,
            "Popularity": 25.5,
            "FirstSubmitted": 1475688004,
            "LastModified": 1.7e9,
            "OutOfDate": null,
            "Depends": ["pacman>6.1", "git"],
            "License": ["GPL-3.0-or-later"]
        }));
        assert_eq!(pkg.name, "yay");
        assert!(pkg.maintainer.is_none());
        assert!(!pkg.is_out_of_date());
        assert_eq!(pkg.num_votes, 2000);
        assert_eq!(pkg.last_modified.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(pkg.depends, vec!["pacman>6.1", "git"]);
        assert_eq!(pkg.licenses, vec!["GPL-3.0-or-later"]);
        assert!(pkg.make_depends.is_empty());
    }

    #[test]
    fn batches_hold_at_most_two_hundred() {
        let names: Vec<String> = (0..401).map(|i| format!("pkg{}", i)).collect();
        let sizes: Vec<usize> = info_batches(&names).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![200, 200, 1]);
        assert_eq!(info_batches(&[]).count(), 0);
    }

    #[tokio::test]
    async fn short_query_fails_without_request() {
        // Nothing listens on this port; a request would fail with Http.
        let client = AurClient::new("http://127.0.0.1:9", "test").unwrap();
        assert!(matches!(client.search("a").await, Err(AurError::QueryTooShort)));
        assert!(client.last_error().is_some());
        assert!(client.info(&[]).await.unwrap().is_empty());
    }
}
