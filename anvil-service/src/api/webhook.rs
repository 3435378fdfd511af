// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Hosting-platform webhooks that raise schedule triggers. These are plain
//! poem handlers: the payloads are platform-defined, not part of our API
//! contract.

use crate::model::definitions::REPO_TYPE;
use crate::model::resource::Resource;
use crate::repo::stores::Stores;
use crate::service::scheduler::SchedulerService;
use anvil_common::model::ResTypeId;
use hmac::{Hmac, Mac};
use poem::http::StatusCode;
use poem::web::Data;
use poem::{handler, Body, Request, Response};
use sha2::Sha256;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookState {
    pub stores: Stores,
    pub scheduler: Arc<SchedulerService>,
}

fn plain(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .content_type("text/plain; charset=UTF-8")
        .body(format!("{message}\n"))
}

/// Lists the supported hook names.
#[handler]
pub fn webhook_index() -> Response {
    plain(StatusCode::OK, "github")
}

#[handler]
pub async fn github_webhook(
    state: Data<&Arc<WebhookState>>,
    request: &Request,
    body: Body,
) -> Response {
    // Is this an event we're interested in?
    let event = request
        .headers()
        .get("x-github-event")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if event != "push" {
        return plain(StatusCode::OK, "Irrelevant event ignored");
    }

    // JSON must be UTF-8; other encodings are rejected outright.
    let content_type = request.content_type().unwrap_or_default().to_lowercase();
    if !content_type.starts_with("application/json") {
        return plain(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Unsupported Content-Type; expected application/json",
        );
    }

    let bytes = match body.into_bytes().await {
        Ok(bytes) => bytes,
        Err(_) => return plain(StatusCode::BAD_REQUEST, "Failed to read request body"),
    };
    let text = match std::str::from_utf8(&bytes) {
        Ok(text) => text.trim_start_matches('\u{feff}'),
        Err(_) => return plain(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Body is not UTF-8"),
    };
    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(err) => return plain(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {err}")),
    };

    // Find the repository. URLs are compared case-insensitively; every
    // hosting platform tested either ignores case or lowercases paths.
    let repo_urls = match repository_urls(&parsed) {
        Some(urls) => urls,
        None => return plain(StatusCode::BAD_REQUEST, "Missing repository URLs in JSON"),
    };
    let repo_match = state
        .stores
        .resources_of_type(&ResTypeId::new(REPO_TYPE))
        .into_iter()
        .find(|repo| repo_urls.contains(&repo.locator.to_lowercase()));

    // Authenticate. The same verification flow runs whether or not a
    // repository matched, to make timing attacks harder.
    let mut error_message: Option<&str> = None;
    let mut secret = "dummysecret".to_string();
    match &repo_match {
        None => error_message = Some("no repository matches given URL(s)"),
        Some(repo) => match repo.params.get("secret") {
            None => error_message = Some("no secret has been set for repository"),
            Some(value) => secret = value.clone(),
        },
    }
    if !verify_signature(request, &bytes, secret.as_bytes()) && error_message.is_none() {
        error_message = Some("signature mismatch");
    }
    if let Some(message) = error_message {
        warn!("Ignoring callback on github webhook: {message}");
        return plain(
            StatusCode::FORBIDDEN,
            "Could not authenticate this callback.\nSee controller log for details.",
        );
    }
    let repo: Arc<Resource> = repo_match.expect("authenticated above");

    let branches = match push_branches(&parsed) {
        Some(branches) => branches,
        None => return plain(StatusCode::BAD_REQUEST, "Missing ref in JSON"),
    };

    match state.scheduler.trigger(&repo.id, &branches).await {
        Ok(triggered) => {
            info!(
                "Got update on github webhook for branch(es) {:?}; triggered schedule(s): {:?}",
                branches, triggered
            );
            plain(StatusCode::OK, "Received")
        }
        Err(err) => {
            warn!("Webhook trigger failed: {err}");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Trigger failed")
        }
    }
}

fn repository_urls(parsed: &serde_json::Value) -> Option<BTreeSet<String>> {
    let repository = parsed.get("repository")?;
    let urls: BTreeSet<String> = ["clone_url", "git_url", "ssh_url", "html_url"]
        .iter()
        .filter_map(|key| repository.get(key))
        .filter_map(|value| value.as_str())
        .map(|url| url.to_lowercase())
        .collect();
    if urls.is_empty() {
        None
    } else {
        Some(urls)
    }
}

fn push_branches(parsed: &serde_json::Value) -> Option<BTreeSet<String>> {
    let reference = parsed.get("ref")?.as_str()?;
    let branch = reference.strip_prefix("refs/heads/")?;
    Some(BTreeSet::from([branch.to_string()]))
}

fn verify_signature(request: &Request, body: &[u8], secret: &[u8]) -> bool {
    let Some(signature) = request
        .headers()
        .get("x-hub-signature-256")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("sha256="))
    else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn branch_extraction_requires_a_heads_ref() {
        let push = serde_json::json!({ "ref": "refs/heads/main" });
        assert_eq!(
            push_branches(&push),
            Some(BTreeSet::from(["main".to_string()]))
        );
        let tag = serde_json::json!({ "ref": "refs/tags/v1.0" });
        assert_eq!(push_branches(&tag), None);
    }

    #[test]
    fn repository_urls_fold_case() {
        let payload = serde_json::json!({
            "repository": {
                "clone_url": "https://Example.com/Repo.git",
                "html_url": "https://example.com/repo"
            }
        });
        let urls = repository_urls(&payload).unwrap();
        assert!(urls.contains("https://example.com/repo.git"));
        assert!(urls.contains("https://example.com/repo"));
    }
}
