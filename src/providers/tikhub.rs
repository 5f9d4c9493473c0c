//! TikHub video resolution, web and app API variants.
//!
//! The variants hit the same host but are separate chain entries, each
//! with its own `ResilientClient` and breaker, so one endpoint going
//! bad does not blind the other. The app variant needs a numeric aweme
//! id and fails fast on share-link URLs that do not carry one.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::form_urlencoded;

use crate::error::PipelineError;
use crate::providers::{MediaLocation, ResolveInput, StageAdapter};
use crate::resilience::breaker::DependencyState;
use crate::resilience::client::{RequestSpec, ResilientClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TikHubMode {
    Web,
    App,
}

pub struct TikHubResolver {
    client: Arc<ResilientClient>,
    api_key: String,
    mode: TikHubMode,
}

impl TikHubResolver {
    pub fn new(client: Arc<ResilientClient>, api_key: impl Into<String>, mode: TikHubMode) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            mode,
        }
    }

    fn request_path(&self, input: &ResolveInput) -> Result<String, PipelineError> {
        match self.mode {
            TikHubMode::Web => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("share_url", &input.url)
                    .finish();
                Ok(format!(
                    "/api/v1/douyin/web/fetch_one_video_by_share_url?{query}"
                ))
            }
            TikHubMode::App => {
                let aweme_id =
                    aweme_id_from_url(&input.url).ok_or_else(|| PipelineError::Payload {
                        provider: self.name().to_string(),
                        message: format!("no aweme id in url '{}'", input.url),
                    })?;
                Ok(format!("/api/v1/douyin/app/v3/fetch_one_video?aweme_id={aweme_id}"))
            }
        }
    }
}

#[async_trait]
impl StageAdapter<ResolveInput, MediaLocation> for TikHubResolver {
    fn name(&self) -> &str {
        match self.mode {
            TikHubMode::Web => "tikhub-web",
            TikHubMode::App => "tikhub-app",
        }
    }

    fn circuit_would_reject(&self) -> bool {
        self.client.would_reject()
    }

    fn dependency_state(&self) -> Option<DependencyState> {
        Some(self.client.snapshot())
    }

    async fn call(&self, input: &ResolveInput) -> Result<MediaLocation, PipelineError> {
        let path = self.request_path(input)?;
        let spec = RequestSpec::get(path)
            .header("Authorization", format!("Bearer {}", self.api_key));
        let payload = self.client.execute(spec).await?;
        parse_video_payload(self.name(), &payload)
    }
}

/// Pull the numeric aweme id out of a `/video/<id>` URL segment.
fn aweme_id_from_url(url: &str) -> Option<String> {
    let rest = &url[url.find("/video/")? + "/video/".len()..];
    let id: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!id.is_empty()).then_some(id)
}

/// Extract the playable URL from a TikHub envelope. `play_addr` is
/// preferred; some videos only carry `download_addr`.
fn parse_video_payload(provider: &str, payload: &Value) -> Result<MediaLocation, PipelineError> {
    let code = payload.get("code").and_then(Value::as_i64);
    if code != Some(200) {
        let msg = payload
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(PipelineError::Payload {
            provider: provider.to_string(),
            message: format!("business code {code:?}: {msg}"),
        });
    }

    let url = payload
        .pointer("/data/aweme_detail/video/play_addr/url_list/0")
        .or_else(|| payload.pointer("/data/aweme_detail/video/download_addr/url_list/0"))
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::Payload {
            provider: provider.to_string(),
            message: "no playable url in response".into(),
        })?;

    // duration comes back in milliseconds
    let duration_secs = payload
        .pointer("/data/aweme_detail/video/duration")
        .and_then(Value::as_u64)
        .map(|ms| ms / 1000)
        .filter(|secs| *secs > 0);

    let title = payload
        .pointer("/data/aweme_detail/desc")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|desc| !desc.is_empty())
        .map(String::from);

    Ok(MediaLocation {
        url: url.to_string(),
        duration_secs,
        title,
    })
}
