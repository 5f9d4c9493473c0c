//! Passthrough resolver for URLs that already point at a media file.

use async_trait::async_trait;
use url::Url;

use crate::error::PipelineError;
use crate::providers::{MediaLocation, ResolveInput, StageAdapter};

const MEDIA_EXTENSIONS: &[&str] = &["mp4", "m4a", "mp3", "wav", "webm", "mov", "flv"];

/// Last entry in the resolve chain. Accepts a URL only when its path
/// ends in a known media extension; it never guesses, so a share link
/// that falls through to here fails the stage honestly.
pub struct DirectResolver;

#[async_trait]
impl StageAdapter<ResolveInput, MediaLocation> for DirectResolver {
    fn name(&self) -> &str {
        "direct"
    }

    async fn call(&self, input: &ResolveInput) -> Result<MediaLocation, PipelineError> {
        let parsed = Url::parse(&input.url)
            .map_err(|err| PipelineError::InvalidVideoUrl(format!("{}: {err}", input.url)))?;

        let is_media = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|last| last.rsplit_once('.'))
            .map(|(_, ext)| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);

        if !is_media {
            return Err(PipelineError::InvalidVideoUrl(format!(
                "'{}' is not a direct media url",
                input.url
            )));
        }

        Ok(MediaLocation {
            url: input.url.clone(),
            duration_secs: None,
            title: None,
        })
    }
}
