//! Deterministic local fallbacks, last resort in their chains.
//!
//! Both adapters are honest about themselves: provider attribution
//! says "mock", confidence is rock bottom, output is derived without
//! any network call. Callers can always tell degraded results apart
//! from real ones.

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::prompts::scene_count;
use crate::providers::{
    Scene, ScriptInput, ScriptStyle, StageAdapter, TranscribeInput, Transcript, VideoScript,
};

const MOCK_TRANSCRIPT: &str =
    "这是一个测试视频的转录文本。视频内容包含了各种有趣的元素，需要通过人工智能技术进行分析和处理。";

const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '!', '?', '.'];

pub struct MockTranscriber;

#[async_trait]
impl StageAdapter<TranscribeInput, Transcript> for MockTranscriber {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(&self, input: &TranscribeInput) -> Result<Transcript, PipelineError> {
        Ok(Transcript {
            text: MOCK_TRANSCRIPT.to_string(),
            confidence: 0.1,
            language: input.language.clone(),
        })
    }
}

pub struct MockScriptGenerator;

#[async_trait]
impl StageAdapter<ScriptInput, VideoScript> for MockScriptGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(&self, input: &ScriptInput) -> Result<VideoScript, PipelineError> {
        let duration = input.duration_secs.unwrap_or(60);
        let scenes = build_scenes(&input.transcript.text, duration, input.style);
        Ok(VideoScript {
            title: title_from(&input.transcript.text),
            duration_secs: duration,
            scenes,
        })
    }
}

fn title_from(transcript: &str) -> String {
    let first = split_sentences(transcript).into_iter().next();
    match first {
        // take() on chars, not bytes, so CJK text cannot be cut mid-codepoint
        Some(sentence) => sentence.chars().take(20).collect(),
        None => "视频脚本".to_string(),
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split(SENTENCE_TERMINATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn build_scenes(transcript: &str, duration: u64, style: ScriptStyle) -> Vec<Scene> {
    let count = scene_count(duration) as usize;
    let mut sentences = split_sentences(transcript);
    if sentences.is_empty() {
        sentences.push("（画面无台词）".to_string());
    }

    let per_scene = sentences.len().div_ceil(count);
    (0..count)
        .map(|i| {
            let chunk = sentences
                .iter()
                .skip(i * per_scene)
                .take(per_scene)
                .cloned()
                .collect::<Vec<_>>()
                .join("。");
            let dialogue = if chunk.is_empty() {
                "（画面无台词）".to_string()
            } else {
                format!("{chunk}。")
            };

            let from = i as u64 * duration / count as u64;
            let to = (i as u64 + 1) * duration / count as u64;
            Scene {
                scene_number: (i + 1) as u32,
                timestamp: format!("{}-{}", format_mmss(from), format_mmss(to)),
                description: scene_description(i + 1, style),
                dialogue,
                notes: None,
            }
        })
        .collect()
}

fn scene_description(number: usize, style: ScriptStyle) -> String {
    match style {
        ScriptStyle::Default => format!("场景{number}：承接上文，展示本段核心内容"),
        ScriptStyle::Humorous => {
            format!("场景{number}：轻松演绎，配合夸张表情和快节奏剪辑")
        }
        ScriptStyle::Professional => format!("场景{number}：信息点清晰呈现，画面稳重"),
    }
}

fn format_mmss(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
