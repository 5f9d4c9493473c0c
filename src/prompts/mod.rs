//! Prompt construction for the script generation stage.
//!
//! All LLM providers share these templates so switching providers
//! mid-chain cannot change the requested output contract.

use crate::providers::ScriptStyle;

const OUTPUT_CONTRACT: &str = "严格输出 JSON，不要输出任何其他文字。JSON 结构如下：\n\
{\"title\": \"脚本标题\", \"duration_secs\": {duration}, \"scenes\": [{\"scene_number\": 1, \"timestamp\": \"00:00-00:10\", \"description\": \"画面描述\", \"dialogue\": \"台词\", \"notes\": \"可选备注\"}]}\n\
timestamp 使用 MM:SS-MM:SS 格式，场景时间连续覆盖全片。";

const DEFAULT_TEMPLATE: &str = "你是一名短视频编导。请根据下面的视频转录文本，改写出一个结构化的拍摄脚本。\n\
视频时长约{duration}秒，请规划{scene_count}个场景。\n\
转录文本：\n{transcript}\n\n";

const HUMOROUS_TEMPLATE: &str = "你是一名擅长搞笑内容的短视频编导。请根据下面的转录文本，改写出一个幽默风格的拍摄脚本：\
语气轻松，加入恰当的梗和反转，但不要偏离原视频的内容。\n\
视频时长约{duration}秒，请规划{scene_count}个场景。\n\
转录文本：\n{transcript}\n\n";

const PROFESSIONAL_TEMPLATE: &str = "你是一名资深商业短视频编导。请根据下面的转录文本，改写出一个专业严谨的拍摄脚本：\
用词准确，信息密度高，结构清晰，适合品牌或知识类内容。\n\
视频时长约{duration}秒，请规划{scene_count}个场景。\n\
转录文本：\n{transcript}\n\n";

/// Sampling knobs passed through to the provider request.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
}

/// Renders the per-style prompt and the derived request parameters.
#[derive(Debug, Default)]
pub struct PromptRenderer;

impl PromptRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, transcript: &str, style: ScriptStyle, duration_secs: Option<u64>) -> String {
        let duration = duration_secs.unwrap_or(60);
        let template = match style {
            ScriptStyle::Default => DEFAULT_TEMPLATE,
            ScriptStyle::Humorous => HUMOROUS_TEMPLATE,
            ScriptStyle::Professional => PROFESSIONAL_TEMPLATE,
        };
        format!("{template}{OUTPUT_CONTRACT}")
            .replace("{transcript}", transcript)
            .replace("{duration}", &duration.to_string())
            .replace("{scene_count}", &scene_count(duration).to_string())
    }

    /// Professional scripts sample conservatively; the rest get room
    /// to play.
    pub fn sampling(&self, style: ScriptStyle) -> SamplingParams {
        match style {
            ScriptStyle::Professional => SamplingParams {
                temperature: 0.3,
                top_p: 0.9,
            },
            _ => SamplingParams {
                temperature: 0.7,
                top_p: 0.9,
            },
        }
    }

    /// Output token budget scales with video length, floored so short
    /// clips still get a complete script.
    pub fn token_budget(&self, duration_secs: Option<u64>) -> u64 {
        duration_secs.unwrap_or(60).saturating_mul(15).max(800)
    }
}

/// Roughly one scene per 20 seconds of footage, at least one.
pub fn scene_count(duration_secs: u64) -> u64 {
    (duration_secs / 20).max(1)
}
