//! Vision-LLM extraction: render pages as images, transcribe with a multimodal
//! model.
//!
//! This is the last resort of the auto chain and the only strategy that handles
//! arbitrarily messy scans. Each page is rendered at 300 DPI, base64-encoded, and
//! sent with a fixed extraction prompt; per-page outputs are joined with horizontal
//! rules.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::{AgentError, Result};
use crate::llm::LlmProvider;

const VISION_ATTEMPTS: u32 = 3;
const VISION_RETRY_MIN: Duration = Duration::from_secs(4);
const VISION_RETRY_MAX: Duration = Duration::from_secs(60);

/// Extraction prompt sent with every page image.
///
/// The rules pin down the output contract: markdown headings, pipe tables, figure
/// placeholders, no page chrome, and verbatim accuracy on Japanese proper nouns,
/// numerics, and accounting terms.
pub(crate) const EXTRACTION_PROMPT: &str = "\
あなたはPDFからテキストと表を抽出する専門家です。
このPDFページの内容をマークダウン形式で正確に抽出してください。

ルール:
1. テキストは段落ごとに抽出し、見出しは適切なレベルの#を付ける
2. 表はマークダウンテーブル形式（| col1 | col2 |）で抽出する
3. 図やグラフがある場合は [図: 説明] の形式で記述する
4. ページ番号やヘッダー/フッターは除外する
5. 日本語の固有名詞や数値は正確に抽出する
6. 会計用語や財務諸表の項目名は正確に抽出する

出力はマークダウン形式のテキストのみを返してください。説明や前置きは不要です。";

/// Transcribes one rendered page, retrying rate-limited failures with backoff.
pub(crate) async fn extract_page(
    provider: &Arc<dyn LlmProvider>,
    png_bytes: &[u8],
) -> Result<String> {
    let mut attempt = 0;
    loop {
        match provider.invoke_vision(EXTRACTION_PROMPT, png_bytes, "image/png").await {
            Err(e @ AgentError::VisionApi { rate_limited: true, .. })
                if attempt + 1 < VISION_ATTEMPTS =>
            {
                let wait = backoff(attempt);
                tracing::warn!(error = %e, "vision call rate limited, retrying in {wait:?}");
                sleep(wait).await;
                attempt += 1;
            }
            other => return other.map(|text| text.trim().to_string()),
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let base = VISION_RETRY_MIN.as_millis() as u64 * 2_u64.pow(attempt);
    Duration::from_millis(base.min(VISION_RETRY_MAX.as_millis() as u64))
}

/// Joins per-page transcriptions with `## Page N` headers and horizontal rules.
///
/// `page_numbers` are 1-based and parallel to `texts`; empty transcriptions are
/// dropped.
pub(crate) fn join_pages(page_numbers: &[usize], texts: &[String]) -> String {
    page_numbers
        .iter()
        .zip(texts)
        .filter(|(_, text)| !text.is_empty())
        .map(|(n, text)| format!("## Page {n}\n\n{text}"))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_join_with_rules_and_skip_empties() {
        let joined = join_pages(
            &[1, 2, 3],
            &["first".to_string(), String::new(), "third".to_string()],
        );
        assert_eq!(joined, "## Page 1\n\nfirst\n\n---\n\n## Page 3\n\nthird");
    }

    #[test]
    fn single_page_has_no_rule() {
        let joined = join_pages(&[7], &["only".to_string()]);
        assert_eq!(joined, "## Page 7\n\nonly");
    }
}
