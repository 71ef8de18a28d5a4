use std::time::Duration;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, ReplyParameters};
use teloxide::RequestError;
use tracing::warn;

use crate::llm::{CitationRecord, SearchResult};

const TELEGRAM_RETRY_ATTEMPTS: usize = 3;
const MAX_RENDERED_SOURCES: usize = 10;
const MAX_SOURCE_LABEL_CHARS: usize = 120;
const SOURCES_HEADING_CHARS: usize = "\n\nSources:".len();
const TRUNCATION_NOTICE: &str = "\n\n(Response was truncated due to length)";
const EMPTY_RESULT_TEXT: &str = "(The model returned no text.)";

/// A reply in two flavours: Telegram HTML and a plain-text fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub html: String,
    pub plain: String,
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(TRUNCATION_NOTICE.chars().count());
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_NOTICE);
    truncated
}

fn body_text(text: &str) -> &str {
    if text.trim().is_empty() {
        EMPTY_RESULT_TEXT
    } else {
        text
    }
}

fn render_with_heading(heading: &str, text: &str, budget: usize) -> Rendered {
    let overhead = heading.chars().count() + 16;
    let body = truncate_chars(body_text(text), budget.saturating_sub(overhead));
    Rendered {
        html: format!("<b>{}</b>\n{}", escape_html(heading), escape_html(&body)),
        plain: format!("{}\n{}", heading, body),
    }
}

pub fn render_text_result(text: &str, budget: usize) -> Rendered {
    render_with_heading("Result:", text, budget)
}

pub fn render_image_result(text: &str, budget: usize) -> Rendered {
    render_with_heading("Analysis:", text, budget)
}

fn is_web_link(uri: &str) -> bool {
    url::Url::parse(uri)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn shorten_label(label: &str) -> String {
    if label.chars().count() <= MAX_SOURCE_LABEL_CHARS {
        return label.to_string();
    }
    let mut short: String = label.chars().take(MAX_SOURCE_LABEL_CHARS - 1).collect();
    short.push('…');
    short
}

struct SourceLine {
    html: String,
    plain: String,
    /// Characters Telegram counts for the HTML line; link targets are free.
    visible: usize,
}

fn render_source(record: &CitationRecord) -> Option<SourceLine> {
    let label = shorten_label(record.label()?);
    let uri = record.uri.as_deref().filter(|uri| is_web_link(uri));
    let html = match uri {
        Some(uri) => format!(
            "• <a href=\"{}\">{}</a>",
            escape_html(uri),
            escape_html(&label)
        ),
        None => format!("• {}", escape_html(&label)),
    };
    let plain = match uri {
        Some(uri) if uri != label => format!("• {} - {}", label, uri),
        _ => format!("• {}", label),
    };
    let visible = 2 + label.chars().count();
    Some(SourceLine {
        html,
        plain,
        visible,
    })
}

/// Renders the answer and its sources within `budget` visible characters.
///
/// Sources take at most half of the budget; the answer gets the rest.
pub fn render_search_result(result: &SearchResult, budget: usize) -> Rendered {
    let source_budget = budget / 2;
    let mut sources_visible = 0;
    let mut sources_html = String::new();
    let mut sources_plain = String::new();
    for line in result
        .sources
        .iter()
        .filter_map(render_source)
        .take(MAX_RENDERED_SOURCES)
    {
        let heading = if sources_html.is_empty() {
            SOURCES_HEADING_CHARS
        } else {
            0
        };
        let cost = heading + 1 + line.visible;
        if sources_visible + cost > source_budget {
            break;
        }
        if sources_html.is_empty() {
            sources_html.push_str("\n\n<b>Sources:</b>");
            sources_plain.push_str("\n\nSources:");
        }
        sources_visible += cost;
        sources_html.push('\n');
        sources_html.push_str(&line.html);
        sources_plain.push('\n');
        sources_plain.push_str(&line.plain);
    }

    let answer = render_with_heading(
        "Answer:",
        &result.text,
        budget.saturating_sub(sources_visible),
    );
    Rendered {
        html: answer.html + &sources_html,
        plain: truncate_chars(&(answer.plain + &sources_plain), budget),
    }
}

pub fn render_notice(message: &str) -> Rendered {
    Rendered {
        html: format!("⚠️ {}", escape_html(message)),
        plain: format!("⚠️ {}", message),
    }
}

fn telegram_retryable_error(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Network(_) | RequestError::RetryAfter(_) | RequestError::Io(_)
    )
}

async fn retry_delay(err: &RequestError, delay: &mut Duration) {
    if let RequestError::RetryAfter(wait) = err {
        tokio::time::sleep(wait.duration()).await;
    } else {
        tokio::time::sleep(*delay).await;
        *delay *= 2;
    }
}

async fn edit_text_with_retry(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    text: &str,
    parse_mode: Option<ParseMode>,
) -> Result<()> {
    let mut delay = Duration::from_secs_f32(1.5);
    for attempt in 0..TELEGRAM_RETRY_ATTEMPTS {
        let request = bot.edit_message_text(chat_id, message_id, text.to_string());
        let request = match parse_mode {
            Some(mode) => request.parse_mode(mode),
            None => request,
        };

        match request.await {
            Ok(_) => return Ok(()),
            Err(err) => {
                if !telegram_retryable_error(&err) || attempt + 1 == TELEGRAM_RETRY_ATTEMPTS {
                    return Err(err.into());
                }
                warn!("edit_message_text attempt {} failed: {err}", attempt + 1);
                retry_delay(&err, &mut delay).await;
            }
        }
    }

    Ok(())
}

async fn send_text_with_retry(
    bot: &Bot,
    message: &Message,
    text: &str,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let mut delay = Duration::from_secs_f32(1.5);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let request = bot
            .send_message(message.chat.id, text.to_string())
            .reply_parameters(ReplyParameters::new(message.id));
        let request = match parse_mode {
            Some(mode) => request.parse_mode(mode),
            None => request,
        };

        match request.await {
            Ok(sent) => return Ok(sent),
            Err(err) => {
                if !telegram_retryable_error(&err) || attempt == TELEGRAM_RETRY_ATTEMPTS {
                    return Err(err.into());
                }
                warn!("send_message attempt {} failed: {err}", attempt);
                retry_delay(&err, &mut delay).await;
            }
        }
    }
}

/// Replies to `message`, falling back to plain text if Telegram rejects the HTML.
pub async fn send_response(bot: &Bot, message: &Message, rendered: &Rendered) -> Result<Message> {
    match send_text_with_retry(bot, message, &rendered.html, Some(ParseMode::Html)).await {
        Ok(sent) => Ok(sent),
        Err(err) => {
            warn!("Failed to send formatted response: {err}");
            send_text_with_retry(bot, message, &rendered.plain, None).await
        }
    }
}

/// Replaces a placeholder message with the final reply.
pub async fn edit_response(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    rendered: &Rendered,
) -> Result<()> {
    if let Err(err) = edit_text_with_retry(
        bot,
        chat_id,
        message_id,
        &rendered.html,
        Some(ParseMode::Html),
    )
    .await
    {
        warn!("Failed to send formatted response: {err}");
        edit_text_with_retry(bot, chat_id, message_id, &rendered.plain, None).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(uri: Option<&str>, title: Option<&str>) -> CitationRecord {
        CitationRecord {
            uri: uri.map(str::to_string),
            title: title.map(str::to_string),
        }
    }

    #[test]
    fn text_result_is_shown_under_result_heading() {
        let rendered =
            render_text_result("The sky is blue because of <Rayleigh> scattering.", 4000);
        assert_eq!(
            rendered.html,
            "<b>Result:</b>\nThe sky is blue because of &lt;Rayleigh&gt; scattering."
        );
        assert_eq!(
            rendered.plain,
            "Result:\nThe sky is blue because of <Rayleigh> scattering."
        );
    }

    #[test]
    fn image_result_uses_analysis_heading() {
        let rendered = render_image_result("A cat.", 4000);
        assert!(rendered.html.starts_with("<b>Analysis:</b>\n"));
    }

    #[test]
    fn empty_result_gets_a_placeholder_line() {
        let rendered = render_text_result("   ", 4000);
        assert_eq!(rendered.plain, format!("Result:\n{EMPTY_RESULT_TEXT}"));
    }

    #[test]
    fn long_results_are_truncated_on_char_boundaries() {
        let text = "é".repeat(5000);
        let rendered = render_text_result(&text, 1000);
        assert!(rendered.plain.chars().count() <= 1000);
        assert!(rendered.plain.ends_with(TRUNCATION_NOTICE));
    }

    #[test]
    fn search_sources_fall_back_to_uri() {
        let result = SearchResult {
            text: "Answer text".to_string(),
            sources: vec![
                citation(Some("https://a.example/x?y=1&z=2"), Some("Site A")),
                citation(Some("https://b.example"), None),
                citation(None, Some("Offline reference")),
                citation(None, None),
            ],
        };

        let rendered = render_search_result(&result, 4000);
        assert_eq!(
            rendered.html,
            "<b>Answer:</b>\nAnswer text\n\n<b>Sources:</b>\n\
             • <a href=\"https://a.example/x?y=1&amp;z=2\">Site A</a>\n\
             • <a href=\"https://b.example\">https://b.example</a>\n\
             • Offline reference"
        );
        assert!(rendered.plain.contains("• Site A - https://a.example/x?y=1&z=2"));
        assert!(rendered.plain.contains("• https://b.example\n"));
    }

    #[test]
    fn search_without_sources_has_no_sources_section() {
        let result = SearchResult {
            text: "Nothing cited".to_string(),
            sources: Vec::new(),
        };
        let rendered = render_search_result(&result, 4000);
        assert!(!rendered.html.contains("Sources:"));
    }

    #[test]
    fn non_web_uris_are_not_linked() {
        let result = SearchResult {
            text: "x".to_string(),
            sources: vec![citation(Some("javascript:alert(1)"), Some("Bad"))],
        };
        let rendered = render_search_result(&result, 4000);
        assert!(rendered.html.ends_with("• Bad"));
    }

    fn visible_chars(html: &str) -> usize {
        let mut in_tag = false;
        html.chars()
            .filter(|&ch| match ch {
                '<' => {
                    in_tag = true;
                    false
                }
                '>' => {
                    in_tag = false;
                    false
                }
                _ => !in_tag,
            })
            .count()
    }

    #[test]
    fn link_targets_do_not_eat_the_answer_budget() {
        let answer = "a".repeat(3000);
        let redirect = format!("https://vertexaisearch.example/grounding/{}", "x".repeat(250));
        let result = SearchResult {
            text: answer.clone(),
            sources: (0..10)
                .map(|i| citation(Some(&redirect), Some(&format!("Source number {i}"))))
                .collect(),
        };

        let rendered = render_search_result(&result, 4000);
        assert!(rendered.html.contains(&answer));
        assert!(!rendered.html.contains(TRUNCATION_NOTICE));
        assert_eq!(rendered.html.matches("<a href=").count(), 10);
        assert!(visible_chars(&rendered.html) <= 4000);
    }

    #[test]
    fn long_untitled_sources_stay_within_the_limit() {
        let result = SearchResult {
            text: "b".repeat(2000),
            sources: (0..10)
                .map(|i| {
                    let uri = format!("https://example.com/{i}/{}", "y".repeat(450));
                    citation(Some(&uri), None)
                })
                .collect(),
        };

        let rendered = render_search_result(&result, 4000);
        assert!(rendered.html.contains(&"b".repeat(2000)));
        assert!(rendered.html.contains('…'));
        assert!(visible_chars(&rendered.html) <= 4000);
        assert!(rendered.plain.chars().count() <= 4000);
    }

    #[test]
    fn notices_are_escaped() {
        assert_eq!(render_notice("a < b").html, "⚠️ a &lt; b");
    }
}
