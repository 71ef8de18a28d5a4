use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters};
use tracing::warn;

use crate::handlers::media::prepare_image_request;
use crate::handlers::responses::{
    edit_response, escape_html, render_image_result, render_notice, render_search_result,
    render_text_result, send_response, Rendered,
};
use crate::state::AppState;
use crate::submission::{SubmissionInProgress, SubmitOutcome};
use crate::utils::telegram::start_typing_indicator;
use crate::utils::timing::{start_command_timer, CommandTimer};
use crate::validation::{SearchRequest, TextRequest};

const PROCESSING_MESSAGE: &str = "Processing your request...";
const DELIVERY_FAILURE_MESSAGE: &str = "Failed to send the response. Please try again.";

async fn send_placeholder(bot: &Bot, message: &Message) -> Result<Message> {
    let placeholder = bot
        .send_message(message.chat.id, PROCESSING_MESSAGE)
        .reply_parameters(ReplyParameters::new(message.id))
        .await?;
    Ok(placeholder)
}

async fn send_rendered(
    bot: &Bot,
    message: &Message,
    placeholder: Option<&Message>,
    rendered: &Rendered,
) -> Result<()> {
    match placeholder {
        Some(placeholder) => edit_response(bot, message.chat.id, placeholder.id, rendered).await,
        None => send_response(bot, message, rendered).await.map(|_| ()),
    }
}

/// Sends the terminal state of a submission and closes the command timer.
///
/// If the reply itself cannot be delivered, a short notice replaces it so the
/// placeholder is never left behind.
async fn deliver<T>(
    bot: &Bot,
    message: &Message,
    placeholder: Option<Message>,
    outcome: SubmitOutcome<T>,
    render: impl FnOnce(&T) -> Rendered,
    timer: &mut CommandTimer,
) -> Result<()> {
    let (rendered, status, detail) = match &outcome {
        SubmitOutcome::Succeeded(value) => (render(value), "success", None),
        SubmitOutcome::Rejected(reason) => {
            (render_notice(reason), "rejected", Some(reason.clone()))
        }
        SubmitOutcome::Failed(reason) => (render_notice(reason), "error", Some(reason.clone())),
        SubmitOutcome::Busy => (
            render_notice(&SubmissionInProgress.to_string()),
            "busy",
            None,
        ),
    };

    let placeholder = placeholder.as_ref();
    match send_rendered(bot, message, placeholder, &rendered).await {
        Ok(()) => timer.complete(status, detail),
        Err(err) => {
            warn!("Failed to deliver {status} reply: {err}");
            timer.complete("send_failed", Some(err.to_string()));
            let notice = render_notice(DELIVERY_FAILURE_MESSAGE);
            send_rendered(bot, message, placeholder, &notice).await?;
        }
    }
    Ok(())
}

pub async fn ask_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    prompt: String,
) -> Result<()> {
    let mut timer = start_command_timer("ask", &message);
    let chat_key = message.chat.id.0;

    let request = TextRequest::new(prompt);
    let placeholder = if request.is_ok() && !state.text_submissions.is_submitting(chat_key) {
        Some(send_placeholder(&bot, &message).await?)
    } else {
        None
    };

    let typing = placeholder
        .as_ref()
        .map(|_| start_typing_indicator(bot.clone(), message.chat.id));
    let mediators = state.mediators.clone();
    let outcome = state
        .text_submissions
        .submit(chat_key, request, |request| async move {
            mediators.analyze_text(&request).await
        })
        .await;
    drop(typing);

    let budget = state.config.telegram_max_length;
    deliver(
        &bot,
        &message,
        placeholder,
        outcome,
        |text| render_text_result(text, budget),
        &mut timer,
    )
    .await
}

pub async fn image_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    prompt: String,
) -> Result<()> {
    let mut timer = start_command_timer("image", &message);
    let chat_key = message.chat.id.0;
    let budget = state.config.telegram_max_length;

    if state.image_submissions.is_submitting(chat_key) {
        return deliver(
            &bot,
            &message,
            None,
            SubmitOutcome::Busy,
            |text: &String| render_image_result(text, budget),
            &mut timer,
        )
        .await;
    }

    let request = prepare_image_request(&bot, &state.downloads, &message, &prompt).await;
    let placeholder = if request.is_ok() {
        Some(send_placeholder(&bot, &message).await?)
    } else {
        None
    };

    let typing = placeholder
        .as_ref()
        .map(|_| start_typing_indicator(bot.clone(), message.chat.id));
    let mediators = state.mediators.clone();
    let outcome = state
        .image_submissions
        .submit(chat_key, request, |request| async move {
            mediators.analyze_image(&request).await
        })
        .await;
    drop(typing);

    deliver(
        &bot,
        &message,
        placeholder,
        outcome,
        |text| render_image_result(text, budget),
        &mut timer,
    )
    .await
}

pub async fn search_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    query: String,
) -> Result<()> {
    let mut timer = start_command_timer("search", &message);
    let chat_key = message.chat.id.0;

    let request = SearchRequest::new(query);
    let placeholder = if request.is_ok() && !state.search_submissions.is_submitting(chat_key) {
        Some(send_placeholder(&bot, &message).await?)
    } else {
        None
    };

    let typing = placeholder
        .as_ref()
        .map(|_| start_typing_indicator(bot.clone(), message.chat.id));
    let mediators = state.mediators.clone();
    let outcome = state
        .search_submissions
        .submit(chat_key, request, |request| async move {
            mediators.search_web(&request).await
        })
        .await;
    drop(typing);

    let budget = state.config.telegram_max_length;
    deliver(
        &bot,
        &message,
        placeholder,
        outcome,
        |result| render_search_result(result, budget),
        &mut timer,
    )
    .await
}

fn help_text(state: &AppState) -> String {
    let models = state.mediators.models();
    format!(
        "<b>Gemini Studio</b>

<b>Text Genius</b> - analyze, summarize, translate or answer anything.
Usage: <code>/ask [prompt]</code>
Model: {text_model}

<b>Image Inspector</b> - ask a question about an image.
Usage: send a PNG, JPEG or WEBP image (up to 4MB) with the caption <code>/image [prompt]</code>, or reply to an image with <code>/image [prompt]</code>
Model: {vision_model}

<b>Web Search</b> - questions about recent events, answered with Google Search grounding and sources.
Usage: <code>/search [query]</code>
Model: {search_model}

/help - Show this help message",
        text_model = escape_html(&models.text),
        vision_model = escape_html(&models.vision),
        search_model = escape_html(&models.search),
    )
}

pub async fn help_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    bot.send_message(message.chat.id, help_text(&state))
        .reply_parameters(ReplyParameters::new(message.id))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

pub async fn start_handler(bot: Bot, message: Message) -> Result<()> {
    bot.send_message(
        message.chat.id,
        "Hello! I am Gemini Studio. Use /help to see commands.",
    )
    .reply_parameters(ReplyParameters::new(message.id))
    .await?;
    Ok(())
}
