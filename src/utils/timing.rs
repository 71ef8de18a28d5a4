use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use teloxide::types::Message;
use tracing::info;

pub const TIMING_TARGET: &str = "studio.timing";

const COMMAND_TEXT_PREVIEW_CHARS: usize = 300;

#[derive(Debug)]
pub struct CommandTimer {
    command: String,
    chat_id: i64,
    user_id: Option<i64>,
    message_id: i32,
    text: Option<String>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl CommandTimer {
    pub fn from_message(command: &str, message: &Message) -> Self {
        let text = message
            .text()
            .or_else(|| message.caption())
            .map(|value| {
                value
                    .replace('\n', " ")
                    .chars()
                    .take(COMMAND_TEXT_PREVIEW_CHARS)
                    .collect::<String>()
            });

        CommandTimer {
            command: command.to_string(),
            chat_id: message.chat.id.0,
            user_id: message
                .from
                .as_ref()
                .and_then(|user| i64::try_from(user.id.0).ok()),
            message_id: message.id.0,
            text,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn log_received(&self) {
        info!(
            target: TIMING_TARGET,
            "event=command_received command={} chat_id={} user_id={:?} message_id={} received_at={} text={:?}",
            self.command,
            self.chat_id,
            self.user_id,
            self.message_id,
            self.started_at.to_rfc3339(),
            self.text
        );
    }

    pub fn complete(&mut self, status: &str, detail: Option<String>) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.status = status.to_string();
        self.detail = detail;

        let completed_at = Utc::now();
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: TIMING_TARGET,
            "event=command_completed command={} chat_id={} user_id={:?} message_id={} started_at={} response_sent_at={} duration_s={:.3} status={} detail={}",
            self.command,
            self.chat_id,
            self.user_id,
            self.message_id,
            self.started_at.to_rfc3339(),
            completed_at.to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

pub fn start_command_timer(command: &str, message: &Message) -> CommandTimer {
    let timer = CommandTimer::from_message(command, message);
    timer.log_received();
    timer
}

/// Wraps one model call with `llm_request` / `llm_response` timing events.
pub async fn log_llm_timing<T, E, F, Fut>(
    provider: &str,
    model: &str,
    operation: &str,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    info!(
        target: TIMING_TARGET,
        "event=llm_request provider={} model={} operation={} started_at={}",
        provider,
        model,
        operation,
        started_at.to_rfc3339()
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    let duration = started_perf.elapsed().as_secs_f64();
    info!(
        target: TIMING_TARGET,
        "event=llm_response provider={} model={} operation={} completed_at={} duration_s={:.3} status={}",
        provider,
        model,
        operation,
        Utc::now().to_rfc3339(),
        duration,
        status
    );

    result
}
