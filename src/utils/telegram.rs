use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatAction;
use tokio::task::JoinHandle;
use tracing::warn;

const TYPING_REFRESH_INTERVAL: Duration = Duration::from_secs(4);

/// Keeps the "typing…" indicator alive until dropped.
pub struct TypingIndicator {
    task_handle: Option<JoinHandle<()>>,
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

pub fn start_typing_indicator(bot: Bot, chat_id: ChatId) -> TypingIndicator {
    let task_handle = tokio::spawn(async move {
        loop {
            if let Err(err) = bot.send_chat_action(chat_id, ChatAction::Typing).await {
                warn!("send_chat_action failed: {err}");
            }
            tokio::time::sleep(TYPING_REFRESH_INTERVAL).await;
        }
    });

    TypingIndicator {
        task_handle: Some(task_handle),
    }
}
