use std::future::IntoFuture;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId as TgMessageId, ParseMode};
use teloxide::{ApiError, RequestError};

use crate::config::TelegramConfig;
use crate::db::MessageId;
use crate::error::{AppError, AppResult, DeliveryError};

/// The three chat operations the relay performs.
///
/// Implementations report failures as [`DeliveryError`] so the scheduler can
/// tell retryable conditions from permanent ones.
#[async_trait]
pub trait ChatDelivery: Send + Sync {
    /// Post `text` as HTML and return the id of the new message.
    async fn send(&self, chat_id: i64, text: &str) -> Result<MessageId, DeliveryError>;

    async fn edit(
        &self,
        chat_id: i64,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), DeliveryError>;

    async fn delete(&self, chat_id: i64, message_id: MessageId) -> Result<(), DeliveryError>;
}

#[derive(Clone)]
pub struct TelegramService {
    bot: Bot,
    request_timeout: Duration,
}

impl TelegramService {
    pub async fn new(config: &TelegramConfig) -> AppResult<Self> {
        let bot = Bot::new(config.bot_token.clone());

        // Verify the bot token by getting bot info
        match bot.get_me().await {
            Ok(me) => {
                tracing::info!("Telegram bot initialized: @{}", me.username());
                Ok(Self {
                    bot,
                    request_timeout: Duration::from_secs(config.request_timeout_seconds),
                })
            }
            Err(e) => {
                tracing::error!("Failed to initialize Telegram bot: {}", e);
                Err(AppError::Telegram(format!(
                    "Failed to initialize bot: {}",
                    e
                )))
            }
        }
    }

    async fn call<F, T>(&self, request: F) -> Result<T, DeliveryError>
    where
        F: IntoFuture<Output = Result<T, RequestError>>,
    {
        match tokio::time::timeout(self.request_timeout, request.into_future()).await {
            Ok(result) => result.map_err(classify_request_error),
            Err(_) => Err(DeliveryError::Timeout),
        }
    }
}

#[async_trait]
impl ChatDelivery for TelegramService {
    async fn send(&self, chat_id: i64, text: &str) -> Result<MessageId, DeliveryError> {
        let request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);

        let sent = self.call(request).await?;
        tracing::debug!(
            "Telegram message sent to {}: message_id={}",
            chat_id,
            sent.id
        );
        Ok(sent.id.0)
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let request = self
            .bot
            .edit_message_text(ChatId(chat_id), TgMessageId(message_id), text)
            .parse_mode(ParseMode::Html);

        self.call(request).await.map(|_| ())
    }

    async fn delete(&self, chat_id: i64, message_id: MessageId) -> Result<(), DeliveryError> {
        let request = self
            .bot
            .delete_message(ChatId(chat_id), TgMessageId(message_id));

        self.call(request).await.map(|_| ())
    }
}

/// Map a Bot API failure onto the scheduler's retry classes.
pub fn classify_request_error(error: RequestError) -> DeliveryError {
    match error {
        RequestError::RetryAfter(_) => DeliveryError::RateLimited,
        RequestError::Network(ref e) if e.is_timeout() => DeliveryError::Timeout,
        RequestError::Api(ApiError::MessageNotModified) => DeliveryError::NotModified,
        other => DeliveryError::Other(other.to_string()),
    }
}
