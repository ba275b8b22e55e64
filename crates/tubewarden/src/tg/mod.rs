//! The only part of the Telegram Bot API we talk to: the identity of the bot.

use crate::config::{BotToken, ConfigError, TgConfig};
use crate::error::err;
use crate::health::{BotIdentity, IdentityCheck};
use crate::prelude::*;
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::{ApiError, RequestError};

/// Checks the identity of the bot by calling `getMe`.
///
/// If Telegram rejects the token, the check fails with
/// [`ConfigError::RejectedBotToken`], because no amount of retries will help.
pub struct TelegramIdentity {
    bot: Bot,
    token: BotToken,
}

impl TelegramIdentity {
    pub fn new(cfg: &TgConfig, timeout: Duration) -> Result<Self> {
        // The default client from teloxide has a long timeout suitable for
        // long polling, it's too much for a quick liveness check
        let client = teloxide::net::default_reqwest_settings()
            .timeout(timeout)
            .build()
            .fatal_ctx(|| "Failed to create an HTTP client for the Telegram Bot API")?;

        let mut bot = Bot::with_client(cfg.token.expose(), client);

        if let Some(api_url) = &cfg.api_url {
            bot = bot.set_api_url(api_url.clone());
        }

        Ok(Self {
            bot,
            token: cfg.token.clone(),
        })
    }
}

#[async_trait]
impl IdentityCheck for TelegramIdentity {
    async fn identify(&self) -> Result<BotIdentity> {
        let me = self.bot.get_me().await.map_err(|source| -> Error {
            if is_token_rejected(&source) {
                return err!(ConfigError::RejectedBotToken {
                    token: self.token.clone(),
                    source,
                });
            }
            source.into()
        })?;

        Ok(BotIdentity {
            id: me.user.id.0,
            username: me.user.username.clone(),
        })
    }
}

/// Returns `true` if Telegram says the token is not valid. Restarting the
/// process won't help in this case, the token must be fixed by a human.
pub(crate) fn is_token_rejected(err: &RequestError) -> bool {
    match err {
        // Telegram answers "401 Unauthorized" to a bad token
        RequestError::Api(ApiError::NotFound) => true,
        RequestError::Api(ApiError::Unknown(message)) => {
            message.contains("Unauthorized") || message.contains("Not Found")
        }
        _ => false,
    }
}
