use futures::future::join_all;
use std::time::Duration;

use crate::models::{Token, TokenSource};

const API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Telegram notifier: HTML messages delivered concurrently to every
/// configured chat id, reporting per-destination success.
pub struct Notifier {
    http: reqwest::Client,
    bot_token: String,
    chat_ids: Vec<String>,
}

impl Notifier {
    pub fn new(bot_token: String, chat_ids: Vec<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_ids,
        }
    }

    /// Probe the bot credentials with `getMe`.
    pub async fn connect(&self) -> eyre::Result<()> {
        let url = format!("{API_BASE}/bot{}/getMe", self.bot_token);
        let response = self
            .http
            .get(&url)
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|e| eyre::eyre!("notifier unreachable: {e}"))?;
        if !response.status().is_success() {
            return Err(eyre::eyre!("notifier auth failed: HTTP {}", response.status()));
        }
        Ok(())
    }

    /// Deliver a new-token message to every destination; returns
    /// `(chat_id, delivered)` per destination.
    pub async fn notify_token_created(
        &self,
        token: &Token,
        chain_name: &str,
    ) -> Vec<(String, bool)> {
        let text = format_token_message(token, chain_name);
        let sends = self.chat_ids.iter().map(|chat_id| {
            let text = text.clone();
            async move {
                let delivered = self.send_message(chat_id, &text).await;
                (chat_id.clone(), delivered)
            }
        });
        join_all(sends).await
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> bool {
        let url = format!("{API_BASE}/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        match self
            .http
            .post(&url)
            .timeout(SEND_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(chat_id, status = %response.status(), "Notification rejected");
                false
            }
            Err(e) => {
                tracing::warn!(chat_id, error = %e, "Notification delivery failed");
                false
            }
        }
    }
}

/// Minimal HTML rendering of a token launch.
fn format_token_message(token: &Token, chain_name: &str) -> String {
    let source = match token.source {
        TokenSource::CreatorCoin => "Creator Coin",
        TokenSource::Clanker => "Clanker",
    };
    format!(
        "<b>New {source} on {chain}</b>\n\
         <b>{name}</b> ({symbol})\n\
         Address: <code>{address}</code>\n\
         Creator: <code>{creator}</code>\n\
         Block: {block}\n\
         Tx: <code>{tx}</code>",
        source = source,
        chain = escape_html(chain_name),
        name = escape_html(&token.name),
        symbol = escape_html(&token.symbol),
        address = token.token_address,
        creator = token.creator,
        block = token.creation_block,
        tx = token.creation_tx_hash,
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenStatus;
    use chrono::Utc;

    fn token() -> Token {
        Token {
            chain_id: 8453,
            token_address: "0xToken".to_string(),
            source: TokenSource::Clanker,
            name: "A <b>Token".to_string(),
            symbol: "T&T".to_string(),
            creator: "0xCreator".to_string(),
            admin: None,
            payout_recipient: None,
            platform_referrer: None,
            base_currency: None,
            paired_token: None,
            pool_id: None,
            pool_key_hash: None,
            fee_tier: None,
            tick_spacing: None,
            starting_tick: None,
            hooks_address: None,
            image_url: None,
            metadata_uri: None,
            metadata_json: None,
            context_json: None,
            locker_address: None,
            mev_module: None,
            contract_version: None,
            creation_block: 42,
            creation_tx_hash: "0xtx".to_string(),
            creation_timestamp: Utc::now(),
            creation_contract: "0xcontract".to_string(),
            status: TokenStatus::Active,
            error_message: None,
            raw_event: serde_json::json!({}),
        }
    }

    #[test]
    fn message_escapes_html_in_user_content() {
        let text = format_token_message(&token(), "base");
        assert!(text.contains("A &lt;b&gt;Token"));
        assert!(text.contains("T&amp;T"));
        assert!(text.contains("<code>0xToken</code>"));
        assert!(text.contains("Clanker"));
    }
}
