pub mod bus;
pub mod notify;

use crate::config::Settings;
use crate::models::Token;

pub use bus::BusPublisher;
pub use notify::Notifier;

/// Best-effort downstream fan-out. A sink whose startup connection fails is
/// disabled for the process lifetime; sink errors never fail the pipeline.
pub struct Sinks {
    pub bus: Option<BusPublisher>,
    pub notifier: Option<Notifier>,
}

impl Sinks {
    pub async fn init(settings: &Settings) -> Self {
        let bus = match &settings.kafka_bootstrap_servers {
            Some(servers) => match BusPublisher::connect(servers, &settings.kafka_topic_prefix) {
                Ok(bus) => {
                    tracing::info!(bootstrap = %servers, "Connected to message bus");
                    Some(bus)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Message bus unavailable, publishing disabled");
                    None
                }
            },
            None => None,
        };

        let notifier = match &settings.telegram_bot_token {
            Some(token) => {
                let destinations = settings.telegram_destinations();
                if destinations.is_empty() {
                    tracing::warn!("Notifier token set but no destinations configured");
                    None
                } else {
                    let notifier = Notifier::new(token.clone(), destinations);
                    match notifier.connect().await {
                        Ok(()) => Some(notifier),
                        Err(e) => {
                            tracing::warn!(error = %e, "Notifier unavailable, notifications disabled");
                            None
                        }
                    }
                }
            }
            None => None,
        };

        Self { bus, notifier }
    }

    /// Fan a freshly persisted token out to the bus and the notifier.
    pub async fn announce_token(&self, token: &Token, chain_name: &str) {
        let token_json = match serde_json::to_value(token) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(token = %token.token_address, error = %e, "Token not serializable");
                return;
            }
        };

        if let Some(bus) = &self.bus {
            if let Err(e) = bus.publish_token_created(token.chain_id, &token_json).await {
                tracing::error!(
                    token = %token.token_address,
                    error = %e,
                    "Failed to publish token-created event"
                );
            }
            if let Err(e) = bus
                .publish_token_audit_request(token.chain_id, &token.token_address, &token_json)
                .await
            {
                tracing::error!(
                    token = %token.token_address,
                    error = %e,
                    "Failed to publish token audit request"
                );
            }
        }

        if let Some(notifier) = &self.notifier {
            let deliveries = notifier.notify_token_created(token, chain_name).await;
            let failed: Vec<&str> = deliveries
                .iter()
                .filter(|(_, ok)| !ok)
                .map(|(chat, _)| chat.as_str())
                .collect();
            if !failed.is_empty() {
                tracing::warn!(
                    token = %token.token_address,
                    failed_destinations = ?failed,
                    "Some notification deliveries failed"
                );
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        if let Some(bus) = &self.bus {
            if !bus.health_check() {
                return false;
            }
        }
        if let Some(notifier) = &self.notifier {
            if notifier.connect().await.is_err() {
                return false;
            }
        }
        true
    }

    pub fn close(&self) {
        if self.bus.is_some() {
            tracing::info!("Message bus publisher shut down");
        }
    }
}
