use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub fn created_topic(prefix: &str) -> String {
    format!("{prefix}.token.created")
}

pub fn audit_topic(prefix: &str) -> String {
    format!("{prefix}.token.audit_request")
}

/// Partition key; keeps per-token ordering on the bus.
pub fn message_key(chain_id: i64, token_address: &str) -> String {
    format!("{chain_id}:{token_address}")
}

/// Kafka producer for token lifecycle events. `acks=all` so a published event
/// survives broker failover.
pub struct BusPublisher {
    producer: FutureProducer,
    topic_prefix: String,
}

impl BusPublisher {
    pub fn connect(bootstrap_servers: &str, topic_prefix: &str) -> eyre::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("acks", "all")
            .set("message.timeout.ms", "60000")
            .set("request.timeout.ms", "30000")
            .set("retry.backoff.ms", "1000")
            .create()
            .map_err(|e| eyre::eyre!("failed to create Kafka producer: {e}"))?;

        Ok(Self {
            producer,
            topic_prefix: topic_prefix.to_string(),
        })
    }

    pub async fn publish_token_created(
        &self,
        chain_id: i64,
        token: &serde_json::Value,
    ) -> eyre::Result<()> {
        let envelope = serde_json::json!({
            "event_type": "token_created",
            "chain_id": chain_id,
            "timestamp": Utc::now().to_rfc3339(),
            "token": token,
        });
        let token_address = token
            .get("token_address")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        self.send(
            &created_topic(&self.topic_prefix),
            &message_key(chain_id, token_address),
            &envelope,
        )
        .await
    }

    pub async fn publish_token_audit_request(
        &self,
        chain_id: i64,
        token_address: &str,
        token: &serde_json::Value,
    ) -> eyre::Result<()> {
        let envelope = serde_json::json!({
            "event_type": "token_audit_request",
            "chain_id": chain_id,
            "token_address": token_address,
            "timestamp": Utc::now().to_rfc3339(),
            "token_data": token,
            "priority": "normal",
        });

        self.send(
            &audit_topic(&self.topic_prefix),
            &message_key(chain_id, token_address),
            &envelope,
        )
        .await
    }

    async fn send(&self, topic: &str, key: &str, payload: &serde_json::Value) -> eyre::Result<()> {
        let body = serde_json::to_vec(payload)?;
        let record = FutureRecord::to(topic).key(key).payload(&body);

        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map_err(|(e, _)| eyre::eyre!("Kafka send to {topic} failed: {e}"))?;

        tracing::debug!(topic, key, "Published bus event");
        Ok(())
    }

    pub fn health_check(&self) -> bool {
        // The producer reconnects lazily; creation succeeding is the signal.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_and_keys_follow_wire_contract() {
        assert_eq!(created_topic("poolwatch"), "poolwatch.token.created");
        assert_eq!(audit_topic("poolwatch"), "poolwatch.token.audit_request");
        assert_eq!(message_key(8453, "0xabc"), "8453:0xabc");
    }
}
