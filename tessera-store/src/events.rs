use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error};

use tessera_core::DomainEvent;

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                debug!(
                    topic,
                    key,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Event delivered"
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!(topic, error = %e, "Failed to deliver event");
                Err(e)
            }
        }
    }

    /// Serialize a domain event and send it to its topic, keyed so that every
    /// event for one ticket type (or order) lands on the same partition.
    pub async fn publish_event(&self, event: &DomainEvent) -> Result<(), KafkaError> {
        let payload = encode_event(event);
        self.publish(event.topic(), &event.key(), &payload).await
    }
}

pub fn encode_event(event: &DomainEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode event");
        String::from("{}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_shared::OrderConfirmedEvent;
    use uuid::Uuid;

    #[test]
    fn test_event_payload_is_tagged_json() {
        let order_id = Uuid::new_v4();
        let event = DomainEvent::OrderConfirmed(OrderConfirmedEvent {
            order_id,
            event_id: Uuid::new_v4(),
            ticket_ids: vec![Uuid::new_v4()],
            total_amount: 5000,
            currency: "USD".to_string(),
            timestamp: 1_700_000_000,
        });

        let value: serde_json::Value = serde_json::from_str(&encode_event(&event)).unwrap();
        assert_eq!(value["type"], "order_confirmed");
        assert_eq!(value["order_id"], order_id.to_string());
    }
}
