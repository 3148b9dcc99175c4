// HTTP webhook publisher: POSTs the raw serialized ChangeEvent body with
// X-* headers and an optional HMAC-SHA256 signature over the body, using a
// base64-encoded key. This is the normative payload shape resolving the
// two coexisting shapes in the legacy source in favor of the raw body.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;

use crate::error::{CdcError, Result};
use crate::events::ChangeEvent;
use crate::publishers::{EventSerializer, PublishOutcome, Publisher};

type HmacSha256 = Hmac<Sha256>;

pub struct HttpWebhookPublisher {
    name: String,
    endpoint: String,
    client: Client,
    serializer: Arc<dyn EventSerializer>,
    signing_key: Option<Vec<u8>>,
}

impl HttpWebhookPublisher {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        serializer: Arc<dyn EventSerializer>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client: Client::new(),
            serializer,
            signing_key: None,
        }
    }

    /// `base64_key` is the base64-encoded HMAC-SHA256 signing key, per the
    /// external wire format.
    pub fn with_signing_key(mut self, base64_key: &str) -> Result<Self> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(base64_key)
            .map_err(|e| CdcError::Configuration {
                field: "signing_key".to_string(),
                reason: e.to_string(),
            })?;
        self.signing_key = Some(key);
        Ok(self)
    }

    fn sign(&self, body: &[u8]) -> Option<String> {
        let key = self.signing_key.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(body);
        Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn headers(&self, event: &ChangeEvent) -> Vec<(&'static str, String)> {
        vec![
            ("X-Source", event.source.clone()),
            ("X-Schema", event.schema.clone()),
            ("X-Table", event.table.clone()),
            ("X-Operation", format!("{:?}", event.operation).to_uppercase()),
            ("X-Offset", event.offset.clone()),
            (
                "X-Timestamp",
                crate::events::unix_millis(event.timestamp_utc).to_string(),
            ),
        ]
    }
}

#[async_trait]
impl Publisher for HttpWebhookPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: &ChangeEvent) -> Result<PublishOutcome> {
        let body = match self.serializer.serialize(event) {
            Ok(bytes) => bytes,
            Err(err) => return Ok(PublishOutcome::failed(err.to_string())),
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", self.serializer.content_type());

        for (name, value) in self.headers(event) {
            request = request.header(name, value);
        }
        if let Some(signature) = self.sign(&body) {
            request = request.header("X-Signature", signature);
        }

        match request.body(body).send().await {
            Ok(response) if response.status().is_success() => Ok(PublishOutcome::ok()),
            Ok(response) => Ok(PublishOutcome::failed(format!(
                "webhook responded with status {}",
                response.status()
            ))),
            Err(err) => Ok(PublishOutcome::failed(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerializerFormat;
    use crate::events::Operation;
    use crate::publishers::serializer_for;

    fn event() -> ChangeEvent {
        ChangeEvent::builder("src-A", Operation::Insert)
            .schema("public")
            .table("users")
            .offset("1")
            .build()
            .unwrap()
    }

    #[test]
    fn headers_carry_event_identity() {
        let publisher =
            HttpWebhookPublisher::new("hook", "http://localhost/ingest", serializer_for(SerializerFormat::Json));
        let headers = publisher.headers(&event());
        assert!(headers.contains(&("X-Source", "src-A".to_string())));
        assert!(headers.contains(&("X-Operation", "INSERT".to_string())));
    }

    #[test]
    fn signing_is_deterministic_for_same_body_and_key() {
        let key = base64::engine::general_purpose::STANDARD.encode(b"secret-key");
        let publisher = HttpWebhookPublisher::new(
            "hook",
            "http://localhost/ingest",
            serializer_for(SerializerFormat::Json),
        )
        .with_signing_key(&key)
        .unwrap();

        let sig1 = publisher.sign(b"payload").unwrap();
        let sig2 = publisher.sign(b"payload").unwrap();
        assert_eq!(sig1, sig2);

        let sig3 = publisher.sign(b"different-payload").unwrap();
        assert_ne!(sig1, sig3);
    }

    #[test]
    fn no_signature_without_a_configured_key() {
        let publisher =
            HttpWebhookPublisher::new("hook", "http://localhost/ingest", serializer_for(SerializerFormat::Json));
        assert!(publisher.sign(b"payload").is_none());
    }
}
