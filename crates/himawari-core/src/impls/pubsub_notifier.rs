//! PubSubNotifier - Google Cloud Pub/Sub REST API への publish
//!
//! `POST {endpoint}/v1/projects/{project}/topics/{topic}:publish`
//!
//! 応答の `messageIds` を受け取るまで待ちます。空なら未受領として扱います。

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::NotifierConfig;
use crate::domain::NotifyError;
use crate::ports::{ChangeNotifier, Notification};

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    messages: Vec<PubsubMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct PubsubMessage<'a> {
    data: String,
    #[serde(skip_serializing_if = "no_attributes")]
    attributes: &'a BTreeMap<String, String>,
}

fn no_attributes(attributes: &&BTreeMap<String, String>) -> bool {
    attributes.is_empty()
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    message_ids: Vec<String>,
}

impl<'a> PublishRequest<'a> {
    fn single(notification: &'a Notification) -> Self {
        Self {
            messages: vec![PubsubMessage {
                data: STANDARD.encode(notification.payload.as_bytes()),
                attributes: &notification.attributes,
            }],
        }
    }
}

pub struct PubSubNotifier {
    client: reqwest::Client,
    url: String,
    access_token: Option<SecretString>,
}

impl PubSubNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: format!(
                "{}/v1/{}:publish",
                config.endpoint.trim_end_matches('/'),
                config.topic_path()
            ),
            access_token: config.access_token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChangeNotifier for PubSubNotifier {
    async fn publish(&self, notification: &Notification) -> Result<String, NotifyError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&PublishRequest::single(notification));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: PublishResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::Request(e.to_string()))?;
        body.message_ids
            .into_iter()
            .next()
            .ok_or(NotifyError::NotAcknowledged)
    }
}
