use super::config::ProviderConfig;
use super::error::ProviderError;
use crate::models::{Account, Channel, QueueItem};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP client for the messaging provider. One send operation per
/// channel, plus the sent-history listings the reconciler consumes.
/// Every request carries the `X-API-KEY` header.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("outreach-engine/0.1")
            .build()
            .map_err(ProviderError::Http)?;

        Ok(Self {
            http: client,
            config,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Verify the API key by listing connected accounts.
    pub async fn healthcheck(&self) -> Result<(), ProviderError> {
        let _: Page<serde_json::Value> = self
            .execute(
                self.http
                    .get(self.endpoint("/accounts"))
                    .query(&[("limit", "1")]),
            )
            .await?;
        Ok(())
    }

    /// Route one queue item to its channel's send endpoint. Exactly one
    /// provider call is made.
    pub async fn send(
        &self,
        account: &Account,
        item: &QueueItem,
    ) -> Result<SendReceipt, ProviderError> {
        match item.channel {
            Channel::Email => self.send_email(account, item).await,
            Channel::LinkedinConnect => self.send_invitation(account, item).await,
            Channel::LinkedinDm => self.send_chat_message(account, item, false).await,
            Channel::LinkedinInmail => self.send_chat_message(account, item, true).await,
        }
    }

    async fn send_email(
        &self,
        account: &Account,
        item: &QueueItem,
    ) -> Result<SendReceipt, ProviderError> {
        let payload = EmailSendRequest {
            account_id: &account.provider_account_id,
            to: vec![EmailAddress {
                identifier: item.recipient.clone(),
            }],
            subject: item.subject.as_deref(),
            body: &item.body,
        };

        self.execute(self.http.post(self.endpoint("/emails")).json(&payload))
            .await
    }

    async fn send_chat_message(
        &self,
        account: &Account,
        item: &QueueItem,
        inmail: bool,
    ) -> Result<SendReceipt, ProviderError> {
        let payload = ChatSendRequest {
            account_id: &account.provider_account_id,
            attendees_ids: vec![item.identity.as_str()],
            text: &item.body,
            subject: item.subject.as_deref(),
            inmail: inmail.then_some(true),
        };

        self.execute(self.http.post(self.endpoint("/chats")).json(&payload))
            .await
    }

    async fn send_invitation(
        &self,
        account: &Account,
        item: &QueueItem,
    ) -> Result<SendReceipt, ProviderError> {
        let payload = InviteRequest {
            account_id: &account.provider_account_id,
            provider_id: &item.identity,
            message: &item.body,
        };

        self.execute(self.http.post(self.endpoint("/users/invite")).json(&payload))
            .await
    }

    /// Outbound entries from the provider's sent history for one
    /// account, newest page only, filtered to entries at or after
    /// `since`. Chat channels walk recent chats and their messages;
    /// email lists sent emails directly.
    pub async fn sent_history(
        &self,
        account: &Account,
        channel: Channel,
        since: DateTime<Utc>,
    ) -> Result<Vec<SentRecord>, ProviderError> {
        match channel {
            Channel::Email => self.sent_emails(account, since).await,
            _ => self.sent_chat_messages(account, since).await,
        }
    }

    async fn sent_chat_messages(
        &self,
        account: &Account,
        since: DateTime<Utc>,
    ) -> Result<Vec<SentRecord>, ProviderError> {
        let limit = self.config.history_page_size.to_string();
        let chats: Page<ChatSummary> = self
            .execute(self.http.get(self.endpoint("/chats")).query(&[
                ("account_id", account.provider_account_id.as_str()),
                ("limit", limit.as_str()),
            ]))
            .await?;

        let mut records = Vec::new();
        for chat in chats.items {
            let messages: Page<ChatMessage> = self
                .execute(
                    self.http
                        .get(self.endpoint(&format!("/chats/{}/messages", chat.id)))
                        .query(&[("limit", limit.as_str())]),
                )
                .await?;

            let recipient = chat
                .attendees
                .iter()
                .find(|attendee| !attendee.is_me)
                .and_then(|attendee| attendee.id.clone());

            for message in messages.items {
                if !message.is_outbound() {
                    continue;
                }
                let Some(sent_at) = message.timestamp else {
                    continue;
                };
                if sent_at < since {
                    continue;
                }
                records.push(SentRecord {
                    provider_message_id: message.id,
                    provider_thread_id: Some(chat.id.clone()),
                    recipient_identity: recipient.clone(),
                    text: message.text,
                    sent_at: Some(sent_at),
                });
            }
        }

        Ok(records)
    }

    async fn sent_emails(
        &self,
        account: &Account,
        since: DateTime<Utc>,
    ) -> Result<Vec<SentRecord>, ProviderError> {
        let limit = self.config.history_page_size.to_string();
        let emails: Page<EmailSummary> = self
            .execute(self.http.get(self.endpoint("/emails")).query(&[
                ("account_id", account.provider_account_id.as_str()),
                ("limit", limit.as_str()),
            ]))
            .await?;

        let records = emails
            .items
            .into_iter()
            .filter(|email| email.date.map(|date| date >= since).unwrap_or(false))
            .map(|email| {
                let recipient = email
                    .to
                    .first()
                    .map(|address| Channel::Email.normalize_identity(&address.identifier));
                SentRecord {
                    provider_message_id: email.tracking_id.or(email.id),
                    provider_thread_id: None,
                    recipient_identity: recipient,
                    text: None,
                    sent_at: email.date,
                }
            })
            .collect();

        Ok(records)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request
            .header("X-API-KEY", &self.config.api_key)
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Service { status, body });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.map_transport(err))?;
        let parsed = serde_json::from_slice(&body)?;
        Ok(parsed)
    }

    fn map_transport(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.config.request_timeout)
        } else {
            ProviderError::Http(err)
        }
    }
}

/// Identifiers assigned by the provider on a successful send. Field
/// names vary by endpoint, so every known spelling is accepted and the
/// accessors pick whichever is populated.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SendReceipt {
    #[serde(default)]
    tracking_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    provider_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    chat_id: Option<String>,
}

impl SendReceipt {
    pub fn message_id(&self) -> Option<&str> {
        self.tracking_id
            .as_deref()
            .or(self.id.as_deref())
            .or(self.message_id.as_deref())
            .or(self.provider_id.as_deref())
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.conversation_id.as_deref().or(self.chat_id.as_deref())
    }
}

/// One outbound entry from the provider's sent history.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub provider_message_id: Option<String>,
    pub provider_thread_id: Option<String>,
    pub recipient_identity: Option<String>,
    pub text: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct EmailSendRequest<'a> {
    account_id: &'a str,
    to: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    body: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct EmailAddress {
    identifier: String,
}

#[derive(Debug, Serialize)]
struct ChatSendRequest<'a> {
    account_id: &'a str,
    attendees_ids: Vec<&'a str>,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inmail: Option<bool>,
}

#[derive(Debug, Serialize)]
struct InviteRequest<'a> {
    account_id: &'a str,
    provider_id: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ChatSummary {
    id: String,
    #[serde(default, alias = "participants")]
    attendees: Vec<ChatAttendee>,
}

#[derive(Debug, Deserialize)]
struct ChatAttendee {
    #[serde(default, alias = "attendee_id")]
    id: Option<String>,
    #[serde(default)]
    is_me: bool,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    is_sender: bool,
    #[serde(default)]
    sender: Option<MessageSender>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct MessageSender {
    #[serde(default)]
    is_me: bool,
}

impl ChatMessage {
    fn is_outbound(&self) -> bool {
        self.is_sender || self.sender.as_ref().map(|s| s.is_me).unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct EmailSummary {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    tracking_id: Option<String>,
    #[serde(default, alias = "to_attendees")]
    to: Vec<EmailAddress>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}
