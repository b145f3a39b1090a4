// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Outbound delivery of sign-in links.
//!
//! The mail transport itself is an external collaborator. The service posts
//! a JSON message to a relay endpoint (`MAIL_RELAY_URL`) and treats anything
//! but a 2xx as a delivery failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::MailConfig;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail delivery is not configured")]
    NotConfigured,

    #[error("mail relay request failed: {0}")]
    Transport(String),

    #[error("mail relay rejected the message (status={status})")]
    Rejected { status: u16 },
}

/// A sign-in link addressed to one recipient.
#[derive(Debug, Clone)]
pub struct LinkMessage {
    pub to_email: String,
    pub to_name: Option<String>,
    pub link: String,
    /// `true` for a first sign-up, `false` for a returning user
    pub signup: bool,
}

impl LinkMessage {
    fn subject(&self) -> &'static str {
        if self.signup {
            "Confirm your email to finish signing up"
        } else {
            "Your sign-in link"
        }
    }

    fn text(&self) -> String {
        format!(
            "Use this link to sign in. It expires soon and works once.\n\n{}\n\nIf you did not request it, ignore this email.",
            self.link
        )
    }
}

#[async_trait]
pub trait LinkMailer: Send + Sync {
    async fn send_link(&self, message: &LinkMessage) -> Result<(), MailError>;

    /// Whether a real transport is configured.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Build the mailer for the configured relay.
pub fn from_config(config: &MailConfig, client: reqwest::Client) -> Arc<dyn LinkMailer> {
    match &config.relay_url {
        Some(url) => Arc::new(RelayMailer {
            client,
            url: url.clone(),
            token: config.relay_token.clone(),
            from: config.from.clone(),
        }),
        None => Arc::new(DisabledMailer),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayBody {
    sender: RelayAddress,
    to: Vec<RelayAddress>,
    subject: String,
    text_content: String,
}

/// HTTP JSON relay.
pub struct RelayMailer {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    from: String,
}

#[async_trait]
impl LinkMailer for RelayMailer {
    async fn send_link(&self, message: &LinkMessage) -> Result<(), MailError> {
        let body = RelayBody {
            sender: RelayAddress {
                email: self.from.clone(),
                name: None,
            },
            to: vec![RelayAddress {
                email: message.to_email.clone(),
                name: message.to_name.clone(),
            }],
            subject: message.subject().to_string(),
            text_content: message.text(),
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(to = %message.to_email, "Sign-in link handed to relay");
            return Ok(());
        }
        Err(MailError::Rejected {
            status: status.as_u16(),
        })
    }
}

/// No transport configured; every send fails with [`MailError::NotConfigured`].
pub struct DisabledMailer;

#[async_trait]
impl LinkMailer for DisabledMailer {
    async fn send_link(&self, _message: &LinkMessage) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records messages instead of sending them.
    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        pub(crate) sent: Mutex<Vec<LinkMessage>>,
        pub(crate) fail: bool,
    }

    impl RecordingMailer {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub(crate) fn last_link(&self) -> Option<String> {
            self.sent.lock().unwrap().last().map(|m| m.link.clone())
        }
    }

    #[async_trait]
    impl LinkMailer for RecordingMailer {
        async fn send_link(&self, message: &LinkMessage) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Rejected { status: 503 });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}
