//! Enrollment collaborators: username generation, the mailer interface and
//! the downstream issuance session server.
//!
//! Email delivery (including template rendering and language fallback) and
//! the issuance session protocol live outside this server; both are
//! consumed through the small traits defined here.

use std::collections::HashMap;

use async_trait::async_trait;
use keyshare_types::api::v1::SessionPointer;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const USERNAME_LEN: usize = 11;
const VERIFICATION_TOKEN_LEN: usize = 20;

/// Generates a fresh base62 account name.
pub fn generate_username() -> String {
    random_base62(USERNAME_LEN)
}

/// Generates an email verification token.
pub fn generate_verification_token() -> String {
    random_base62(VERIFICATION_TOKEN_LEN)
}

fn random_base62(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Dynamic trait object for the mailer collaborator.
pub type MailerService = Arc<dyn Mailer + Send + Sync>;

/// Sends the enrollment verification mail. Implementations own template
/// selection and language fallback.
#[async_trait]
pub trait Mailer {
    async fn send_verification_email(
        &self,
        language: &str,
        email: &str,
        token: &str,
    ) -> eyre::Result<()>;
}

/// Dynamic trait object for the issuance session collaborator.
pub type SessionStarterService = Arc<dyn SessionStarter + Send + Sync>;

/// Issuance request handed to the downstream session server: one
/// credential with its attribute values.
#[derive(Clone, Debug, Serialize)]
pub struct CredentialRequest {
    pub credential: String,
    pub attributes: HashMap<String, String>,
}

/// Starts sessions on the downstream issuance server.
#[async_trait]
pub trait SessionStarter {
    /// Starts an issuance session and returns the pointer the client
    /// renders as a QR code.
    async fn start_issuance(&self, request: CredentialRequest) -> eyre::Result<SessionPointer>;
}

#[derive(Serialize)]
struct StartSessionBody {
    #[serde(rename = "type")]
    session_type: String,
    credentials: Vec<CredentialRequest>,
}

#[derive(Deserialize)]
struct StartSessionResponse {
    #[serde(rename = "sessionPtr")]
    session_ptr: SessionPointer,
}

/// [`SessionStarter`] talking to a remote issuance server over its
/// requestor API.
pub struct HttpSessionStarter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionStarter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SessionStarter for HttpSessionStarter {
    async fn start_issuance(&self, request: CredentialRequest) -> eyre::Result<SessionPointer> {
        let url = format!("{}/session", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .json(&StartSessionBody {
                session_type: "issuing".to_owned(),
                credentials: vec![request],
            })
            .send()
            .await?
            .error_for_status()?
            .json::<StartSessionResponse>()
            .await?;
        Ok(response.session_ptr)
    }
}

#[cfg(test)]
pub mod test {
    use parking_lot::Mutex;

    use super::*;

    /// [`SessionStarter`] for tests: returns a fixed pointer and records
    /// every request.
    #[derive(Default)]
    pub struct TestSessionStarter {
        requests: Mutex<Vec<CredentialRequest>>,
    }

    impl TestSessionStarter {
        pub fn requests(&self) -> Vec<CredentialRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl SessionStarter for TestSessionStarter {
        async fn start_issuance(&self, request: CredentialRequest) -> eyre::Result<SessionPointer> {
            self.requests.lock().push(request);
            Ok(SessionPointer {
                url: "http://issuance.test/irma/session/token".to_owned(),
                session_type: "issuing".to_owned(),
            })
        }
    }

    /// [`Mailer`] for tests: records every send.
    #[derive(Default)]
    pub struct TestMailer {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl TestMailer {
        pub fn sent(&self) -> Vec<(String, String, String)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Mailer for TestMailer {
        async fn send_verification_email(
            &self,
            language: &str,
            email: &str,
            token: &str,
        ) -> eyre::Result<()> {
            self.sent
                .lock()
                .push((language.to_owned(), email.to_owned(), token.to_owned()));
            Ok(())
        }
    }

    #[test]
    fn usernames_are_base62_and_fixed_width() {
        let username = generate_username();
        assert_eq!(username.len(), 11);
        assert!(username.bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(generate_username(), username);
    }

    #[test]
    fn verification_tokens_are_base62() {
        let token = generate_verification_token();
        assert_eq!(token.len(), 20);
        assert!(token.bytes().all(|b| b.is_ascii_alphanumeric()));
    }
}
