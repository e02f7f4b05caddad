// src/connection/auth.rs

//! SASL authentication seam. A provider mints one authenticator per
//! connection; the connection drives it through the AUTHENTICATE /
//! AUTH_CHALLENGE / AUTH_SUCCESS exchange.

use crate::core::errors::ZirconError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;

/// Per-connection authentication state machine.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The token sent in the first AUTH_RESPONSE.
    async fn initial_response(&mut self) -> Result<Option<Bytes>, ZirconError>;

    /// The token answering an AUTH_CHALLENGE.
    async fn evaluate_challenge(
        &mut self,
        challenge: Option<Bytes>,
    ) -> Result<Option<Bytes>, ZirconError>;

    /// Final server token on AUTH_SUCCESS; most mechanisms ignore it.
    async fn on_success(&mut self, _token: Option<Bytes>) -> Result<(), ZirconError> {
        Ok(())
    }
}

/// Factory for per-connection authenticators.
pub trait AuthProvider: Send + Sync + fmt::Debug {
    /// Called when a server requests authentication; `authenticator_class`
    /// is the server-reported class name from the AUTHENTICATE frame.
    fn new_authenticator(
        &self,
        authenticator_class: &str,
    ) -> Result<Box<dyn Authenticator>, ZirconError>;

    /// Credentials for the protocol v1 CREDENTIALS opcode.
    fn v1_credentials(&self) -> Option<HashMap<String, String>> {
        None
    }
}

/// SASL PLAIN, the mechanism of `PasswordAuthenticator` and DSE's unified
/// authentication in plain mode.
#[derive(Clone)]
pub struct PlainTextAuthProvider {
    username: String,
    password: String,
}

impl PlainTextAuthProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for PlainTextAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never log the password.
        f.debug_struct("PlainTextAuthProvider")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl AuthProvider for PlainTextAuthProvider {
    fn new_authenticator(
        &self,
        _authenticator_class: &str,
    ) -> Result<Box<dyn Authenticator>, ZirconError> {
        Ok(Box::new(PlainTextAuthenticator {
            username: self.username.clone(),
            password: self.password.clone(),
        }))
    }

    fn v1_credentials(&self) -> Option<HashMap<String, String>> {
        let mut credentials = HashMap::with_capacity(2);
        credentials.insert("username".to_owned(), self.username.clone());
        credentials.insert("password".to_owned(), self.password.clone());
        Some(credentials)
    }
}

struct PlainTextAuthenticator {
    username: String,
    password: String,
}

impl PlainTextAuthenticator {
    fn token(&self) -> Bytes {
        // RFC 4616: authzid NUL authcid NUL passwd, authzid left empty.
        let mut token = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        token.push(0);
        token.extend_from_slice(self.username.as_bytes());
        token.push(0);
        token.extend_from_slice(self.password.as_bytes());
        Bytes::from(token)
    }
}

#[async_trait]
impl Authenticator for PlainTextAuthenticator {
    async fn initial_response(&mut self) -> Result<Option<Bytes>, ZirconError> {
        Ok(Some(self.token()))
    }

    async fn evaluate_challenge(
        &mut self,
        _challenge: Option<Bytes>,
    ) -> Result<Option<Bytes>, ZirconError> {
        // PLAIN is a single-round mechanism; a challenge means the server
        // expects a different mechanism.
        Err(ZirconError::Authentication(
            "Unexpected AUTH_CHALLENGE during SASL PLAIN exchange".into(),
        ))
    }
}
