//! `auth` controller.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{call, request};
use crate::{
    Kuzzle,
    error::{KuzzleError, KuzzleResult},
    protocol::Protocol,
};

/// Result of [`AuthController::check_token`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenValidity {
    pub valid: bool,
    /// Reason the token is invalid, if it is.
    pub state: Option<String>,
    /// Expiration timestamp in milliseconds.
    pub expires_at: Option<i64>,
}

/// Requests against the `auth` controller.
pub struct AuthController<P: Protocol> {
    kuzzle: Kuzzle<P>,
}

impl<P: Protocol> AuthController<P> {
    pub(crate) fn new(kuzzle: Kuzzle<P>) -> Self {
        Self { kuzzle }
    }

    /// Log in with `strategy` and store the returned token on the client.
    pub async fn login(
        &self,
        strategy: &str,
        credentials: Value,
        expires_in: Option<&str>,
    ) -> KuzzleResult<String> {
        let mut request = request("auth", "login");
        request.insert("strategy".to_string(), Value::from(strategy));
        if let Some(expires_in) = expires_in {
            request.insert("expiresIn".to_string(), Value::from(expires_in));
        }
        request.insert("body".to_string(), credentials);

        let result = call(&self.kuzzle, request).await?;
        let jwt = result
            .get("jwt")
            .and_then(Value::as_str)
            .ok_or_else(|| KuzzleError::internal("login result has no jwt"))?
            .to_string();

        debug!(strategy, "Logged in");
        self.kuzzle.set_authentication_token(Some(jwt.clone()));
        Ok(jwt)
    }

    /// Invalidate the current token and forget it.
    pub async fn logout(&self) -> KuzzleResult<()> {
        call(&self.kuzzle, request("auth", "logout")).await?;
        self.kuzzle.set_authentication_token(None);
        Ok(())
    }

    /// Check whether `token` is valid.
    pub async fn check_token(&self, token: &str) -> KuzzleResult<TokenValidity> {
        let mut request = request("auth", "checkToken");
        request.insert("body".to_string(), json!({ "token": token }));
        let result = call(&self.kuzzle, request).await?;
        Ok(serde_json::from_value(result)?)
    }
}
