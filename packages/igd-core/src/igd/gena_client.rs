//! GENA HTTP client for subscription operations.
//!
//! Handles the HTTP protocol aspects of GENA subscriptions.

use reqwest::{Client, Method};

use super::gena::{GenaError, GenaResult};

/// Response from a successful GENA subscription.
#[derive(Debug)]
pub struct SubscribeResponse {
    /// The subscription ID returned by the publisher.
    pub sid: String,
    /// The timeout value in seconds granted for this subscription.
    pub timeout_secs: u64,
}

/// HTTP client for GENA (UPnP eventing) operations.
///
/// This struct handles only the HTTP protocol aspects.
/// State management is delegated to `GenaSubscriptionStore`.
pub struct GenaClient {
    client: Client,
}

impl GenaClient {
    /// Creates a new GENA client with the given HTTP client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates the HTTP method for SUBSCRIBE requests.
    fn subscribe_method() -> Method {
        // SAFETY: "SUBSCRIBE" is a valid HTTP method name
        Method::from_bytes(b"SUBSCRIBE").expect("SUBSCRIBE is a valid method")
    }

    /// Creates the HTTP method for UNSUBSCRIBE requests.
    fn unsubscribe_method() -> Method {
        // SAFETY: "UNSUBSCRIBE" is a valid HTTP method name
        Method::from_bytes(b"UNSUBSCRIBE").expect("UNSUBSCRIBE is a valid method")
    }

    /// Parses a `Second-N` timeout value. `infinite` and malformed values yield `None`.
    fn parse_timeout(value: &str) -> Option<u64> {
        let value = value.trim();
        if !value.get(..7)?.eq_ignore_ascii_case("Second-") {
            return None;
        }
        value.get(7..)?.parse().ok()
    }

    /// Extracts the granted timeout from a response, falling back to the requested one.
    fn extract_timeout_secs(response: &reqwest::Response, requested: u64) -> u64 {
        response
            .headers()
            .get("TIMEOUT")
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse_timeout)
            .unwrap_or(requested)
    }

    /// Sends a SUBSCRIBE request to create a new subscription.
    ///
    /// # Arguments
    /// * `event_url` - Event subscription URL of the service
    /// * `callback_url` - URL where NOTIFY events should be sent
    /// * `timeout_secs` - Requested subscription duration
    ///
    /// # Returns
    /// The subscription ID (SID) and granted timeout from the publisher's response.
    pub async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
        timeout_secs: u64,
    ) -> GenaResult<SubscribeResponse> {
        let response = self
            .client
            .request(Self::subscribe_method(), event_url)
            .header("CALLBACK", format!("<{}>", callback_url))
            .header("NT", "upnp:event")
            .header("TIMEOUT", format!("Second-{}", timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenaError::SubscriptionFailed(response.status().as_u16()));
        }

        let sid = response
            .headers()
            .get("SID")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(GenaError::MissingSid)?;

        let timeout_secs = Self::extract_timeout_secs(&response, timeout_secs);

        Ok(SubscribeResponse { sid, timeout_secs })
    }

    /// Sends a SUBSCRIBE request to renew an existing subscription.
    ///
    /// # Returns
    /// The new timeout value from the publisher's response.
    pub async fn renew(&self, event_url: &str, sid: &str, timeout_secs: u64) -> GenaResult<u64> {
        let response = self
            .client
            .request(Self::subscribe_method(), event_url)
            .header("SID", sid)
            .header("TIMEOUT", format!("Second-{}", timeout_secs))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenaError::RenewalFailed(response.status().as_u16()));
        }

        Ok(Self::extract_timeout_secs(&response, timeout_secs))
    }

    /// Sends an UNSUBSCRIBE request to cancel a subscription.
    ///
    /// # Returns
    /// `true` if the unsubscribe was successful, `false` if the request failed
    /// (but the subscription should still be removed locally).
    pub async fn unsubscribe(&self, event_url: &str, sid: &str) -> bool {
        match self
            .client
            .request(Self::unsubscribe_method(), event_url)
            .header("SID", sid)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
