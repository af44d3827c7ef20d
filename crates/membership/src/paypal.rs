//! PayPal webhook signature verification
//!
//! Asks PayPal whether a delivered event really came from it. Callers treat
//! a negative answer or an error as a warning and keep processing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MembershipError, MembershipResult};

pub const DEFAULT_PAYPAL_BASE_URL: &str = "https://api.paypal.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: String,
    pub base_url: String,
}

/// The five `paypal-*` headers PayPal signs each delivery with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmissionHeaders {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    auth_algo: &'a str,
    cert_url: &'a str,
    transmission_id: &'a str,
    transmission_sig: &'a str,
    transmission_time: &'a str,
    webhook_id: &'a str,
    webhook_event: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verification_status: String,
}

#[derive(Clone)]
pub struct PaypalVerifier {
    client: reqwest::Client,
    config: PaypalConfig,
}

impl PaypalVerifier {
    pub fn new(config: PaypalConfig) -> MembershipResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    /// `Ok(true)` only when PayPal answers `SUCCESS`
    pub async fn verify(
        &self,
        headers: &TransmissionHeaders,
        event: &serde_json::Value,
    ) -> MembershipResult<bool> {
        let token = self.access_token().await?;

        let body = VerifyRequest {
            auth_algo: &headers.auth_algo,
            cert_url: &headers.cert_url,
            transmission_id: &headers.transmission_id,
            transmission_sig: &headers.transmission_sig,
            transmission_time: &headers.transmission_time,
            webhook_id: &self.config.webhook_id,
            webhook_event: event,
        };

        let response = self
            .client
            .post(self.url("/v1/notifications/verify-webhook-signature"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(MembershipError::Paypal(format!(
                "signature verification failed ({}): {}",
                status, error_body
            )));
        }

        let result: VerifyResponse = response.json().await?;
        tracing::debug!(
            transmission_id = %headers.transmission_id,
            verification_status = %result.verification_status,
            "PayPal signature checked"
        );
        Ok(result.verification_status == "SUCCESS")
    }

    async fn access_token(&self) -> MembershipResult<String> {
        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(MembershipError::Paypal(format!(
                "access token request failed ({})",
                status
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn verifier(base_url: String) -> PaypalVerifier {
        PaypalVerifier::new(PaypalConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            webhook_id: "WH-123".into(),
            base_url,
        })
        .unwrap()
    }

    fn headers() -> TransmissionHeaders {
        TransmissionHeaders {
            auth_algo: "SHA256withRSA".into(),
            cert_url: "https://api.paypal.com/cert".into(),
            transmission_id: "tx-1".into(),
            transmission_sig: "sig".into(),
            transmission_time: "2024-01-01T00:00:00Z".into(),
        }
    }

    async fn mock_token(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/v1/oauth2/token")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "client_credentials".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"A21AA","token_type":"Bearer"}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_success_status_verifies() {
        let mut server = mockito::Server::new_async().await;
        let token = mock_token(&mut server).await;
        let event = json!({ "id": "WH-EVT", "event_type": "PAYMENT.SALE.COMPLETED" });

        let verify = server
            .mock("POST", "/v1/notifications/verify-webhook-signature")
            .match_header("authorization", "Bearer A21AA")
            .match_body(Matcher::PartialJson(json!({
                "auth_algo": "SHA256withRSA",
                "transmission_id": "tx-1",
                "webhook_id": "WH-123",
                "webhook_event": { "id": "WH-EVT" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"verification_status":"SUCCESS"}"#)
            .create_async()
            .await;

        let ok = verifier(server.url()).verify(&headers(), &event).await.unwrap();

        assert!(ok);
        token.assert_async().await;
        verify.assert_async().await;
    }

    #[tokio::test]
    async fn test_failure_status_does_not_verify() {
        let mut server = mockito::Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let _verify = server
            .mock("POST", "/v1/notifications/verify-webhook-signature")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"verification_status":"FAILURE"}"#)
            .create_async()
            .await;

        let ok = verifier(server.url())
            .verify(&headers(), &json!({}))
            .await
            .unwrap();

        assert!(!ok);
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/v1/oauth2/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let err = verifier(server.url())
            .verify(&headers(), &json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, MembershipError::Paypal(_)));
    }
}
