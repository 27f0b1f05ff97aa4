// Captcha verification gate
//
// The production verifier POSTs the client token to a remote verification
// endpoint; the no-op verifier accepts everything and backs the dev
// profile. Verifier transport errors are distinct from a rejected token.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptchaError {
    #[error("Captcha verifier unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// true when the token passes verification
    async fn verify(&self, token: &str, client_ip: Option<&str>) -> Result<bool, CaptchaError>;
}

/// Remote HTTP verifier (hCaptcha/turnstile-style form POST)
pub struct HttpCaptchaVerifier {
    client: reqwest::Client,
    verify_url: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
}

impl HttpCaptchaVerifier {
    pub fn new(verify_url: String, secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            verify_url,
            secret,
        }
    }
}

#[async_trait]
impl CaptchaVerifier for HttpCaptchaVerifier {
    async fn verify(&self, token: &str, client_ip: Option<&str>) -> Result<bool, CaptchaError> {
        let mut form = vec![
            ("secret", self.secret.as_str()),
            ("response", token),
        ];
        if let Some(ip) = client_ip {
            form.push(("remoteip", ip));
        }

        let response = self
            .client
            .post(&self.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CaptchaError::Unavailable(e.to_string()))?;

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| CaptchaError::Unavailable(e.to_string()))?;

        Ok(body.success)
    }
}

/// Accept-everything verifier for dev profiles and tests
pub struct NoopCaptchaVerifier;

#[async_trait]
impl CaptchaVerifier for NoopCaptchaVerifier {
    async fn verify(&self, _token: &str, _client_ip: Option<&str>) -> Result<bool, CaptchaError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_verifier_accepts() {
        let verifier = NoopCaptchaVerifier;
        assert!(verifier.verify("anything", None).await.unwrap());
    }
}
