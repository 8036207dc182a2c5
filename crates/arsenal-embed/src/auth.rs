use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::VertexCredentials;
use crate::error::ProviderError;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const CLI_TOKEN_LIFETIME: Duration = Duration::from_secs(50 * 60);
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Acquires and caches bearer tokens for the Vertex prediction endpoint.
pub struct TokenSource {
    credentials: VertexCredentials,
    client: Client,
    timeout: Duration,
    cli: CliCommand,
    cached: Mutex<Option<CachedToken>>,
}

struct CliCommand {
    program: String,
    args: Vec<String>,
}

impl Default for CliCommand {
    fn default() -> Self {
        Self {
            program: "gcloud".to_string(),
            args: vec!["auth".to_string(), "print-access-token".to_string()],
        }
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl TokenSource {
    /// `timeout` bounds the `gcloud` subprocess; HTTP exchanges use the
    /// client's own timeout.
    pub fn new(credentials: VertexCredentials, client: Client, timeout: Duration) -> Self {
        Self {
            credentials,
            client,
            timeout,
            cli: CliCommand::default(),
            cached: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_cli_command(mut self, program: &str, args: &[&str]) -> Self {
        self.cli = CliCommand {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        };
        self
    }

    pub async fn token(&self) -> Result<String, ProviderError> {
        if let VertexCredentials::StaticToken(token) = &self.credentials {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(tok) = cached.as_ref() {
            if tok.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(tok.value.clone());
            }
        }

        let (value, lifetime) = match &self.credentials {
            VertexCredentials::StaticToken(token) => return Ok(token.clone()),
            VertexCredentials::GcloudCli => (
                cli_access_token(&self.cli, self.timeout).await?,
                CLI_TOKEN_LIFETIME,
            ),
            VertexCredentials::ServiceAccountFile(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    ProviderError::Auth(format!(
                        "cannot read service account key {}: {e}",
                        path.display()
                    ))
                })?;
                self.exchange_service_account(&raw).await?
            }
            VertexCredentials::ServiceAccountJson(raw) => {
                self.exchange_service_account(raw).await?
            }
        };

        debug!(lifetime_secs = lifetime.as_secs(), "acquired vertex access token");
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn exchange_service_account(
        &self,
        raw_key: &str,
    ) -> Result<(String, Duration), ProviderError> {
        let key: ServiceAccountKey = serde_json::from_str(raw_key)
            .map_err(|e| ProviderError::Auth(format!("invalid service account key: {e}")))?;
        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let assertion = sign_assertion(&key, token_uri, unix_now())?;

        let res = self
            .client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let parsed: TokenResponse = res.json().await?;
        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS));
        Ok((parsed.access_token, lifetime))
    }
}

async fn cli_access_token(cli: &CliCommand, timeout: Duration) -> Result<String, ProviderError> {
    let child = Command::new(&cli.program)
        .args(&cli.args)
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| {
            ProviderError::Timeout(format!(
                "gcloud did not print a token within {}ms",
                timeout.as_millis()
            ))
        })?
        .map_err(|e| ProviderError::Auth(format!("failed to run gcloud: {e}")))?;
    if !output.status.success() {
        return Err(ProviderError::Auth(format!(
            "gcloud exited with {}",
            output.status
        )));
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(ProviderError::Auth(
            "gcloud printed an empty access token".to_string(),
        ));
    }
    Ok(token)
}

fn sign_assertion(
    key: &ServiceAccountKey,
    audience: &str,
    now: u64,
) -> Result<String, ProviderError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: audience,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| ProviderError::Auth(format!("invalid service account private key: {e}")))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| ProviderError::Auth(format!("failed to sign token assertion: {e}")))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = include_str!("../tests/fixtures/test_rsa_key.pem");

    fn key_json(token_uri: &str) -> String {
        serde_json::json!({
            "type": "service_account",
            "client_email": "bridge@example-project.iam.gserviceaccount.com",
            "private_key": TEST_KEY,
            "token_uri": token_uri,
        })
        .to_string()
    }

    #[tokio::test]
    async fn static_token_is_returned_verbatim() {
        let source = TokenSource::new(
            VertexCredentials::StaticToken("ya29.static".to_string()),
            Client::new(),
            Duration::from_secs(5),
        );
        assert_eq!(source.token().await.expect("token"), "ya29.static");
    }

    #[tokio::test]
    async fn service_account_exchange_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("jwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.exchanged",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = TokenSource::new(
            VertexCredentials::ServiceAccountJson(key_json(&format!("{}/token", server.uri()))),
            Client::new(),
            Duration::from_secs(5),
        );
        assert_eq!(source.token().await.expect("first"), "ya29.exchanged");
        assert_eq!(source.token().await.expect("cached"), "ya29.exchanged");
    }

    #[tokio::test]
    async fn rejected_exchange_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let source = TokenSource::new(
            VertexCredentials::ServiceAccountJson(key_json(&format!("{}/token", server.uri()))),
            Client::new(),
            Duration::from_secs(5),
        );
        let err = source.token().await.expect_err("exchange should fail");
        assert!(matches!(err, ProviderError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn hung_cli_is_killed_at_the_timeout() {
        let source = TokenSource::new(
            VertexCredentials::GcloudCli,
            Client::new(),
            Duration::from_millis(200),
        )
        .with_cli_command("sh", &["-c", "sleep 30"]);

        let started = Instant::now();
        let err = source.token().await.expect_err("cli should time out");
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cli_token_is_trimmed_and_cached() {
        let source = TokenSource::new(
            VertexCredentials::GcloudCli,
            Client::new(),
            Duration::from_secs(5),
        )
        .with_cli_command("sh", &["-c", "echo ya29.from-cli"]);

        assert_eq!(source.token().await.expect("first"), "ya29.from-cli");
        assert_eq!(source.token().await.expect("cached"), "ya29.from-cli");
    }

    #[tokio::test]
    async fn failing_cli_is_an_auth_error() {
        let source = TokenSource::new(
            VertexCredentials::GcloudCli,
            Client::new(),
            Duration::from_secs(5),
        )
        .with_cli_command("sh", &["-c", "exit 3"]);

        let err = source.token().await.expect_err("cli should fail");
        assert!(matches!(err, ProviderError::Auth(_)));
    }

    #[test]
    fn malformed_key_is_an_auth_error() {
        let key = ServiceAccountKey {
            client_email: "x@y".to_string(),
            private_key: "not a pem".to_string(),
            token_uri: None,
        };
        let err = sign_assertion(&key, DEFAULT_TOKEN_URI, 0).expect_err("bad key");
        assert!(matches!(err, ProviderError::Auth(_)));
    }
}
