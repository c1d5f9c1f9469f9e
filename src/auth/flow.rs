//! OAuth2 authorization-code flow for installed applications: loopback
//! redirect, PKCE, and the token endpoint exchanges.

use std::path::Path;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::url::Url;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse,
    TokenUrl,
};
use serde::Deserialize;
use tiny_http::{Response, Server};
use tracing::{debug, info};

use super::store::StoredCredentials;
use crate::config::{env_or, TOKEN_URL_ENV};
use crate::error::{redact_response_body, MailError};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CALLBACK_TIMEOUT: StdDuration = StdDuration::from_secs(300);
const CALLBACK_RESPONSE: &str =
    "The authentication flow has completed. You may close this window.";

/// The OAuth client file downloaded from the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

impl ClientSecrets {
    pub fn from_json(raw: &str) -> Result<Self, MailError> {
        let file: ClientSecretsFile = serde_json::from_str(raw)?;
        file.installed.or(file.web).ok_or_else(|| {
            MailError::Config(
                "client secrets file has neither an 'installed' nor a 'web' section".to_string(),
            )
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, MailError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            MailError::Config(format!(
                "read OAuth client secrets {}: {error}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }

    fn from_stored(credentials: &StoredCredentials) -> Self {
        Self {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            auth_uri: default_auth_uri(),
            token_uri: credentials.token_uri.clone(),
        }
    }

    fn token_endpoint(&self) -> String {
        env_or(TOKEN_URL_ENV, &self.token_uri)
    }
}

/// Builds the OAuth client for these secrets. Client credentials travel in
/// the form body, as Google's installed-app clients expect.
pub fn oauth_client(
    secrets: &ClientSecrets,
    redirect_uri: Option<&str>,
) -> Result<BasicClient, MailError> {
    let auth_url = AuthUrl::new(secrets.auth_uri.clone()).map_err(|error| {
        MailError::Config(format!("invalid auth_uri '{}': {error}", secrets.auth_uri))
    })?;
    let token_endpoint = secrets.token_endpoint();
    let token_url = TokenUrl::new(token_endpoint.clone()).map_err(|error| {
        MailError::Config(format!("invalid token_uri '{token_endpoint}': {error}"))
    })?;
    let client_secret = (!secrets.client_secret.is_empty())
        .then(|| ClientSecret::new(secrets.client_secret.clone()));

    let client = BasicClient::new(
        ClientId::new(secrets.client_id.clone()),
        client_secret,
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody);

    match redirect_uri {
        Some(uri) => {
            let redirect = RedirectUrl::new(uri.to_string()).map_err(|error| {
                MailError::Config(format!("invalid redirect uri '{uri}': {error}"))
            })?;
            Ok(client.set_redirect_uri(redirect))
        }
        None => Ok(client),
    }
}

/// Consent URL plus the secrets needed to validate and redeem its redirect.
pub struct AuthorizationRequest {
    pub url: Url,
    pub csrf_state: CsrfToken,
    pub pkce_verifier: PkceCodeVerifier,
}

pub fn authorization_request(client: &BasicClient, scope: &str) -> AuthorizationRequest {
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (url, csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new(scope.to_string()))
        .set_pkce_challenge(pkce_challenge)
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .url();

    AuthorizationRequest {
        url,
        csrf_state,
        pkce_verifier,
    }
}

/// What the identity provider sent back to the loopback redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationCallback {
    Code { code: String, state: Option<String> },
    Denied { error: String },
}

/// Reads a redirect target such as `/?code=..&state=..`.
///
/// Returns `None` for anything else a browser may ask the listener for.
pub fn parse_callback_target(target: &str) -> Option<AuthorizationCallback> {
    let url = Url::parse("http://127.0.0.1/").ok()?.join(target).ok()?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => Some(AuthorizationCallback::Denied { error }),
        (Some(code), None) => Some(AuthorizationCallback::Code { code, state }),
        (None, None) => None,
    }
}

/// Loopback HTTP listener that receives the consent redirect.
pub struct RedirectListener {
    server: Server,
    redirect_uri: String,
}

impl RedirectListener {
    pub fn bind_loopback() -> Result<Self, MailError> {
        let server = Server::http("127.0.0.1:0").map_err(|error| {
            MailError::Auth(format!("bind loopback redirect listener: {error}"))
        })?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|address| address.port())
            .ok_or_else(|| MailError::Auth("loopback listener has no TCP port".to_string()))?;

        Ok(Self {
            server,
            redirect_uri: format!("http://127.0.0.1:{port}/"),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Blocks until a redirect carrying a code or an error arrives.
    ///
    /// Other requests (favicon lookups, speculative preconnects) are answered
    /// and skipped.
    pub fn wait_for_callback(
        &self,
        wait: StdDuration,
    ) -> Result<(String, Option<String>), MailError> {
        let started = Instant::now();
        loop {
            let remaining = wait.checked_sub(started.elapsed()).ok_or_else(|| {
                MailError::Auth(format!(
                    "no authorization received within {}s",
                    wait.as_secs()
                ))
            })?;
            let Some(request) = self.server.recv_timeout(remaining)? else {
                continue;
            };

            let callback = parse_callback_target(request.url());
            debug!(
                "loopback request {} {}",
                request.method(),
                request.url().split('?').next().unwrap_or_default()
            );
            let response = match &callback {
                Some(_) => Response::from_string(CALLBACK_RESPONSE),
                None => Response::from_string("Not found").with_status_code(404),
            };
            if let Err(error) = request.respond(response) {
                debug!("loopback response not delivered: {error}");
            }

            match callback {
                Some(AuthorizationCallback::Code { code, state }) => return Ok((code, state)),
                Some(AuthorizationCallback::Denied { error }) => {
                    return Err(MailError::Auth(format!("authorization denied: {error}")))
                }
                None => continue,
            }
        }
    }
}

/// Runs the interactive consent flow and returns fresh credentials.
pub async fn run_installed_app_flow(
    secrets: &ClientSecrets,
    scope: &str,
) -> Result<StoredCredentials, MailError> {
    let listener = RedirectListener::bind_loopback()?;
    let client = oauth_client(secrets, Some(listener.redirect_uri()))?;
    let AuthorizationRequest {
        url,
        csrf_state,
        pkce_verifier,
    } = authorization_request(&client, scope);

    eprintln!("Please visit this URL to authorize this application: {url}");
    if let Err(error) = open::that(url.as_str()) {
        debug!("could not open a browser: {error}");
    }

    let (code, returned_state) =
        tokio::task::spawn_blocking(move || listener.wait_for_callback(CALLBACK_TIMEOUT))
            .await
            .map_err(|error| MailError::Auth(format!("redirect listener stopped: {error}")))??;

    if returned_state.as_deref() != Some(csrf_state.secret().as_str()) {
        return Err(MailError::Auth(
            "authorization state mismatch; possible CSRF, aborting".to_string(),
        ));
    }

    info!("authorization code received, exchanging for tokens");
    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pkce_verifier)
        .request_async(async_http_client)
        .await
        .map_err(|error| token_error(&secrets.token_endpoint(), error))?;

    Ok(StoredCredentials {
        access_token: token.access_token().secret().clone(),
        refresh_token: token.refresh_token().map(|token| token.secret().clone()),
        token_uri: secrets.token_uri.clone(),
        client_id: secrets.client_id.clone(),
        client_secret: secrets.client_secret.clone(),
        scopes: granted_scopes(&token).unwrap_or_else(|| vec![scope.to_string()]),
        expiry: token.expires_in().map(expiry_from_now),
    })
}

/// Exchanges the stored refresh token for a new access token.
///
/// The refresh token is carried over when the provider does not rotate it.
pub async fn refresh_credentials(
    current: &StoredCredentials,
) -> Result<StoredCredentials, MailError> {
    let refresh_token = current
        .refresh_token
        .as_deref()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| MailError::Auth("no refresh token available".to_string()))?;

    let secrets = ClientSecrets::from_stored(current);
    let token = oauth_client(&secrets, None)?
        .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
        .request_async(async_http_client)
        .await
        .map_err(|error| token_error(&secrets.token_endpoint(), error))?;

    Ok(StoredCredentials {
        access_token: token.access_token().secret().clone(),
        refresh_token: token
            .refresh_token()
            .map(|token| token.secret().clone())
            .or_else(|| current.refresh_token.clone()),
        token_uri: current.token_uri.clone(),
        client_id: current.client_id.clone(),
        client_secret: current.client_secret.clone(),
        scopes: granted_scopes(&token).unwrap_or_else(|| current.scopes.clone()),
        expiry: token.expires_in().map(expiry_from_now),
    })
}

fn token_error<E>(token_url: &str, error: RequestTokenError<E, BasicErrorResponse>) -> MailError
where
    E: std::error::Error + 'static,
{
    let detail = match &error {
        RequestTokenError::ServerResponse(response) => format!("rejected: {response}"),
        RequestTokenError::Request(inner) => format!("request failed: {inner}"),
        RequestTokenError::Parse(inner, body) => format!(
            "decode response: {inner}; body={}",
            redact_response_body(&String::from_utf8_lossy(body))
        ),
        RequestTokenError::Other(message) => message.clone(),
    };
    MailError::Auth(format!("oauth token request to {token_url} {detail}"))
}

fn expiry_from_now(expires_in: StdDuration) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in.as_secs().min(u64::from(u32::MAX)) as i64)
}

fn granted_scopes(token: &BasicTokenResponse) -> Option<Vec<String>> {
    token
        .scopes()
        .map(|scopes| scopes.iter().map(|scope| scope.to_string()).collect())
}
