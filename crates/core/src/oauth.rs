use chrono::{Duration, Utc};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::time::Instant;
use url::Url;

use crate::credential::{ClientSecrets, Credential, REQUIRED_SCOPES};
use crate::error::{GatewayError, Result};

const DEFAULT_EXPIRES_IN: i64 = 3600;
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);
const REDIRECT_READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

const REDIRECT_PAGE: &str = "<html><body><h3>gsuite-tools is authorized.</h3>\
<p>You can close this window.</p></body></html>";

pub trait AuthFlow: Send + Sync {
    fn refresh(&self, credential: &Credential) -> Result<Credential>;
    fn consent(&self) -> Result<Credential>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Installed-app OAuth: loopback redirect for consent, form POST for refresh.
pub struct GoogleAuthFlow {
    http: Client,
    client_secret_path: PathBuf,
    consent_timeout: std::time::Duration,
}

impl GoogleAuthFlow {
    pub fn new(
        http: Client,
        client_secret_path: impl Into<PathBuf>,
        consent_timeout: std::time::Duration,
    ) -> Self {
        Self {
            http,
            client_secret_path: client_secret_path.into(),
            consent_timeout,
        }
    }

    fn secrets(&self) -> Result<ClientSecrets> {
        ClientSecrets::load(&self.client_secret_path)
    }

    fn post_token(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self.http.post(token_uri).form(form).send().map_err(|e| {
            if e.is_timeout() {
                GatewayError::auth(format!("token endpoint timed out: {}", e))
            } else {
                GatewayError::auth(format!("token endpoint unreachable: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GatewayError::auth(token_error_message(status.as_u16(), &body)));
        }

        response
            .json()
            .map_err(|e| GatewayError::auth(format!("malformed token response: {}", e)))
    }

    fn wait_for_code(&self, listener: &TcpListener, state: &str) -> Result<String> {
        listener
            .set_nonblocking(true)
            .map_err(|e| GatewayError::auth(format!("redirect listener failed: {}", e)))?;
        let started = Instant::now();

        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Some(outcome) = handle_redirect(stream, state) {
                        return outcome;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if started.elapsed() >= self.consent_timeout {
                        return Err(GatewayError::auth(format!(
                            "no authorization received within {}s",
                            self.consent_timeout.as_secs()
                        )));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(GatewayError::auth(format!("redirect listener failed: {}", e)))
                }
            }
        }
    }
}

impl AuthFlow for GoogleAuthFlow {
    fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| GatewayError::auth("credential has no refresh token"))?;
        let secrets = self.secrets()?;

        tracing::info!("refreshing access token");
        let response = self.post_token(
            &secrets.token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
            ],
        )?;

        Ok(credential_from_response(response, Some(credential)))
    }

    fn consent(&self) -> Result<Credential> {
        let secrets = self.secrets()?;
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| GatewayError::auth(format!("cannot open redirect listener: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| GatewayError::auth(format!("cannot open redirect listener: {}", e)))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{}/", port);
        let state = consent_state()?;

        let url = authorization_url(&secrets, &redirect_uri, &state)?;
        tracing::info!(port, "waiting for browser consent");
        eprintln!(
            "Open this URL in a browser to authorize gsuite-tools:\n\n{}\n",
            url
        );

        let code = self.wait_for_code(&listener, &state)?;
        let response = self.post_token(
            &secrets.token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
            ],
        )?;

        tracing::info!("consent flow completed");
        Ok(credential_from_response(response, None))
    }
}

fn credential_from_response(response: TokenResponse, previous: Option<&Credential>) -> Credential {
    let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
    let scopes = match response.scope {
        Some(s) => s.split_whitespace().map(str::to_string).collect(),
        None => previous
            .map(|p| p.scopes.clone())
            .unwrap_or_else(|| REQUIRED_SCOPES.iter().map(|s| s.to_string()).collect()),
    };

    Credential {
        access_token: response.access_token,
        refresh_token: response
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
        expiry: Utc::now() + Duration::seconds(expires_in),
        scopes,
    }
}

fn token_error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) => match err.error_description {
            Some(desc) => format!("token endpoint returned {}: {} ({})", status, err.error, desc),
            None => format!("token endpoint returned {}: {}", status, err.error),
        },
        Err(_) => format!("token endpoint returned {}", status),
    }
}

fn authorization_url(secrets: &ClientSecrets, redirect_uri: &str, state: &str) -> Result<Url> {
    let scope = REQUIRED_SCOPES.join(" ");
    Url::parse_with_params(
        &secrets.auth_uri,
        &[
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )
    .map_err(|e| GatewayError::auth(format!("invalid auth_uri {}: {}", secrets.auth_uri, e)))
}

fn consent_state() -> Result<String> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| GatewayError::auth(format!("no randomness for OAuth state: {}", e)))?;
    Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

// `None`: not the redirect (idle preconnect, favicon), keep waiting.
fn handle_redirect(stream: TcpStream, state: &str) -> Option<Result<String>> {
    let mut request_line = String::new();
    let read = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(REDIRECT_READ_TIMEOUT)))
        .and_then(|_| BufReader::new(&stream).read_line(&mut request_line));
    if let Err(e) = read {
        tracing::debug!(error = %e, "ignoring loopback connection");
        return None;
    }

    let outcome = parse_redirect(&request_line, state);
    let (status, body) = match &outcome {
        Some(Ok(_)) => ("200 OK", REDIRECT_PAGE),
        Some(Err(_)) => ("400 Bad Request", "Authorization failed. Check the terminal."),
        None => ("404 Not Found", ""),
    };

    let mut writer = &stream;
    let written = write!(
        writer,
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    )
    .and_then(|_| writer.flush());
    if let Err(e) = written {
        tracing::debug!(error = %e, "could not answer loopback request");
    }

    outcome
}

fn parse_redirect(request_line: &str, expected_state: &str) -> Option<Result<String>> {
    let target = request_line.split_whitespace().nth(1)?;
    let url = Url::parse(&format!("http://127.0.0.1{}", target)).ok()?;
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        return Some(Err(GatewayError::auth(format!("consent denied: {}", error))));
    }

    let code = params.get("code")?;
    if params.get("state").map(String::as_str) != Some(expected_state) {
        return Some(Err(GatewayError::auth("state mismatch in OAuth redirect")));
    }

    Some(Ok(code.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CALENDAR_SCOPE, GMAIL_SCOPE};

    fn secrets() -> ClientSecrets {
        ClientSecrets::parse(r#"{"installed":{"client_id":"cid","client_secret":"cs"}}"#).unwrap()
    }

    #[test]
    fn redirect_with_code_and_state() {
        let code = parse_redirect("GET /?state=abc&code=4%2F0AX HTTP/1.1\r\n", "abc");
        assert_eq!(code.unwrap().unwrap(), "4/0AX");
    }

    #[test]
    fn redirect_with_wrong_state_is_rejected() {
        let outcome = parse_redirect("GET /?state=zzz&code=c HTTP/1.1", "abc").unwrap();
        assert!(outcome.is_err());
    }

    #[test]
    fn redirect_with_error_is_rejected() {
        let outcome = parse_redirect("GET /?error=access_denied HTTP/1.1", "abc").unwrap();
        let msg = outcome.unwrap_err().to_string();
        assert!(msg.contains("access_denied"));
    }

    #[test]
    fn unrelated_request_is_ignored() {
        assert!(parse_redirect("GET /favicon.ico HTTP/1.1", "abc").is_none());
        assert!(parse_redirect("", "abc").is_none());
    }

    #[test]
    fn authorization_url_requests_offline_access() {
        let url = authorization_url(&secrets(), "http://127.0.0.1:4000/", "st").unwrap();
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(params["client_id"], "cid");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:4000/");
        assert!(params["scope"].contains(CALENDAR_SCOPE));
        assert!(params["scope"].contains(GMAIL_SCOPE));
    }

    #[test]
    fn refresh_response_keeps_previous_refresh_token_and_scopes() {
        let previous = crate::credential::tests::credential(-10);
        let response = TokenResponse {
            access_token: "new".to_string(),
            expires_in: Some(3599),
            refresh_token: None,
            scope: None,
        };

        let cred = credential_from_response(response, Some(&previous));
        assert_eq!(cred.access_token, "new");
        assert_eq!(cred.refresh_token, previous.refresh_token);
        assert_eq!(cred.scopes, previous.scopes);
        assert!(cred.is_valid());
    }

    #[test]
    fn scope_string_is_split() {
        let response = TokenResponse {
            access_token: "t".to_string(),
            expires_in: None,
            refresh_token: Some("r".to_string()),
            scope: Some(format!("{} {}", GMAIL_SCOPE, CALENDAR_SCOPE)),
        };
        let cred = credential_from_response(response, None);
        assert!(cred.has_required_scopes());
        assert_eq!(cred.refresh_token.as_deref(), Some("r"));
    }

    #[test]
    fn token_error_includes_description() {
        let msg = token_error_message(
            400,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        );
        assert_eq!(
            msg,
            "token endpoint returned 400: invalid_grant (Token has been expired or revoked.)"
        );
        assert_eq!(token_error_message(502, "<html>"), "token endpoint returned 502");
    }

    #[test]
    fn consent_state_is_random_hex() {
        let state = consent_state().unwrap();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(state, consent_state().unwrap());
    }

    fn flow(timeout: std::time::Duration) -> GoogleAuthFlow {
        GoogleAuthFlow::new(
            crate::google::http_client(timeout).unwrap(),
            "missing-client-secret.json",
            std::time::Duration::from_secs(10),
        )
    }

    #[test]
    fn idle_connection_does_not_abort_consent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let browser = std::thread::spawn(move || {
            let idle = TcpStream::connect(addr).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(300));
            let mut redirect = TcpStream::connect(addr).unwrap();
            redirect
                .write_all(b"GET /?state=st&code=abc HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
                .unwrap();
            let mut reply = String::new();
            let _ = std::io::Read::read_to_string(&mut redirect, &mut reply);
            drop(idle);
            reply
        });

        let code = flow(std::time::Duration::from_secs(5))
            .wait_for_code(&listener, "st")
            .unwrap();
        assert_eq!(code, "abc");
        assert!(browser.join().unwrap().starts_with("HTTP/1.1 200 OK"));
    }

    #[test]
    fn silent_token_endpoint_times_out_as_auth_error() {
        // Accepted by the kernel backlog, never answered.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let token_uri = format!("http://{}/token", listener.local_addr().unwrap());

        let err = flow(std::time::Duration::from_millis(200))
            .post_token(&token_uri, &[("grant_type", "refresh_token")])
            .unwrap_err();

        assert!(matches!(err, GatewayError::Authentication(_)));
        assert!(err.to_string().contains("timed out"));
    }
}
