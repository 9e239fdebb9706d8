use std::io::{BufRead, BufReader, Write as IoWrite};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// OAuth client secret, as downloaded from the Google Cloud console
/// ("Desktop app" credentials JSON).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: ClientSecret,
}

/// Persisted OAuth token state. Deleting the file forces re-login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read token file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Malformed token file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write token file: {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set token file permissions")?;
        }
        Ok(())
    }

    /// Expired (with a one-minute safety margin)?
    fn needs_refresh(&self) -> bool {
        Utc::now() >= self.expires_at - chrono::Duration::seconds(60)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

impl TokenResponse {
    fn into_stored(self, previous_refresh: Option<String>) -> StoredToken {
        StoredToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: Utc::now() + chrono::Duration::seconds(self.expires_in),
        }
    }
}

/// Explicit credential object handed to the Gmail client. Refresh is an
/// explicit call that persists the rotated token; there is no implicit
/// global session state.
#[derive(Debug)]
pub struct GmailCredentials {
    secret: ClientSecret,
    token: StoredToken,
    token_path: PathBuf,
}

impl GmailCredentials {
    pub fn load(credentials_file: &Path, token_path: &Path) -> Result<Self> {
        let secret = read_client_secret(credentials_file)?;
        let token = StoredToken::load(token_path).with_context(|| {
            format!(
                "No usable Gmail token at {}. Run `healthsync login` first.",
                token_path.display()
            )
        })?;
        Ok(Self {
            secret,
            token,
            token_path: token_path.to_path_buf(),
        })
    }

    /// A currently-valid access token, refreshing (and persisting the
    /// rotated token) when the stored one has expired.
    pub async fn access_token(&mut self, http: &reqwest::Client) -> Result<String> {
        if !self.token.needs_refresh() {
            return Ok(self.token.access_token.clone());
        }

        let refresh = self.token.refresh_token.clone().context(
            "Gmail token expired and no refresh token is stored. Run `healthsync login` again.",
        )?;

        let resp = http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("refresh_token", refresh.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("Failed to reach Google token endpoint")?;

        if !resp.status().is_success() {
            bail!(
                "Gmail token refresh rejected ({}). Run `healthsync login` again.",
                resp.status()
            );
        }

        let tr: TokenResponse = resp
            .json()
            .await
            .context("Failed to parse token refresh response")?;
        self.token = tr.into_stored(Some(refresh));
        self.token.save(&self.token_path)?;
        Ok(self.token.access_token.clone())
    }
}

/// Interactive installed-app flow: bind a loopback listener, print the
/// consent URL, wait for the redirect, exchange the code, persist the
/// token. First-run setup; afterwards the stored token is reused.
pub async fn interactive_login(
    http: &reqwest::Client,
    credentials_file: &Path,
    token_path: &Path,
) -> Result<()> {
    let secret = read_client_secret(credentials_file)?;

    let listener =
        TcpListener::bind("127.0.0.1:0").context("Failed to bind loopback listener")?;
    let port = listener.local_addr()?.port();
    let redirect_uri = format!("http://127.0.0.1:{port}");
    let state = nonce();

    let mut url = reqwest::Url::parse(AUTH_URL)?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &secret.client_id)
        .append_pair("redirect_uri", &redirect_uri)
        .append_pair("scope", SCOPE)
        .append_pair("state", &state)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");

    println!("Open this URL in your browser to authorize Gmail access:\n\n  {url}\n");
    println!("Waiting for the browser redirect on {redirect_uri} ...");

    let (code, returned_state) =
        tokio::task::spawn_blocking(move || wait_for_redirect(&listener)).await??;
    if returned_state != state {
        bail!("OAuth state mismatch; aborting login");
    }

    let resp = http
        .post(TOKEN_URL)
        .form(&[
            ("client_id", secret.client_id.as_str()),
            ("client_secret", secret.client_secret.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .context("Failed to reach Google token endpoint")?;

    if !resp.status().is_success() {
        bail!("Token exchange rejected ({})", resp.status());
    }

    let tr: TokenResponse = resp
        .json()
        .await
        .context("Failed to parse token exchange response")?;
    tr.into_stored(None).save(token_path)?;

    println!("Login complete. Token saved to {}", token_path.display());
    Ok(())
}

/// Accept one connection and pull `code` and `state` out of the redirect
/// request line.
fn wait_for_redirect(listener: &TcpListener) -> Result<(String, String)> {
    let (mut stream, _) = listener
        .accept()
        .context("Failed to accept OAuth redirect")?;

    let request_line = {
        let mut reader = BufReader::new(&stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .context("Failed to read OAuth redirect request")?;
        line
    };

    let _ = stream.write_all(
        b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\n\r\n\
          Authorization received. You can close this tab and return to the terminal.\n",
    );

    parse_redirect(&request_line)
}

/// Extract `(code, state)` from a request line like
/// `GET /?state=xyz&code=abc HTTP/1.1`.
fn parse_redirect(request_line: &str) -> Result<(String, String)> {
    let path = request_line
        .split_whitespace()
        .nth(1)
        .context("Malformed redirect request")?;
    let url = reqwest::Url::parse(&format!("http://127.0.0.1{path}"))
        .context("Malformed redirect URL")?;

    let mut code = None;
    let mut state = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            "error" => bail!("Authorization denied: {v}"),
            _ => {}
        }
    }

    Ok((
        code.context("Redirect carried no authorization code")?,
        state.context("Redirect carried no state")?,
    ))
}

fn nonce() -> String {
    use rand::Rng;
    use std::fmt::Write;

    let bytes: [u8; 16] = rand::rng().random();
    bytes
        .iter()
        .fold(String::with_capacity(32), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

fn read_client_secret(path: &Path) -> Result<ClientSecret> {
    let raw = std::fs::read_to_string(path).with_context(|| {
        format!(
            "Gmail credentials file not found: {}\n\
             Download OAuth 2.0 desktop credentials from the Google Cloud console.",
            path.display()
        )
    })?;
    let file: ClientSecretFile = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed credentials file: {}", path.display()))?;
    Ok(file.installed)
}
