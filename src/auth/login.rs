//! Browser login flow: authorization URL, redirect pages and the local
//! callback server that receives the authorization code.

use crate::auth::credentials::CredentialManager;
use crate::config::OAuthConfig;
use crate::error::{DriveError, Result};
use log::{debug, error, info, warn};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server, StatusCode};
use tokio::runtime::Handle;
use tokio::sync::watch;
use url::Url;

/// Page shown once the code exchange succeeded
const READY_HTML: &str = include_str!("./index.html");

/// How often the callback loop checks the shutdown signal
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Build the authorization URL the user must open once.
pub fn login_url(config: &OAuthConfig) -> Result<Url> {
    let mut url = Url::parse(&config.auth_endpoint)
        .map_err(|e| DriveError::invalid(format!("bad auth endpoint: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.redirect_uri)
        .append_pair("scope", &config.scope);
    Ok(url)
}

/// Internet shortcut pointing at the login URL, for file browsers that
/// list the unauthenticated share.
pub fn login_shortcut(url: &Url) -> String {
    format!("[InternetShortcut]\nURL={}\n", url)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// HTML body for a redirect. Some clients ignore a bare `Location` header,
/// so the page also carries a link, a script redirect and meta refreshes.
pub fn redirect_body(url: &str) -> String {
    let escaped = escape_html(url);
    let mut body = format!(
        "You are being redirected to <a href=\"{0}\">{0}</a>. If you see this message, please manually follow the link.",
        escaped
    );
    if let Ok(js) = serde_json::to_string(url) {
        body.push_str(&format!(
            "<script language=\"javascript\">window.location = {};</script>",
            js
        ));
    }
    body.push_str(&format!(
        "<meta http-equiv=\"Refresh\" content=\"0; url={}\"/>",
        escaped
    ));
    body.push_str(&format!(
        "<meta http-equiv=\"Location\" content=\"{}\"/>",
        escaped
    ));
    body
}

fn header(name: &str, value: &str) -> Result<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes())
        .map_err(|_| DriveError::invalid(format!("invalid header {}", name)))
}

/// Full redirect response: status code, `Location` header and HTML body.
pub fn redirect_response(url: &str, code: u16) -> Result<Response<Cursor<Vec<u8>>>> {
    Ok(Response::from_string(redirect_body(url))
        .with_status_code(StatusCode(code))
        .with_header(header("Location", url)?)
        .with_header(header("Content-Type", "text/html; charset=utf-8")?))
}

/// Render any core error for an HTTP-facing caller. Redirects become real
/// redirects, everything else a plain error page.
pub fn error_response(err: &DriveError) -> Result<Response<Cursor<Vec<u8>>>> {
    match err {
        DriveError::RedirectRequired { url, code } => redirect_response(url, *code),
        other => {
            let status = match other {
                DriveError::NotFound(_) => 404,
                DriveError::AuthError(_) | DriveError::SessionExpired => 401,
                DriveError::InvalidOperation(_) => 400,
                DriveError::NotImplemented(_) => 501,
                _ => 500,
            };
            Ok(Response::from_string(format!("Error: {}", other))
                .with_status_code(StatusCode(status))
                .with_header(header("Content-Type", "text/plain; charset=utf-8")?))
        }
    }
}

/// What the callback server should do with an incoming request
#[derive(Debug, PartialEq, Eq)]
pub enum LoginRoute {
    Callback(String),
    Denied(String),
    Other,
}

/// Classify a request path (with query) against the callback path.
pub fn route(callback_path: &str, request_url: &str) -> LoginRoute {
    let parsed = match Url::parse(&format!("http://localhost{}", request_url)) {
        Ok(url) => url,
        Err(_) => return LoginRoute::Other,
    };
    if parsed.path() != callback_path {
        return LoginRoute::Other;
    }
    let mut code = None;
    let mut error = None;
    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "error" => error = Some(value.to_string()),
            _ => {}
        }
    }
    match (code, error) {
        (_, Some(err)) => LoginRoute::Denied(err),
        (Some(code), None) if !code.is_empty() => LoginRoute::Callback(code),
        _ => LoginRoute::Denied("missing authorization code".to_string()),
    }
}

/// Local HTTP server hosting the OAuth2 callback.
pub struct LoginServer {
    server: Server,
    credentials: Arc<CredentialManager>,
    login_url: Url,
    callback_path: String,
}

impl LoginServer {
    pub fn bind(address: &str, credentials: Arc<CredentialManager>) -> Result<Self> {
        let config = credentials.oauth_config();
        let login_url = login_url(config)?;
        let callback_path = Url::parse(&config.redirect_uri)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/_login".to_string());
        let server = Server::http(address)
            .map_err(|e| DriveError::Io(format!("failed to start login server: {}", e)))?;
        info!("Login server listening on {}", address);
        Ok(Self {
            server,
            credentials,
            login_url,
            callback_path,
        })
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    /// Serve callbacks until a code exchange succeeds or shutdown fires.
    /// Returns whether the login completed.
    pub async fn wait_for_login(self, shutdown: watch::Receiver<bool>) -> Result<bool> {
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || self.run(handle, shutdown))
            .await
            .map_err(|e| DriveError::Io(format!("login server task failed: {}", e)))?
    }

    fn run(self, handle: Handle, shutdown: watch::Receiver<bool>) -> Result<bool> {
        loop {
            if *shutdown.borrow() {
                info!("Login server shutting down");
                return Ok(false);
            }
            let request = match self.server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => return Err(DriveError::Io(e.to_string())),
            };
            if self.handle(&handle, request) {
                return Ok(true);
            }
        }
    }

    /// Returns true once the credentials are in place.
    fn handle(&self, handle: &Handle, request: Request) -> bool {
        debug!("Login server request: {} {}", request.method(), request.url());
        let result = match route(&self.callback_path, request.url()) {
            LoginRoute::Callback(code) => {
                match handle.block_on(self.credentials.exchange_code(&code)) {
                    Ok(()) => {
                        info!("Login completed");
                        respond(request, ready_response())
                            .map(|_| true)
                    }
                    Err(e) => {
                        error!("Error authenticating: {}", e);
                        respond(
                            request,
                            Ok(Response::from_string(format!("Error authenticating: {}", e))
                                .with_status_code(StatusCode(401))),
                        )
                        .map(|_| false)
                    }
                }
            }
            LoginRoute::Denied(reason) => {
                warn!("Authorization denied: {}", reason);
                respond(
                    request,
                    Ok(Response::from_string(format!("Authorization failed: {}", reason))
                        .with_status_code(StatusCode(403))),
                )
                .map(|_| false)
            }
            LoginRoute::Other => {
                respond(request, redirect_response(self.login_url.as_str(), 302)).map(|_| false)
            }
        };
        match result {
            Ok(done) => done,
            Err(e) => {
                warn!("Failed to answer login request: {}", e);
                self.credentials.is_authenticated()
            }
        }
    }
}

fn ready_response() -> Result<Response<Cursor<Vec<u8>>>> {
    Ok(Response::from_string(READY_HTML).with_header(header("Content-Type", "text/html")?))
}

fn respond(request: Request, response: Result<Response<Cursor<Vec<u8>>>>) -> Result<()> {
    request.respond(response?)?;
    Ok(())
}
