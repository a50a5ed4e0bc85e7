//! Authenticated HTTP session against RT's REST 1.0 interface.
//!
//! RT keeps the login in a session cookie. When the cookie expires, requests
//! are answered with a redirect to the login page; the client then logs in
//! again and retries once. The cookie is shared by every caller (foreground
//! lookups and the background sync) behind an async `RwLock`, and each login
//! bumps a generation number so that callers racing on the same expired
//! session re-authenticate only once.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, COOKIE, LOCATION, SET_COOKIE};
use reqwest::{redirect, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::error::{AuthError, SessionError};
use crate::credentials::Credentials;

/// Re-authentications allowed per request before giving up.
const MAX_REAUTH: usize = 1;

#[derive(Debug, Clone)]
struct Session {
  cookie: String,
  generation: u64,
}

enum Reply {
  Body(String),
  LoginRedirect,
}

pub struct SessionClient {
  http: reqwest::Client,
  base_url: Url,
  credentials: Credentials,
  session: RwLock<Option<Session>>,
}

impl SessionClient {
  pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid RT base URL {}: {}", base_url, e))?;

    // Redirects must reach us: a 302 is how RT says the session is gone.
    let http = reqwest::Client::builder()
      .redirect(redirect::Policy::none())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      credentials,
      session: RwLock::new(None),
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Log in, replacing any existing session.
  pub async fn authenticate(&self) -> Result<(), AuthError> {
    let mut guard = self.session.write().await;
    let generation = guard.as_ref().map_or(1, |s| s.generation + 1);
    *guard = Some(self.login(generation).await?);
    Ok(())
  }

  /// GET `url` and return the body text.
  ///
  /// A login redirect triggers one re-authentication and retry; a second
  /// redirect fails with [`SessionError::SessionExpired`].
  pub async fn request(&self, url: &Url) -> Result<String, SessionError> {
    let mut session = self.current_session().await?;
    let mut reauths = 0;

    loop {
      match self.get(url, &session).await? {
        Reply::Body(body) => return Ok(body),
        Reply::LoginRedirect if reauths < MAX_REAUTH => {
          warn!(url = %url, "RT session expired, logging in again");
          reauths += 1;
          session = self.reauthenticate(session.generation).await?;
        }
        Reply::LoginRedirect => {
          return Err(SessionError::SessionExpired {
            url: url.to_string(),
          })
        }
      }
    }
  }

  async fn current_session(&self) -> Result<Session, AuthError> {
    if let Some(session) = self.session.read().await.clone() {
      return Ok(session);
    }

    let mut guard = self.session.write().await;
    if let Some(session) = guard.clone() {
      return Ok(session);
    }
    let session = self.login(1).await?;
    *guard = Some(session.clone());
    Ok(session)
  }

  /// Replace the session that expired, unless another caller already did.
  async fn reauthenticate(&self, stale_generation: u64) -> Result<Session, AuthError> {
    let mut guard = self.session.write().await;
    if let Some(session) = guard.as_ref() {
      if session.generation != stale_generation {
        debug!("session already renewed by another request");
        return Ok(session.clone());
      }
    }

    *guard = None;
    let session = self.login(stale_generation + 1).await?;
    *guard = Some(session.clone());
    Ok(session)
  }

  async fn login(&self, generation: u64) -> Result<Session, AuthError> {
    let form = [
      ("user", self.credentials.username.as_str()),
      ("pass", self.credentials.password.as_str()),
    ];

    let response = self
      .http
      .post(self.base_url.clone())
      .form(&form)
      .send()
      .await
      .map_err(AuthError::Transport)?;

    match response.status() {
      StatusCode::OK => {
        let cookie = session_cookie(response.headers()).ok_or(AuthError::NoSessionCookie)?;
        info!(user = %self.credentials.username, "logged in to RT");
        Ok(Session { cookie, generation })
      }
      StatusCode::FOUND => {
        let location = response
          .headers()
          .get(LOCATION)
          .and_then(|v| v.to_str().ok())
          .unwrap_or_default()
          .to_string();
        Err(AuthError::BadCredentials { location })
      }
      status => Err(AuthError::Rejected(status)),
    }
  }

  async fn get(&self, url: &Url, session: &Session) -> Result<Reply, SessionError> {
    let transport = |source| SessionError::Transport {
      url: url.to_string(),
      source,
    };

    let response = self
      .http
      .get(url.clone())
      .header(COOKIE, &session.cookie)
      .send()
      .await
      .map_err(transport)?;

    match response.status() {
      StatusCode::FOUND => Ok(Reply::LoginRedirect),
      StatusCode::OK => {
        let body = response.text().await.map_err(transport)?;
        if credentials_required(&body) {
          Ok(Reply::LoginRedirect)
        } else {
          Ok(Reply::Body(body))
        }
      }
      status => Err(SessionError::Status {
        url: url.to_string(),
        status,
      }),
    }
  }

  #[cfg(test)]
  pub(crate) async fn set_session_cookie(&self, cookie: &str) {
    *self.session.write().await = Some(Session {
      cookie: cookie.to_string(),
      generation: 1,
    });
  }
}

/// Collapse all `Set-Cookie` headers into one `Cookie` header value.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
  let pairs: Vec<&str> = headers
    .get_all(SET_COOKIE)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .filter_map(|v| v.split(';').next())
    .map(str::trim)
    .filter(|pair| !pair.is_empty())
    .collect();

  (!pairs.is_empty()).then(|| pairs.join("; "))
}

/// RT sometimes answers 200 with an in-body `401 Credentials required` status line.
fn credentials_required(body: &str) -> bool {
  body
    .lines()
    .next()
    .is_some_and(|line| line.starts_with("RT/") && line.contains(" 401 "))
}
