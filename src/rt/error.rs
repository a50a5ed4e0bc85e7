use reqwest::StatusCode;
use thiserror::Error;

/// Login failures. Any of these aborts startup.
#[derive(Debug, Error)]
pub enum AuthError {
  #[error("username or password is incorrect (login redirected to {location})")]
  BadCredentials { location: String },
  #[error("login rejected with HTTP status {0}")]
  Rejected(StatusCode),
  #[error("login response carried no session cookie")]
  NoSessionCookie,
  #[error("login request failed: {0}")]
  Transport(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
  #[error(transparent)]
  Auth(#[from] AuthError),
  #[error("session expired again after re-authenticating while requesting {url}")]
  SessionExpired { url: String },
  #[error("request to {url} failed with HTTP status {status}")]
  Status { url: String, status: StatusCode },
  #[error("request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },
}

/// Failures while turning RT's text output into records.
#[derive(Debug, Error)]
pub enum ParseError {
  #[error("repaired record is not valid YAML: {0}")]
  Yaml(#[from] serde_yaml::Error),
  #[error("record is missing field `{0}`")]
  MissingField(&'static str),
  #[error("invalid timestamp '{0}'")]
  Timestamp(String),
  #[error("invalid numeric id '{0}'")]
  Id(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("tickets must be specified by numeric id, got '{0}'")]
  MalformedIdentifier(String),
  #[error("ticket {0} does not exist")]
  NotFound(u64),
  #[error(transparent)]
  Session(#[from] SessionError),
  #[error("failed to parse ticket {id}: {source}")]
  Parse {
    id: u64,
    #[source]
    source: ParseError,
  },
  #[error("invalid request URL: {0}")]
  Url(#[from] url::ParseError),
}
