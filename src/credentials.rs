use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::path::Path;

/// RT login credentials, read once at startup.
#[derive(Clone)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

impl Credentials {
  /// Read a credential file holding a single `username:password` line.
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      eyre!(
        "Failed to read credentials file {}: {}\n\
         The file must contain a single line of the form username:password",
        path.display(),
        e
      )
    })?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Invalid credentials file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let line = contents.trim();
    if line.lines().count() != 1 {
      return Err(eyre!("expected exactly one line of the form username:password"));
    }

    match line.split_once(':') {
      Some((username, password)) if !username.is_empty() && !password.is_empty() => Ok(Self {
        username: username.to_string(),
        password: password.to_string(),
      }),
      _ => Err(eyre!("expected username:password")),
    }
  }
}

// Keep the password out of logs.
impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("username", &self.username)
      .finish_non_exhaustive()
  }
}
