//! Login and the stored session id.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::html;
use super::{Session, SiteError};
use crate::transport::Request;
use crate::util::compile_static_regex;

/// File under the data directory holding the saved `PHPSESSID`.
pub const CREDENTIALS_FILE: &str = "credentials.txt";

const SESSION_COOKIE: &str = "PHPSESSID";
const HOME_PATH: &str = "/home.php";

static LOGIN_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"(?i)\bid\s*=\s*["']login["']"#));
static PROFILE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<[^>]*\bid\s*=\s*["']profile["'][^>]*>\s*<div\b[^>]*>.*?</div>\s*<div\b[^>]*>\s*<div\b[^>]*>(.*?)</div>"#,
    )
});

/// Name of the logged in user shown on `home.php`, or `None` for a guest.
pub(crate) fn parse_login_state(url: &str, body: &str) -> Result<Option<String>, SiteError> {
    if !LOGIN_BLOCK_RE.is_match(body) {
        return Ok(None);
    }
    PROFILE_NAME_RE
        .captures(body)
        .map(|caps| Some(html::text(&caps[1])))
        .ok_or_else(|| SiteError::cannot_understand(url, "login block without profile name"))
}

/// Reads `ret.status`/`ret.name` of the login response.
pub(crate) fn parse_login_response(url: &str, body: &Value) -> Result<String, SiteError> {
    let ret = &body["ret"];
    if ret.is_null() {
        return Err(SiteError::cannot_understand(url, body.to_string()));
    }
    if ret["status"] != "true" {
        return Err(SiteError::LoginFailed(ret.to_string()));
    }
    Ok(ret["name"].as_str().unwrap_or_default().to_string())
}

impl Session {
    /// Path of the saved credentials.
    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir().join(CREDENTIALS_FILE)
    }

    /// Name of the logged in user, or `None` if the session is anonymous.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Transport`] if `home.php` cannot be fetched.
    pub async fn login_state(&self) -> Result<Option<String>, SiteError> {
        let page = self.page(HOME_PATH, &[]).await?;
        parse_login_state(page.url.as_str(), &page.body)
    }

    /// Adopts an existing `PHPSESSID` and checks that it is logged in.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::LoginFailed`] if the site does not accept it.
    #[instrument(skip_all)]
    pub async fn login_with_phpsessid(&self, phpsessid: &str) -> Result<String, SiteError> {
        self.transport()
            .add_cookie(&format!("{SESSION_COOKIE}={}", phpsessid.trim()), self.origin());
        let name = self
            .login_state()
            .await?
            .ok_or_else(|| SiteError::LoginFailed("cannot login with provided PHPSESSID".into()))?;
        info!(name = %name, "Logged in");
        Ok(name)
    }

    /// Logs in with a username and password.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::LoginFailed`] if the site rejects the credentials.
    #[instrument(skip(self, password))]
    pub async fn login_with_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, SiteError> {
        // The login page sets the session cookie the submit call relies on.
        self.page("/login_page.php", &[]).await?;

        let url = self.url("/sys/lib/ajax/login_submit.php", &[])?;
        let request = Request::post_form(
            url,
            &[("account", username), ("password", password), ("secCode", "na")],
        );
        let fetched = self.transport().execute(&request).await?;
        let url = fetched.url().clone();
        let body: Value = fetched.json().await?;
        let name = parse_login_response(url.as_str(), &body)?;
        info!(name = %name, "Logged in");
        Ok(name)
    }

    /// Current `PHPSESSID`, if the site has issued one.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        let home = self.origin().join(HOME_PATH).ok()?;
        self.transport().cookie(&home, SESSION_COOKIE)
    }

    /// Saved `PHPSESSID`, if the credentials file exists.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Io`] if the file exists but cannot be read.
    pub async fn load_credentials(&self) -> Result<Option<String>, SiteError> {
        let path = self.credentials_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SiteError::io(path, e)),
        }
    }

    /// Writes the current `PHPSESSID` to the credentials file.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::LoginFailed`] if there is no session id to save
    /// and [`SiteError::Io`] if the file cannot be written.
    pub async fn save_credentials(&self) -> Result<PathBuf, SiteError> {
        let id = self
            .session_id()
            .ok_or_else(|| SiteError::LoginFailed("no session cookie to save".into()))?;
        let path = self.credentials_path();
        tokio::fs::create_dir_all(self.data_dir())
            .await
            .map_err(|e| SiteError::io(self.data_dir(), e))?;
        tokio::fs::write(&path, format!("{id}\n"))
            .await
            .map_err(|e| SiteError::io(&path, e))?;
        debug!(path = %path.display(), "credentials saved");
        Ok(path)
    }

    /// Removes the credentials file. Returns false if there was none.
    ///
    /// # Errors
    ///
    /// Returns [`SiteError::Io`] if the file exists but cannot be removed.
    pub async fn clear_credentials(&self) -> Result<bool, SiteError> {
        let path = self.credentials_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SiteError::io(path, e)),
        }
    }
}
