//! Credential handling for a CLI invocation.
//!
//! Stored credentials are reused when present; otherwise, with `--login`,
//! the user is prompted on the terminal and the resulting session id is
//! saved for later runs.

use std::io::{BufRead, Write};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use ilmsdump_core::Session;

/// Removes stored credentials. Returns true if a file was removed.
pub(crate) async fn logout(session: &Session) -> Result<bool> {
    let path = session.credentials_path();
    let removed = session.clear_credentials().await?;
    if removed {
        info!("Removed saved credentials in {}", path.display());
    } else {
        info!("No credentials saved in {}", path.display());
    }
    Ok(removed)
}

/// Logs in with stored credentials, or interactively if `prompt` is set and
/// none are stored.
pub(crate) async fn ensure_authenticated(session: &Session, prompt: bool) -> Result<()> {
    if let Some(phpsessid) = session.load_credentials().await? {
        info!(
            "Using existing credentials in {}",
            session.credentials_path().display()
        );
        session.login_with_phpsessid(&phpsessid).await?;
    } else if prompt {
        interactive_login(session).await?;
        let path = session.save_credentials().await?;
        info!("Saved credentials to {}", path.display());
    }
    Ok(())
}

async fn interactive_login(session: &Session) -> Result<()> {
    let username = prompt_line("iLMS username (leave empty to login with PHPSESSID): ").await?;
    if username.is_empty() {
        let phpsessid = prompt_line("iLMS PHPSESSID: ").await?;
        session.login_with_phpsessid(&phpsessid).await?;
    } else {
        let password = prompt_line("iLMS password: ").await?;
        session.login_with_password(&username, &password).await?;
    }
    Ok(())
}

/// Prints `prompt` on stderr and reads one line from stdin.
async fn prompt_line(prompt: &'static str) -> Result<String> {
    tokio::task::spawn_blocking(move || read_answer(prompt, &mut std::io::stdin().lock()))
        .await
        .context("prompt task failed")?
}

fn read_answer(prompt: &str, input: &mut impl BufRead) -> Result<String> {
    let mut stderr = std::io::stderr().lock();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line).context("failed to read from stdin")? == 0 {
        return Err(anyhow!("stdin closed while waiting for input"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
