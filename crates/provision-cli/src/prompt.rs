use provision_core::fetch::{CredentialPrompt, Credentials};
use std::io::{BufRead, IsTerminal, Write};

type Reader = fn(&str) -> std::io::Result<String>;

/// Asks the operator for repository credentials on the terminal. The token
/// is read without echo.
///
/// An empty username cancels. Without a terminal on stdin there is nobody to
/// ask, so the first request cancels.
pub struct TerminalPrompt {
    read_visible: Reader,
    read_hidden: Reader,
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self {
            read_visible: read_line,
            read_hidden,
        }
    }
}

impl TerminalPrompt {
    fn ask(&self, attempt: u32) -> std::io::Result<Option<Credentials>> {
        eprintln!("Access to the enterprise repository was denied (prompt {attempt}).");
        let username = (self.read_visible)("GitHub username (empty to cancel): ")?;
        if username.is_empty() {
            return Ok(None);
        }
        let token = (self.read_hidden)("Personal access token: ")?;
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        Ok(Some(Credentials::new(username, token.to_string())))
    }
}

impl CredentialPrompt for TerminalPrompt {
    fn prompt(&mut self, attempt: u32) -> provision_core::Result<Option<Credentials>> {
        if !std::io::stdin().is_terminal() {
            tracing::warn!("enterprise repository needs credentials but stdin is not a terminal");
            return Ok(None);
        }
        Ok(self.ask(attempt)?)
    }
}

fn read_line(label: &str) -> std::io::Result<String> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{label}")?;
    stderr.flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn read_hidden(label: &str) -> std::io::Result<String> {
    rpassword::prompt_password(label)
}
