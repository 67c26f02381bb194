//! Session validity tracking, persistence across runs, and resumption after
//! loss.

use std::path::{Path, PathBuf};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TimingConfig;
use crate::error::{Error, Result};
use crate::remote::RemoteInterface;
use crate::shutdown::sleep_or_cancel;
use crate::types::{ChannelId, Credentials, DateRange, PageNumber, SessionSnapshot};

/// Last known session validity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    pub valid: bool,
    pub last_checked_at: Option<Instant>,
}

/// Reads the remote's authenticated signal before every remote-sensitive step.
#[derive(Debug, Default)]
pub struct SessionGuard {
    state: SessionState,
}

impl SessionGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the authenticated signal. A failed read counts as invalid.
    pub async fn check_valid<R: RemoteInterface + ?Sized>(&mut self, remote: &R) -> bool {
        let valid = match remote.is_authenticated().await {
            Ok(valid) => valid,
            Err(e) => {
                log::warn!("Could not read session state: {e}");
                false
            }
        };
        if self.state.valid && !valid {
            log::warn!("Session no longer authenticated");
        }
        self.state = SessionState {
            valid,
            last_checked_at: Some(Instant::now()),
        };
        valid
    }

    /// Records a successful login.
    pub fn mark_valid(&mut self) {
        self.state = SessionState {
            valid: true,
            last_checked_at: Some(Instant::now()),
        };
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }
}

/// Saved browser session, reused by the next run to skip the login.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Session file inside the state directory.
    #[must_use]
    pub fn path_for(state_dir: &Path) -> PathBuf {
        state_dir.join("session.json")
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the saved session. Missing, corrupt or empty files yield `None`.
    #[must_use]
    pub fn load(&self) -> Option<SessionSnapshot> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<SessionSnapshot>(&contents) {
            Ok(snapshot) if !snapshot.is_empty() => Some(snapshot),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Ignoring corrupt session file {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Saves the session atomically (write tmp + rename), readable only by
    /// the owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_string_pretty(snapshot)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Where processing stood when the session was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub channel: ChannelId,
    pub page: PageNumber,
    pub range: DateRange,
}

/// Logs in and rebuilds the query context for a [`Position`].
#[derive(Debug, Clone)]
pub struct ResumeController {
    credentials: Credentials,
    timing: TimingConfig,
    store: SessionStore,
    cancel: CancellationToken,
}

impl ResumeController {
    #[must_use]
    pub const fn new(
        credentials: Credentials,
        timing: TimingConfig,
        store: SessionStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            credentials,
            timing,
            store,
            cancel,
        }
    }

    /// Opens a session for the run: reuses the saved session when the remote
    /// still accepts it, otherwise logs in.
    ///
    /// # Errors
    ///
    /// See [`ResumeController::login_with_retry`].
    pub async fn establish<R: RemoteInterface + ?Sized>(
        &self,
        remote: &R,
        guard: &mut SessionGuard,
    ) -> Result<()> {
        if let Some(snapshot) = self.store.load() {
            match remote.import_session(&snapshot).await {
                Ok(()) if guard.check_valid(remote).await => {
                    log::info!("Reusing saved session from {}", self.store.path().display());
                    return Ok(());
                }
                Ok(()) => log::info!("Saved session no longer accepted, logging in"),
                Err(e) => log::warn!("Could not restore saved session: {e}"),
            }
        }
        self.login_with_retry(remote, guard).await
    }

    /// Logs in, retrying with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] once every attempt was refused, or
    /// [`Error::Cancelled`] if interrupted while backing off.
    pub async fn login_with_retry<R: RemoteInterface + ?Sized>(
        &self,
        remote: &R,
        guard: &mut SessionGuard,
    ) -> Result<()> {
        let attempts = self.timing.login_attempts.max(1);
        let mut last_error = String::from("rejected");

        for attempt in 0..attempts {
            match remote.login(&self.credentials).await {
                Ok(true) => {
                    log::info!("Logged in as {}", self.credentials.username);
                    guard.mark_valid();
                    self.persist(remote).await;
                    return Ok(());
                }
                Ok(false) => last_error = String::from("rejected"),
                Err(e) => last_error = e.to_string(),
            }

            if attempt + 1 < attempts {
                let delay = self.timing.login_delay(attempt);
                log::warn!(
                    "Login attempt {}/{attempts} failed ({last_error}), retrying in {}s",
                    attempt + 1,
                    delay.as_secs()
                );
                if !sleep_or_cancel(&self.cancel, delay).await {
                    return Err(Error::Cancelled);
                }
            }
        }

        Err(Error::Authentication(format!(
            "{attempts} attempt(s) failed: {last_error}"
        )))
    }

    /// Saves the current session for the next run. Failures are logged only.
    async fn persist<R: RemoteInterface + ?Sized>(&self, remote: &R) {
        let saved = match remote.export_session().await {
            Ok(snapshot) => self.store.save(&snapshot),
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            log::warn!("Could not save session to {}: {e}", self.store.path().display());
        }
    }

    /// Re-establishes the session and restores `position`.
    ///
    /// Returns true only when the remote reports the target page as current.
    pub async fn resume<R: RemoteInterface + ?Sized>(
        &self,
        remote: &R,
        guard: &mut SessionGuard,
        position: &Position,
    ) -> bool {
        log::info!(
            "Resuming session at channel {} page {}",
            position.channel,
            position.page
        );

        if let Err(e) = self.login_with_retry(remote, guard).await {
            log::error!("Resume failed: {e}");
            return false;
        }

        match restore(remote, position).await {
            Ok(true) => {
                log::info!(
                    "Resumed at channel {} page {}",
                    position.channel,
                    position.page
                );
                true
            }
            Ok(false) => {
                log::error!(
                    "Resume landed on the wrong page for channel {}",
                    position.channel
                );
                false
            }
            Err(e) => {
                log::error!("Resume failed: {e}");
                false
            }
        }
    }
}

/// Navigates to the download view and replays the query up to the page.
async fn restore<R: RemoteInterface + ?Sized>(remote: &R, position: &Position) -> Result<bool> {
    remote.enter_download_view().await?;
    remote.select_channel(position.channel).await?;
    remote.set_date_range(&position.range).await?;
    if !remote.run_query().await? {
        return Err(Error::Navigation("query returned no result table".into()));
    }
    if position.page > 1 {
        remote.goto_page(position.page).await?;
    }
    Ok(remote.pagination().await?.current == position.page)
}
