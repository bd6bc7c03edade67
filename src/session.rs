//! Signed-in user state, passed explicitly to the pieces that need it

use tokio::sync::watch;

/// Owner of the session state. Signing in and out notifies every handle.
#[derive(Debug)]
pub struct Session {
    user: watch::Sender<Option<String>>,
}

impl Session {
    pub fn new() -> Self {
        let (user, _) = watch::channel(None);
        Self { user }
    }

    pub fn signed_in(user: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(user);
        session
    }

    pub fn sign_in(&self, user: impl Into<String>) {
        let user = user.into();
        tracing::info!(user = %user, "Signed in");
        self.user.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        if let Some(user) = self.user.send_replace(None) {
            tracing::info!(user = %user, "Signed out");
        }
    }

    pub fn current(&self) -> Option<String> {
        self.user.borrow().clone()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            user: self.user.subscribe(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of a `Session`
#[derive(Debug, Clone)]
pub struct SessionHandle {
    user: watch::Receiver<Option<String>>,
}

impl SessionHandle {
    /// Current user id, or `None` when signed out
    pub fn current(&self) -> Option<String> {
        self.user.borrow().clone()
    }

    /// Wait for the next sign-in or sign-out. Returns `None` once the
    /// session itself is gone.
    pub async fn changed(&mut self) -> Option<Option<String>> {
        self.user.changed().await.ok()?;
        Some(self.user.borrow_and_update().clone())
    }
}
