/// Auth/session collaborator.
///
/// The core never talks to the auth provider directly; it only asks who is
/// signed in, to scope challenges and per-user store keys.
use std::sync::RwLock;

pub trait SessionProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// In-process session holder. The shell updates it from its auth listener.
#[derive(Debug, Default)]
pub struct LocalSession {
    user_id: RwLock<Option<String>>,
}

impl LocalSession {
    pub fn signed_in(user_id: &str) -> Self {
        LocalSession {
            user_id: RwLock::new(Some(user_id.to_string())),
        }
    }

    pub fn sign_in(&self, user_id: &str) {
        *self.user_id.write().unwrap_or_else(|e| e.into_inner()) = Some(user_id.to_string());
        log::info!("Session: signed in");
    }

    pub fn sign_out(&self) {
        *self.user_id.write().unwrap_or_else(|e| e.into_inner()) = None;
        log::info!("Session: signed out");
    }
}

impl SessionProvider for LocalSession {
    fn current_user_id(&self) -> Option<String> {
        self.user_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
