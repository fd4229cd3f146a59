//! Process-wide password handling for authenticated back-ends.
//!
//! Resolution precedence for a connection attempt: the password carried
//! by the specifier, the configured per-host password, the process-wide
//! default, and finally the interactive prompt, asked at most
//! [`MAX_PASSWORD_REQUESTS`] times. Any successful authentication
//! updates the process-wide default. Passwords never appear in Debug or
//! Display output.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Upper bound on interactive prompts per connection attempt.
pub const MAX_PASSWORD_REQUESTS: usize = 3;

/// A secret string with redacted Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Password(secret.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Source of interactively requested passwords. The production
/// implementation reads from the controlling terminal; tests inject a
/// scripted one.
pub trait PasswordPrompt: Send + Sync {
    /// Ask the user for the password of `resource`; `None` aborts.
    fn request(&self, resource: &str) -> Option<Password>;
}

struct StoreState {
    default: Option<Password>,
    hosts: HashMap<String, Password>,
}

/// Process-wide password cache, lazily initialized.
pub struct PasswordStore {
    state: Mutex<StoreState>,
    /// Serializes interactive prompts so parallel connects do not
    /// interleave their questions.
    prompt_lock: Mutex<()>,
}

static STORE: OnceLock<PasswordStore> = OnceLock::new();

impl PasswordStore {
    pub fn instance() -> &'static PasswordStore {
        STORE.get_or_init(|| PasswordStore {
            state: Mutex::new(StoreState {
                default: None,
                hosts: HashMap::new(),
            }),
            prompt_lock: Mutex::new(()),
        })
    }

    pub fn default_password(&self) -> Option<Password> {
        self.state.lock().unwrap().default.clone()
    }

    pub fn set_default(&self, password: Password) {
        self.state.lock().unwrap().default = Some(password);
    }

    pub fn host_password(&self, host: &str) -> Option<Password> {
        self.state.lock().unwrap().hosts.get(host).cloned()
    }

    pub fn set_host_password(&self, host: &str, password: Password) {
        self.state
            .lock()
            .unwrap()
            .hosts
            .insert(host.to_string(), password);
    }

    /// Record a password that authenticated successfully.
    pub fn confirm(&self, host: &str, password: &Password) {
        let mut state = self.state.lock().unwrap();
        state.default = Some(password.clone());
        state.hosts.insert(host.to_string(), password.clone());
    }

    /// Hold this guard while prompting interactively.
    pub fn prompt_guard(&self) -> MutexGuard<'_, ()> {
        self.prompt_lock.lock().unwrap()
    }

    /// Non-interactive candidates in precedence order, deduplicated.
    pub fn candidates(&self, specifier_password: Option<&Password>, host: &str) -> Vec<Password> {
        let mut candidates = Vec::new();
        let mut push = |candidate: Option<Password>| {
            if let Some(candidate) = candidate {
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        };
        push(specifier_password.cloned());
        push(self.host_password(host));
        push(self.default_password());
        candidates
    }

    /// Forget everything. Called at process shutdown.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.default = None;
        state.hosts.clear();
    }
}

/// The store is process-global; tests that mutate it serialize here.
#[cfg(test)]
pub(crate) fn test_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    use super::test_lock as store_lock;

    #[test]
    fn debug_output_is_redacted() {
        let password = Password::new("hunter2");
        assert_eq!(format!("{password:?}"), "Password(***)");
    }

    #[test]
    fn candidates_follow_precedence() {
        let _guard = store_lock();
        let store = PasswordStore::instance();
        store.shutdown();
        store.set_host_password("pw-test-host", Password::new("per-host"));
        store.set_default(Password::new("default"));

        let specifier = Password::new("from-specifier");
        let candidates = store.candidates(Some(&specifier), "pw-test-host");
        let as_text: Vec<&str> = candidates.iter().map(Password::as_str).collect();
        assert_eq!(as_text, ["from-specifier", "per-host", "default"]);

        store.shutdown();
    }

    #[test]
    fn confirm_updates_default_and_host() {
        let _guard = store_lock();
        let store = PasswordStore::instance();
        store.shutdown();
        store.confirm("pw-test-confirm", &Password::new("winner"));
        assert_eq!(store.default_password().unwrap().as_str(), "winner");
        assert_eq!(
            store.host_password("pw-test-confirm").unwrap().as_str(),
            "winner"
        );
        store.shutdown();
    }
}
