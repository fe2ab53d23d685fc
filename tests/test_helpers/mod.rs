//! Scoped process-environment overrides for integration tests.

use std::env;
use std::sync::{Mutex, MutexGuard, OnceLock};

static ENV_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();

/// Prefix shared by every daemon variable.
const VAR_PREFIX: &str = "TASKWRIGHT_";

/// Holds the environment lock and restores every touched variable on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Clears every `TASKWRIGHT_*` variable, then applies `vars`.
    pub fn isolated(vars: &[(&str, &str)]) -> Self {
        let lock = env_lock();
        let mut guard = Self {
            previous: Vec::new(),
            _lock: lock,
        };
        let inherited: Vec<String> = env::vars()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(VAR_PREFIX))
            .collect();
        for key in inherited {
            guard.apply(&key, None);
        }
        for (key, value) in vars {
            guard.apply(key, Some(value));
        }
        guard
    }

    fn apply(&mut self, key: &str, value: Option<&str>) {
        self.previous.push((key.to_owned(), env::var(key).ok()));
        unsafe {
            // SAFETY: the global mutex serializes environment mutations in tests.
            match value {
                Some(new_value) => env::set_var(key, new_value),
                None => env::remove_var(key),
            }
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.previous.drain(..).rev() {
            unsafe {
                // SAFETY: the global mutex serializes environment mutations in tests.
                match value {
                    Some(previous) => env::set_var(&key, previous),
                    None => env::remove_var(&key),
                }
            }
        }
    }
}

fn env_lock() -> MutexGuard<'static, ()> {
    ENV_MUTEX
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
