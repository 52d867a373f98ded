//! Environment variable access behind a trait, so request handling can be driven by a
//! snapshot in tests instead of the process environment.
//!
//! ```
//! use cb_relay::env::var_non_blank;
//! use std::collections::HashMap;
//!
//! let env = HashMap::from([("CB_OPENAI_MODEL".to_string(), "gpt-4o-mini".to_string())]);
//! assert_eq!(var_non_blank(&env, "CB_OPENAI_MODEL").as_deref(), Some("gpt-4o-mini"));
//! assert_eq!(var_non_blank(&env, "CB_OPENAI_ORG"), None);
//! ```
use std::collections::HashMap;
use std::env;

pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, env::VarError>;
}

/// Zero-sized type, delegates to `std::env`. Every call reads the live process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    #[inline]
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

/// A fixed snapshot of variables. Won't touch the global process environment.
impl ReadEnv for HashMap<String, String> {
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        self.get(key).cloned().ok_or(env::VarError::NotPresent)
    }
}

/// Reads `key`, treating unset, non-unicode, and blank values alike as absent.
pub fn var_non_blank<E: ReadEnv + ?Sized>(env: &E, key: &str) -> Option<String> {
    env.var(key)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
