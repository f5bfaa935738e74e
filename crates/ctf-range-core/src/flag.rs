//! Flag generation.
//!
//! A flag is `prefix{body}` where `body` is drawn uniformly, with
//! replacement, from a charset using the operating system's CSPRNG.

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::error::{CoreError, Result};

/// Default flag prefix.
pub const DEFAULT_PREFIX: &str = "CTF";

/// Default flag body alphabet.
pub const DEFAULT_CHARSET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default flag body length.
pub const DEFAULT_LENGTH: usize = 32;

/// Shape of generated flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagPolicy {
    /// Text placed before the opening brace.
    pub prefix: String,
    /// Characters the body is drawn from.
    pub charset: String,
    /// Number of body characters.
    pub length: usize,
}

impl Default for FlagPolicy {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            charset: DEFAULT_CHARSET.to_string(),
            length: DEFAULT_LENGTH,
        }
    }
}

impl FlagPolicy {
    /// Check that the policy can produce flags.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidFlagPolicy` for an empty charset, a zero
    /// length, or a charset containing braces.
    pub fn validate(&self) -> Result<()> {
        if self.charset.is_empty() {
            return Err(CoreError::InvalidFlagPolicy("charset is empty".into()));
        }
        if self.length == 0 {
            return Err(CoreError::InvalidFlagPolicy("length must be positive".into()));
        }
        if self.charset.contains(['{', '}']) {
            return Err(CoreError::InvalidFlagPolicy(
                "charset must not contain braces".into(),
            ));
        }
        Ok(())
    }

    /// Returns true if `candidate` has the shape this policy generates.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let Some(rest) = candidate.strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        let Some(body) = rest.strip_prefix('{').and_then(|r| r.strip_suffix('}')) else {
            return false;
        };
        body.chars().count() == self.length && body.chars().all(|c| self.charset.contains(c))
    }
}

/// Mints flags according to a [`FlagPolicy`].
#[derive(Debug, Clone)]
pub struct FlagGenerator {
    policy: FlagPolicy,
    alphabet: Vec<char>,
}

impl FlagGenerator {
    /// Create a generator for the given policy.
    ///
    /// Duplicate charset characters are collapsed so every symbol is equally
    /// likely.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy is invalid.
    pub fn new(policy: FlagPolicy) -> Result<Self> {
        policy.validate()?;
        let mut alphabet: Vec<char> = Vec::with_capacity(policy.charset.len());
        for c in policy.charset.chars() {
            if !alphabet.contains(&c) {
                alphabet.push(c);
            }
        }
        Ok(Self { policy, alphabet })
    }

    /// The policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &FlagPolicy {
        &self.policy
    }

    /// Generate a fresh flag.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut rng = OsRng;
        let body: String = (0..self.policy.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect();
        format!("{}{{{body}}}", self.policy.prefix)
    }
}

/// Generate a single flag without keeping a generator around.
///
/// # Errors
///
/// Returns an error if the arguments do not form a valid policy.
pub fn generate(prefix: &str, charset: &str, length: usize) -> Result<String> {
    let generator = FlagGenerator::new(FlagPolicy {
        prefix: prefix.to_string(),
        charset: charset.to_string(),
        length,
    })?;
    Ok(generator.generate())
}

/// Compare two strings in constant time. Only the length may leak.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
