//! Reference codes.
//!
//! Short codes let applicants resume or check on an application from any
//! channel without remembering a session identifier. Codes are six uppercase
//! alphanumerics minted from the OS RNG, unique across live codes, and valid
//! for thirty days.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use thiserror::Error;

use super::domain::{ApplicationState, StatePatch};
use super::store::{StateStore, StoreError};

pub const CODE_LENGTH: usize = 6;
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const DEFAULT_VALIDITY_DAYS: i64 = 30;
/// A reused code within this many days of expiry gets a fresh validity window.
pub const EXTEND_THRESHOLD_DAYS: i64 = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum CodeError {
    #[error("session not found")]
    SessionNotFound,
    #[error("could not mint a unique reference code after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Seam for code minting so collision behavior is testable.
pub trait CodeGenerator: Send + Sync {
    fn mint(&self) -> String;
}

/// OS-RNG backed generator used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRngCodes;

impl CodeGenerator for OsRngCodes {
    fn mint(&self) -> String {
        let mut rng = OsRng;
        (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

pub struct ReferenceCodeService<S> {
    store: Arc<S>,
    generator: Arc<dyn CodeGenerator>,
    validity_days: i64,
    max_attempts: u32,
}

impl<S: StateStore> ReferenceCodeService<S> {
    pub fn new(store: Arc<S>, generator: Arc<dyn CodeGenerator>) -> Self {
        Self::with_limits(store, generator, DEFAULT_VALIDITY_DAYS, DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_limits(
        store: Arc<S>,
        generator: Arc<dyn CodeGenerator>,
        validity_days: i64,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            generator,
            validity_days,
            max_attempts,
        }
    }

    /// Ensure a session has a live reference code and return it.
    ///
    /// Idempotent: an existing live code is returned as-is, and silently
    /// renewed when close to expiry so an applicant mid-flow never watches
    /// their code lapse.
    pub fn generate(&self, session_id: &str) -> Result<String, CodeError> {
        let state = self
            .store
            .get(session_id)?
            .ok_or(CodeError::SessionNotFound)?;
        let now = Utc::now();

        if state.reference_code_active(now) {
            let code = state
                .reference_code
                .clone()
                .unwrap_or_default();
            let near_expiry = state
                .reference_code_expires_at
                .map(|expires| expires - now < Duration::days(EXTEND_THRESHOLD_DAYS))
                .unwrap_or(false);
            if near_expiry {
                let patch = StatePatch {
                    reference_code_expires_at: Some(now + Duration::days(self.validity_days)),
                    ..StatePatch::default()
                };
                self.store.update(session_id, state.version, patch)?;
                tracing::info!(session_id, code, "reference code renewed near expiry");
            }
            return Ok(code);
        }

        for attempt in 1..=self.max_attempts {
            let candidate = self.generator.mint();
            if self.store.find_by_reference_code(&candidate)?.is_some() {
                tracing::warn!(session_id, attempt, "reference code collision, retrying");
                continue;
            }
            let patch = StatePatch {
                reference_code: Some(candidate.clone()),
                reference_code_expires_at: Some(now + Duration::days(self.validity_days)),
                ..StatePatch::default()
            };
            self.store.update(session_id, state.version, patch)?;
            tracing::info!(session_id, code = candidate, "reference code issued");
            return Ok(candidate);
        }
        Err(CodeError::GenerationExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Whether a code resolves to a state with an unexpired code.
    pub fn validate(&self, code: &str) -> Result<bool, StoreError> {
        Ok(self.store.find_by_reference_code(code)?.is_some())
    }

    /// The state a live code points at, if any.
    pub fn resolve(&self, code: &str) -> Result<Option<ApplicationState>, StoreError> {
        self.store.find_by_reference_code(code)
    }

    /// Push a code's expiry out to `days` from now. Returns false when the
    /// code does not resolve.
    pub fn extend(&self, code: &str, days: i64) -> Result<bool, StoreError> {
        let state = match self.store.find_by_reference_code(code)? {
            Some(state) => state,
            None => return Ok(false),
        };
        let patch = StatePatch {
            reference_code_expires_at: Some(Utc::now() + Duration::days(days)),
            ..StatePatch::default()
        };
        self.store.update(&state.session_id, state.version, patch)?;
        tracing::info!(code, days, "reference code extended");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::intake::domain::{Channel, FormData, NewState, Step};
    use crate::workflows::intake::store::MemoryStateStore;
    use chrono::Duration;

    struct FixedCodes(&'static str);

    impl CodeGenerator for FixedCodes {
        fn mint(&self) -> String {
            self.0.to_string()
        }
    }

    fn seeded_store(session_id: &str) -> Arc<MemoryStateStore> {
        let store = Arc::new(MemoryStateStore::new());
        store
            .create(NewState {
                session_id: session_id.to_string(),
                channel: Channel::Web,
                user_identifier: "user-1".to_string(),
                current_step: Step::Employer,
                form_data: FormData::new(),
                metadata: FormData::new(),
                expires_at: Utc::now() + Duration::hours(24),
                reference_code: None,
                reference_code_expires_at: None,
            })
            .expect("seed state");
        store
    }

    #[test]
    fn minted_codes_are_six_uppercase_alphanumerics() {
        for _ in 0..32 {
            let code = OsRngCodes.mint();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code
                .chars()
                .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit()));
        }
    }

    #[test]
    fn generate_is_idempotent_for_a_live_code() {
        let store = seeded_store("web_abc");
        let service = ReferenceCodeService::new(store.clone(), Arc::new(OsRngCodes));
        let first = service.generate("web_abc").expect("first");
        let second = service.generate("web_abc").expect("second");
        assert_eq!(first, second);
        assert!(service.validate(&first).expect("validate"));
    }

    #[test]
    fn near_expiry_code_is_renewed_on_reuse() {
        let store = seeded_store("web_abc");
        let state = store.get("web_abc").expect("get").expect("present");
        store
            .update(
                "web_abc",
                state.version,
                StatePatch {
                    reference_code: Some("AB12CD".to_string()),
                    reference_code_expires_at: Some(Utc::now() + Duration::days(2)),
                    ..StatePatch::default()
                },
            )
            .expect("seed code");

        let service = ReferenceCodeService::new(store.clone(), Arc::new(OsRngCodes));
        let code = service.generate("web_abc").expect("generate");
        assert_eq!(code, "AB12CD");
        let renewed = store.get("web_abc").expect("get").expect("present");
        let remaining = renewed.reference_code_expires_at.expect("expiry") - Utc::now();
        assert!(remaining > Duration::days(DEFAULT_VALIDITY_DAYS - 1));
    }

    #[test]
    fn collision_exhaustion_is_reported() {
        let store = seeded_store("web_abc");
        // Another session already owns the only code the generator can mint.
        store
            .create(NewState {
                session_id: "web_other".to_string(),
                channel: Channel::Web,
                user_identifier: "user-2".to_string(),
                current_step: Step::Employer,
                form_data: FormData::new(),
                metadata: FormData::new(),
                expires_at: Utc::now() + Duration::hours(24),
                reference_code: Some("AAAAAA".to_string()),
                reference_code_expires_at: Some(Utc::now() + Duration::days(30)),
            })
            .expect("seed collision");

        let service = ReferenceCodeService::new(store, Arc::new(FixedCodes("AAAAAA")));
        let error = service.generate("web_abc").unwrap_err();
        assert!(matches!(
            error,
            CodeError::GenerationExhausted {
                attempts: DEFAULT_MAX_ATTEMPTS
            }
        ));
    }

    #[test]
    fn extend_reports_missing_codes() {
        let store = seeded_store("web_abc");
        let service = ReferenceCodeService::new(store.clone(), Arc::new(OsRngCodes));
        assert!(!service.extend("NOPE99", 30).expect("extend"));

        let code = service.generate("web_abc").expect("generate");
        assert!(service.extend(&code, 45).expect("extend"));
        let state = store.get("web_abc").expect("get").expect("present");
        let remaining = state.reference_code_expires_at.expect("expiry") - Utc::now();
        assert!(remaining > Duration::days(44));
    }

    #[test]
    fn unknown_session_is_reported() {
        let store = Arc::new(MemoryStateStore::new());
        let service = ReferenceCodeService::new(store, Arc::new(OsRngCodes));
        assert!(matches!(
            service.generate("web_missing").unwrap_err(),
            CodeError::SessionNotFound
        ));
    }
}
