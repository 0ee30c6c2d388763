//! Cooperative tokens (§5).
//!
//! Core operations are single-threaded per assembly instance; mutation,
//! passes and backend emission must not run concurrently on the same
//! assembly. External collaboration with the GPU runtime is serialized
//! through two mutex-like handles. No operation within the core itself
//! suspends — blocking happens only at token acquisition. Each token is a
//! thin handle newtype with `try_acquire`/`is_held` ergonomics rather than
//! exposing the raw mutex guard.

use std::sync::{Mutex, MutexGuard, TryLockError};

/// Exclusive access to the in-memory assembly for reads/writes.
#[derive(Debug, Default)]
pub struct AssemblyToken {
    lock: Mutex<()>,
}

/// Exclusive access to the GPU runtime's codegen/launch path.
#[derive(Debug, Default)]
pub struct ComputeToken {
    lock: Mutex<()>,
}

/// RAII guard; the token is released when this is dropped.
pub struct TokenGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

macro_rules! impl_token {
    ($ty:ident) => {
        impl $ty {
            pub fn new() -> Self {
                Self { lock: Mutex::new(()) }
            }

            /// Blocks until the token can be acquired.
            pub fn wait(&self) -> TokenGuard<'_> {
                let guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                TokenGuard { _guard: guard }
            }

            /// Returns a token immediately if available, `None` otherwise.
            /// Never blocks.
            pub fn request(&self) -> Option<TokenGuard<'_>> {
                match self.lock.try_lock() {
                    Ok(guard) => Some(TokenGuard { _guard: guard }),
                    Err(TryLockError::WouldBlock) => None,
                    Err(TryLockError::Poisoned(poisoned)) => {
                        Some(TokenGuard { _guard: poisoned.into_inner() })
                    }
                }
            }

            /// Non-blocking check of current availability. Racy by nature
            /// (the result may be stale the instant it is observed); only
            /// useful for diagnostics, never for correctness.
            pub fn is_held(&self) -> bool {
                self.request().is_none()
            }
        }
    };
}

impl_token!(AssemblyToken);
impl_token!(ComputeToken);

/// Blocks until the assembly token can be acquired.
pub fn wait_for_assembly_token(token: &AssemblyToken) -> TokenGuard<'_> {
    token.wait()
}

/// Returns the assembly token immediately if available.
pub fn request_assembly_token(token: &AssemblyToken) -> Option<TokenGuard<'_>> {
    token.request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembly_token_excludes_concurrent_holders() {
        let token = AssemblyToken::new();
        let first = token.request();
        assert!(first.is_some());
        assert!(token.request().is_none());
        drop(first);
        assert!(token.request().is_some());
    }

    #[test]
    fn wait_blocks_until_available_then_succeeds() {
        let token = AssemblyToken::new();
        {
            let _guard = wait_for_assembly_token(&token);
            assert!(token.is_held());
        }
        assert!(!token.is_held());
    }
}
