//! Signer pool
//!
//! Owns the funded accounts and hands out exclusive leases so that two
//! concurrently running scenarios never share an account mid-flight.

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use super::types::{LeaseRequest, PrivateKey, Signer, SignerKind};

/// Signer pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Signer pool already initialized")]
    AlreadyInitialized,

    #[error("Signer pool exhausted: {requested} {kind} signer(s) requested but the pool holds {available}")]
    Exhausted {
        kind: SignerKind,
        requested: usize,
        available: usize,
    },

    #[error("Got {signers} signers but {keys} private keys")]
    KeyMismatch { signers: usize, keys: usize },

    #[error("Invalid {kind} address: {address}")]
    InvalidAddress { kind: SignerKind, address: String },

    #[error("Signer {0} is listed more than once")]
    DuplicateSigner(String),

    #[error("Signer {0} does not belong to the pool")]
    UnknownSigner(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LeaseState {
    Free,
    Leased,
}

#[derive(Debug)]
struct Slot {
    signer: Signer,
    state: LeaseState,
}

#[derive(Debug, Default)]
struct PoolState {
    initialized: bool,
    slots: Vec<Slot>,
    leased: usize,
    peak_leased: usize,
}

impl PoolState {
    fn total(&self, kind: SignerKind) -> usize {
        self.slots.iter().filter(|s| s.signer.kind == kind).count()
    }

    fn free(&self, kind: SignerKind) -> usize {
        self.slots
            .iter()
            .filter(|s| s.signer.kind == kind && s.state == LeaseState::Free)
            .count()
    }

    fn slot(&self, signer: &Signer) -> Option<&Slot> {
        self.slots.iter().find(|s| s.signer.same_account(signer))
    }

    fn check_capacity(&self, request: &LeaseRequest, pinned: &[Signer]) -> Result<(), PoolError> {
        if let Some(unknown) = pinned.iter().find(|p| self.slot(p).is_none()) {
            return Err(PoolError::UnknownSigner(unknown.address.clone()));
        }
        for kind in SignerKind::all() {
            let requested = wanted(request, pinned, kind);
            let available = self.total(kind);
            if requested > 0 && requested > available {
                return Err(PoolError::Exhausted {
                    kind,
                    requested,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Take every signer of the request at once, or nothing. Pinned
    /// signers are taken first and count towards their kind.
    fn try_take(&mut self, request: &LeaseRequest, pinned: &[Signer]) -> Option<Vec<Signer>> {
        let pinned_free = pinned
            .iter()
            .all(|p| matches!(self.slot(p), Some(slot) if slot.state == LeaseState::Free));
        if !pinned_free
            || SignerKind::all()
                .into_iter()
                .any(|kind| self.free(kind) < wanted(request, pinned, kind))
        {
            return None;
        }

        let mut taken = Vec::new();
        for signer in pinned {
            if let Some(slot) = self.slots.iter_mut().find(|s| s.signer.same_account(signer)) {
                slot.state = LeaseState::Leased;
                taken.push(slot.signer.clone());
            }
        }
        for kind in SignerKind::all() {
            let mut remaining = wanted(request, pinned, kind) - count_kind(pinned, kind);
            for slot in self.slots.iter_mut() {
                if remaining == 0 {
                    break;
                }
                if slot.signer.kind == kind && slot.state == LeaseState::Free {
                    slot.state = LeaseState::Leased;
                    taken.push(slot.signer.clone());
                    remaining -= 1;
                }
            }
        }

        self.leased += taken.len();
        self.peak_leased = self.peak_leased.max(self.leased);
        Some(taken)
    }
}

fn count_kind(signers: &[Signer], kind: SignerKind) -> usize {
    signers.iter().filter(|s| s.kind == kind).count()
}

/// Signers of `kind` a lease takes: the request, or more if more are pinned
fn wanted(request: &LeaseRequest, pinned: &[Signer], kind: SignerKind) -> usize {
    request.of(kind).max(count_kind(pinned, kind))
}

/// Fixed-size pool of funded signers with exclusive leasing
#[derive(Debug, Default)]
pub struct SignerPool {
    state: Mutex<PoolState>,
    released: Notify,
}

impl SignerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the pool; signers and keys are paired by position
    pub async fn init_signers(
        &self,
        signers: Vec<Signer>,
        private_keys: Vec<PrivateKey>,
    ) -> Result<(), PoolError> {
        if signers.len() != private_keys.len() {
            return Err(PoolError::KeyMismatch {
                signers: signers.len(),
                keys: private_keys.len(),
            });
        }

        for (i, signer) in signers.iter().enumerate() {
            if !signer.kind.is_valid_address(&signer.address) {
                return Err(PoolError::InvalidAddress {
                    kind: signer.kind,
                    address: signer.address.clone(),
                });
            }
            if signers[..i].iter().any(|other| other.same_account(signer)) {
                return Err(PoolError::DuplicateSigner(signer.address.clone()));
            }
        }

        let mut state = self.state.lock().await;
        if state.initialized {
            return Err(PoolError::AlreadyInitialized);
        }

        state.slots = signers
            .into_iter()
            .zip(private_keys)
            .map(|(signer, key)| Slot {
                signer: signer.with_private_key(key),
                state: LeaseState::Free,
            })
            .collect();
        state.initialized = true;

        debug!(
            "Signer pool initialized with {} evm and {} native signers",
            state.total(SignerKind::Evm),
            state.total(SignerKind::Native)
        );
        Ok(())
    }

    /// Lease one signer of the given kind, waiting until one is free
    pub async fn lease(&self, kind: SignerKind) -> Result<Signer, PoolError> {
        let mut signers = self.lease_many(&LeaseRequest::single(kind)).await?;
        signers.pop().ok_or(PoolError::Exhausted {
            kind,
            requested: 1,
            available: 0,
        })
    }

    /// Lease all signers of a request atomically, waiting until enough are free
    pub async fn lease_many(&self, request: &LeaseRequest) -> Result<Vec<Signer>, PoolError> {
        self.lease_with(request, &[]).await
    }

    /// Like `lease_many`, but the lease must include the `pinned` accounts,
    /// which come first in the returned list
    pub async fn lease_with(
        &self,
        request: &LeaseRequest,
        pinned: &[Signer],
    ) -> Result<Vec<Signer>, PoolError> {
        if request.is_empty() && pinned.is_empty() {
            return Ok(Vec::new());
        }

        loop {
            // Registered before the check so a release in between is not missed
            let released = self.released.notified();
            {
                let mut state = self.state.lock().await;
                state.check_capacity(request, pinned)?;
                if let Some(signers) = state.try_take(request, pinned) {
                    return Ok(signers);
                }
            }
            debug!("Waiting for free signers ({})", request);
            released.await;
        }
    }

    /// Return a signer to the pool; releasing a free signer is a no-op
    pub async fn release(&self, signer: &Signer) {
        let mut state = self.state.lock().await;
        let slot = state
            .slots
            .iter_mut()
            .find(|slot| slot.signer.same_account(signer));

        match slot {
            Some(slot) if slot.state == LeaseState::Leased => {
                slot.state = LeaseState::Free;
                state.leased -= 1;
                drop(state);
                self.released.notify_waiters();
            }
            Some(_) => debug!("Signer {} already free", signer),
            None => warn!("Released signer {} does not belong to the pool", signer),
        }
    }

    pub async fn release_all(&self, signers: &[Signer]) {
        for signer in signers {
            self.release(signer).await;
        }
    }

    /// Free signer counts as (evm, native)
    pub async fn count(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.free(SignerKind::Evm), state.free(SignerKind::Native))
    }

    /// Total signer counts as (evm, native)
    pub async fn total(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.total(SignerKind::Evm), state.total(SignerKind::Native))
    }

    /// Largest number of signers leased at the same time
    pub async fn peak_leased(&self) -> usize {
        self.state.lock().await.peak_leased
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn evm(n: u8) -> Signer {
        Signer::new(format!("0x{:040x}", n), SignerKind::Evm)
    }

    fn native(n: u8) -> Signer {
        Signer::new(format!("zil1native{n}"), SignerKind::Native)
    }

    async fn pool_with(signers: Vec<Signer>) -> SignerPool {
        let keys = signers
            .iter()
            .map(|s| PrivateKey::new(format!("key-{}", s.address)))
            .collect();
        let pool = SignerPool::new();
        pool.init_signers(signers, keys).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let pool = pool_with(vec![evm(1)]).await;
        let err = pool
            .init_signers(vec![evm(2)], vec![PrivateKey::new("k")])
            .await
            .unwrap_err();
        assert_eq!(err, PoolError::AlreadyInitialized);
    }

    #[tokio::test]
    async fn test_key_mismatch() {
        let pool = SignerPool::new();
        let err = pool.init_signers(vec![evm(1), evm(2)], vec![PrivateKey::new("k")]).await;
        assert!(matches!(err, Err(PoolError::KeyMismatch { signers: 2, keys: 1 })));
    }

    #[tokio::test]
    async fn test_lease_reduces_count() {
        let pool = pool_with(vec![evm(1), evm(2), evm(3), native(1)]).await;
        assert_eq!(pool.count().await, (3, 1));

        let a = pool.lease(SignerKind::Evm).await.unwrap();
        let b = pool.lease(SignerKind::Evm).await.unwrap();
        assert!(!a.same_account(&b));
        assert_eq!(pool.count().await, (1, 1));
        assert_eq!(pool.peak_leased().await, 2);
    }

    #[tokio::test]
    async fn test_lease_carries_private_key() {
        let pool = pool_with(vec![evm(7)]).await;
        let signer = pool.lease(SignerKind::Evm).await.unwrap();
        assert_eq!(signer.private_key.expose(), format!("key-{}", evm(7).address));
    }

    #[tokio::test]
    async fn test_release_then_lease_returns_same_signer() {
        let pool = pool_with(vec![evm(1)]).await;
        let first = pool.lease(SignerKind::Evm).await.unwrap();
        pool.release(&first).await;
        let second = pool.lease(SignerKind::Evm).await.unwrap();
        assert!(first.same_account(&second));
    }

    #[tokio::test]
    async fn test_double_release_is_noop() {
        let pool = pool_with(vec![evm(1), evm(2)]).await;
        let signer = pool.lease(SignerKind::Evm).await.unwrap();
        pool.release(&signer).await;
        pool.release(&signer).await;
        assert_eq!(pool.count().await, (2, 0));
    }

    #[tokio::test]
    async fn test_exhausted_kind() {
        let pool = pool_with(vec![evm(1)]).await;
        let err = pool.lease(SignerKind::Native).await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { kind: SignerKind::Native, .. }));

        let err = pool.lease_many(&LeaseRequest::new(2, 0)).await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { requested: 2, available: 1, .. }));
    }

    #[tokio::test]
    async fn test_lease_blocks_until_release() {
        let pool = Arc::new(pool_with(vec![evm(1)]).await);
        let held = pool.lease(SignerKind::Evm).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.lease(SignerKind::Evm).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(&held).await;
        let leased = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(leased.same_account(&held));
    }

    #[test]
    fn test_release_wakes_pending_lease() {
        let pool = tokio_test::block_on(pool_with(vec![evm(1)]));
        let held = tokio_test::block_on(pool.lease(SignerKind::Evm)).unwrap();

        let mut waiter = tokio_test::task::spawn(pool.lease(SignerKind::Evm));
        tokio_test::assert_pending!(waiter.poll());

        tokio_test::block_on(pool.release(&held));
        assert!(waiter.is_woken());
        let leased = tokio_test::assert_ready_ok!(waiter.poll());
        assert!(leased.same_account(&held));
    }

    #[tokio::test]
    async fn test_concurrent_leases_are_distinct() {
        let pool = Arc::new(pool_with((1..=8).map(evm).collect()).await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.lease(SignerKind::Evm).await.unwrap() })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let signer = handle.await.unwrap();
            assert!(seen.insert(signer.address));
        }
        assert_eq!(pool.count().await, (0, 0));
    }

    #[tokio::test]
    async fn test_multi_lease_is_all_or_nothing() {
        let pool = Arc::new(pool_with(vec![evm(1), evm(2)]).await);
        let one = pool.lease(SignerKind::Evm).await.unwrap();

        let pair = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.lease_many(&LeaseRequest::new(2, 0)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        // The waiting request must not hold the remaining signer
        assert_eq!(pool.count().await, (1, 0));

        pool.release(&one).await;
        let pair = pair.await.unwrap().unwrap();
        assert_eq!(pair.len(), 2);
        assert_eq!(pool.count().await, (0, 0));
    }

    #[tokio::test]
    async fn test_duplicate_accounts_rejected() {
        let pool = SignerPool::new();
        let upper = Signer::new(evm(0xab).address.replace("ab", "AB"), SignerKind::Evm);
        let err = pool
            .init_signers(
                vec![evm(0xab), evm(2), upper],
                vec![PrivateKey::new("a"), PrivateKey::new("b"), PrivateKey::new("c")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::DuplicateSigner(_)));
        assert_eq!(pool.total().await, (0, 0));
    }

    #[tokio::test]
    async fn test_lease_with_pinned_signer() {
        let pool = pool_with(vec![evm(1), evm(2), evm(3), native(1)]).await;

        let signers = pool
            .lease_with(&LeaseRequest::new(2, 1), &[evm(3)])
            .await
            .unwrap();
        assert_eq!(signers.len(), 3);
        assert!(signers[0].same_account(&evm(3)));
        assert_eq!(signers[0].private_key.expose(), format!("key-{}", evm(3).address));
        assert!(signers.iter().filter(|s| s.kind == SignerKind::Evm).count() == 2);
        assert_eq!(pool.count().await, (1, 0));

        let err = pool
            .lease_with(&LeaseRequest::new(1, 0), &[evm(9)])
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::UnknownSigner(_)));
    }

    #[tokio::test]
    async fn test_pinned_lease_waits_for_that_account() {
        let pool = Arc::new(pool_with(vec![evm(1), evm(2)]).await);
        let held = pool.lease(SignerKind::Evm).await.unwrap();

        let waiter = {
            let (pool, pinned) = (pool.clone(), held.clone());
            tokio::spawn(async move { pool.lease_with(&LeaseRequest::new(1, 0), &[pinned]).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        // Another account is free, but the pinned one is not
        assert!(!waiter.is_finished());
        assert_eq!(pool.count().await, (1, 0));

        pool.release(&held).await;
        let leased = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(leased.len(), 1);
        assert!(leased[0].same_account(&held));
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let pool = SignerPool::new();
        let err = pool
            .init_signers(
                vec![Signer::new("not-an-address", SignerKind::Evm)],
                vec![PrivateKey::new("k")],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidAddress { .. }));
    }
}
