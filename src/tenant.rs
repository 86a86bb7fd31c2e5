// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tenant context switching.
//!
//! In a multi-tenant deployment every tenant's batch must be replayed while
//! the host is switched to that tenant, so that collection names resolve to
//! the tenant's tables. [`TenantScope`] switches on entry and restores the
//! previous tenant when dropped. That covers early returns, `?`, panics and
//! cancelled futures alike.
//!
//! The active tenant is process-wide state, so switched work is serialized
//! through the context's [`switch_lock`](TenantContext::switch_lock): two
//! flushes never hold the host switched at the same time, and
//! [`settled_tenant`] never observes a tenant some flush switched into.
//!
//! # Example
//!
//! ```
//! use mirror_sync::tenant::{HostTenantContext, TenantContext, TenantScope};
//!
//! let ctx = HostTenantContext::new(1);
//! {
//!     let _scope = TenantScope::enter(&ctx, true, 3).unwrap();
//!     assert_eq!(ctx.current(), 3);
//! }
//! assert_eq!(ctx.current(), 1);
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::batching::TenantQueue;
use crate::entity::{MutationRecord, TenantId};
use crate::metrics;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Unknown tenant {0}")]
    UnknownTenant(TenantId),
    #[error("Switch to tenant {tenant} failed: {reason}")]
    SwitchFailed { tenant: TenantId, reason: String },
}

/// Host capability for selecting the active tenant.
pub trait TenantContext: Send + Sync {
    fn current(&self) -> TenantId;

    fn switch_to(&self, tenant: TenantId) -> Result<(), ContextError>;

    /// Return to a tenant previously reported by [`current`](Self::current).
    fn restore(&self, previous: TenantId);

    /// Held for as long as any caller keeps the host switched.
    fn switch_lock(&self) -> &Mutex<()>;
}

/// In-process tenant context.
///
/// Optionally restricted to a known set of tenants, in which case switching
/// to anything else fails with [`ContextError::UnknownTenant`].
pub struct HostTenantContext {
    current: AtomicU64,
    known: RwLock<Option<HashSet<TenantId>>>,
    switches: AtomicUsize,
    switching: Mutex<()>,
}

impl HostTenantContext {
    #[must_use]
    pub fn new(main_tenant: TenantId) -> Self {
        Self {
            current: AtomicU64::new(main_tenant),
            known: RwLock::new(None),
            switches: AtomicUsize::new(0),
            switching: Mutex::new(()),
        }
    }

    /// Context that only accepts the listed tenants (plus the main one).
    pub fn with_tenants(main_tenant: TenantId, tenants: impl IntoIterator<Item = TenantId>) -> Self {
        let mut known: HashSet<TenantId> = tenants.into_iter().collect();
        known.insert(main_tenant);
        let ctx = Self::new(main_tenant);
        *ctx.known.write() = Some(known);
        ctx
    }

    /// Successful switches so far
    #[must_use]
    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::Relaxed)
    }
}

impl TenantContext for HostTenantContext {
    fn current(&self) -> TenantId {
        self.current.load(Ordering::SeqCst)
    }

    fn switch_to(&self, tenant: TenantId) -> Result<(), ContextError> {
        if let Some(known) = self.known.read().as_ref() {
            if !known.contains(&tenant) {
                return Err(ContextError::UnknownTenant(tenant));
            }
        }
        self.current.store(tenant, Ordering::SeqCst);
        self.switches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn restore(&self, previous: TenantId) {
        self.current.store(previous, Ordering::SeqCst);
    }

    fn switch_lock(&self) -> &Mutex<()> {
        &self.switching
    }
}

/// The host's own tenant, read once no switched work is in flight.
pub async fn settled_tenant(ctx: &dyn TenantContext) -> TenantId {
    let _guard = ctx.switch_lock().lock().await;
    ctx.current()
}

/// Switched tenant context, restored on drop.
///
/// With `multi_tenant == false` entering and leaving are no-ops.
#[must_use = "the previous tenant is restored as soon as the scope is dropped"]
pub struct TenantScope<'a> {
    ctx: &'a dyn TenantContext,
    previous: Option<TenantId>,
}

impl<'a> TenantScope<'a> {
    pub fn enter(ctx: &'a dyn TenantContext, multi_tenant: bool, tenant: TenantId) -> Result<Self, ContextError> {
        if !multi_tenant {
            return Ok(Self { ctx, previous: None });
        }

        let previous = ctx.current();
        if let Err(e) = ctx.switch_to(tenant) {
            // A half-applied switch must not leak
            ctx.restore(previous);
            metrics::record_context_switch_failure();
            warn!(tenant, error = %e, "Tenant context switch failed");
            return Err(e);
        }
        debug!(from = previous, to = tenant, "Switched tenant context");
        Ok(Self { ctx, previous: Some(previous) })
    }
}

impl Drop for TenantScope<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.ctx.restore(previous);
        }
    }
}

/// Run `f` with the host switched to `tenant`.
pub async fn with_tenant_context<F, Fut, T>(
    ctx: &dyn TenantContext,
    multi_tenant: bool,
    tenant: TenantId,
    f: F,
) -> Result<T, ContextError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let _guard = if multi_tenant { Some(ctx.switch_lock().lock().await) } else { None };
    in_scope(ctx, multi_tenant, tenant, f).await
}

// Caller holds the switch lock (or runs single-tenant)
async fn in_scope<F, Fut, T>(ctx: &dyn TenantContext, multi_tenant: bool, tenant: TenantId, f: F) -> Result<T, ContextError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let _scope = TenantScope::enter(ctx, multi_tenant, tenant)?;
    Ok(f().await)
}

/// Outcome of visiting one tenant's batch.
#[derive(Debug)]
pub struct TenantVisit<T> {
    pub tenant_id: TenantId,
    /// Records handed over (or skipped, if the switch failed)
    pub records: usize,
    pub outcome: Result<T, ContextError>,
}

/// Replays a drained [`TenantQueue`] tenant by tenant.
pub struct TenantIterator<'a> {
    ctx: &'a dyn TenantContext,
    multi_tenant: bool,
}

impl<'a> TenantIterator<'a> {
    pub fn new(ctx: &'a dyn TenantContext, multi_tenant: bool) -> Self {
        Self { ctx, multi_tenant }
    }

    /// Visit tenants in queue order. A failed switch skips that tenant and
    /// moves on; it never stops the iteration.
    ///
    /// The switch lock is held for the whole visit, so overlapping flushes
    /// take turns instead of restoring each other's tenants.
    pub async fn for_each<F, Fut, T>(&self, queue: TenantQueue, mut op: F) -> Vec<TenantVisit<T>>
    where
        F: FnMut(TenantId, Vec<MutationRecord>) -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = if self.multi_tenant { Some(self.ctx.switch_lock().lock().await) } else { None };
        let mut visits = Vec::new();
        for batch in queue {
            let records = batch.records.len();
            let outcome = in_scope(self.ctx, self.multi_tenant, batch.tenant_id, || {
                op(batch.tenant_id, batch.records)
            })
            .await;
            visits.push(TenantVisit {
                tenant_id: batch.tenant_id,
                records,
                outcome,
            });
        }
        visits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, NaturalKey};
    use std::sync::Arc;

    fn queue(tenants: &[TenantId]) -> TenantQueue {
        let mut queue = TenantQueue::default();
        for (i, tenant) in tenants.iter().enumerate() {
            queue.push(MutationRecord::delete(EntityKind::ContentItem, *tenant, NaturalKey::Id(i as u64)));
        }
        queue
    }

    #[test]
    fn test_scope_restores_on_drop() {
        let ctx = HostTenantContext::new(1);
        {
            let _scope = TenantScope::enter(&ctx, true, 4).unwrap();
            assert_eq!(ctx.current(), 4);
        }
        assert_eq!(ctx.current(), 1);
        assert_eq!(ctx.switch_count(), 1);
    }

    #[test]
    fn test_single_tenant_is_noop() {
        let ctx = HostTenantContext::new(1);
        let _scope = TenantScope::enter(&ctx, false, 4).unwrap();
        assert_eq!(ctx.current(), 1);
        assert_eq!(ctx.switch_count(), 0);
    }

    #[test]
    fn test_failed_switch_leaves_context_intact() {
        let ctx = HostTenantContext::with_tenants(1, [2]);
        assert_eq!(
            TenantScope::enter(&ctx, true, 9).err(),
            Some(ContextError::UnknownTenant(9))
        );
        assert_eq!(ctx.current(), 1);
    }

    #[test]
    fn test_scope_restores_on_panic() {
        let ctx = Arc::new(HostTenantContext::new(1));
        let inner = ctx.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _scope = TenantScope::enter(inner.as_ref(), true, 5).unwrap();
            panic!("closure failed");
        }));
        assert!(result.is_err());
        assert_eq!(ctx.current(), 1);
    }

    #[tokio::test]
    async fn test_with_tenant_context_restores_on_error() {
        let ctx = HostTenantContext::new(1);
        let result: Result<Result<(), String>, ContextError> =
            with_tenant_context(&ctx, true, 2, || async { Err("sink down".to_string()) }).await;

        assert_eq!(result, Ok(Err("sink down".to_string())));
        assert_eq!(ctx.current(), 1);
    }

    #[tokio::test]
    async fn test_iterator_visits_in_queue_order_under_each_tenant() {
        let ctx = HostTenantContext::new(1);
        let iterator = TenantIterator::new(&ctx, true);
        let seen = parking_lot::Mutex::new(Vec::new());

        let visits = iterator
            .for_each(queue(&[3, 2, 3]), |tenant, records| {
                seen.lock().push((tenant, ctx.current(), records.len()));
                async {}
            })
            .await;

        assert_eq!(*seen.lock(), vec![(3, 3, 2), (2, 2, 1)]);
        assert_eq!(visits.len(), 2);
        assert_eq!(ctx.current(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_iterations_restore_main_tenant() {
        let ctx = HostTenantContext::with_tenants(1, [2, 3]);
        let seen = parking_lot::Mutex::new(Vec::new());
        let (seen_ref, ctx_ref) = (&seen, &ctx);

        let slow = async {
            TenantIterator::new(ctx_ref, true)
                .for_each(queue(&[2]), |tenant, _| async move {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    seen_ref.lock().push((tenant, ctx_ref.current()));
                })
                .await
        };
        let fast = async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            TenantIterator::new(ctx_ref, true)
                .for_each(queue(&[3]), |tenant, _| async move {
                    seen_ref.lock().push((tenant, ctx_ref.current()));
                })
                .await
        };
        tokio::join!(slow, fast);

        assert_eq!(*seen.lock(), vec![(2, 2), (3, 3)]);
        assert_eq!(ctx.current(), 1);
    }

    #[tokio::test]
    async fn test_settled_tenant_waits_for_switched_work() {
        let ctx = HostTenantContext::with_tenants(1, [2]);

        let iterator = TenantIterator::new(&ctx, true);
        let flush = iterator.for_each(queue(&[2]), |_, _| async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        });
        let read = async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            settled_tenant(&ctx).await
        };
        let (_, tenant) = tokio::join!(flush, read);

        assert_eq!(tenant, 1);
        assert_eq!(ctx.current(), 1);
    }

    #[tokio::test]
    async fn test_iterator_skips_unknown_tenant_and_continues() {
        let ctx = HostTenantContext::with_tenants(1, [2]);
        let iterator = TenantIterator::new(&ctx, true);

        let visits = iterator
            .for_each(queue(&[7, 2]), |tenant, _| async move { tenant })
            .await;

        assert_eq!(visits[0].outcome, Err(ContextError::UnknownTenant(7)));
        assert_eq!(visits[0].records, 1);
        assert_eq!(visits[1].outcome, Ok(2));
        assert_eq!(ctx.current(), 1);
    }
}
