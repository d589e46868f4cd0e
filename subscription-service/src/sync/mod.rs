//! Subscription synchronization engine.
//!
//! Two convergence paths share the same reconciliation core: the inbound
//! provider webhook (interactive, hard-fail) and the scheduled bulk re-sync
//! (skip-and-log). Both are idempotent by subscription code, so either path
//! may run at any time without diverging from the other.

pub mod bulk;
pub mod cancel;
pub mod reconcile;
pub mod report;
pub mod resolver;

pub use bulk::{BulkSynchronizer, SyncPacing, SyncReport};
pub use cancel::CancellationReconciler;
pub use reconcile::{ReconcileInput, ReconcileMode, Reconciler};
pub use report::{monthly_active_counts, MonthlyCount};
pub use resolver::{NewSubscriber, UserResolver};
