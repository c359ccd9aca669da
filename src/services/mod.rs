pub mod lifecycle;
pub mod notifier;
pub mod payment;
pub mod reconciliation;
pub mod sweeper;

pub use lifecycle::ListingLifecycle;
pub use notifier::{Notification, Notifier};
pub use payment::PaymentService;
pub use reconciliation::ReconciliationEngine;
pub use sweeper::run_sweeper;
