//! Client unblock seam.
//!
//! When the last device retires its work for a request, the winning worker
//! hands the request back to the host through this trait. The scheduler
//! guarantees at most one unblock per request: the client handle is taken
//! out of the request state under its lock before the call is made.

use std::sync::Arc;

use crate::run_info::{ClientId, DagRunInfo};

/// Host primitive that delivers the reply for a finished request.
///
/// Implementations receive ownership of the final [`DagRunInfo`] reference
/// held by the scheduler; the request is disposed when the host drops it
/// after delivering the reply. Delivery may be asynchronous.
pub trait ClientNotifier: Send + Sync {
    /// Unblock `client` with the finished request.
    fn unblock(&self, client: ClientId, rinfo: Arc<DagRunInfo>);
}
