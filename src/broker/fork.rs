//! # Fork Protocol
//!
//! Hands a live connection from a broker to a dedicated, independently
//! scheduled broker running its own behavior: the way to isolate a long
//! protocol session from the rest of a broker's multiplexed traffic, or to
//! spread sessions across runtime workers.
//!
//! The hand-off must not lose buffered data, close the socket, or ever leave
//! the descriptor with zero or two owners. The sequence is:
//!
//! 1. take the record out of this table (multiplexer registration intact),
//! 2. build the child broker with the record adopted into its fresh table,
//! 3. reroute the descriptor's events to the child's sink in one registry
//!    update,
//! 4. spawn the child task.
//!
//! Readiness that was already queued here before step 3 is forwarded to the
//! child verbatim, so the old owner never translates an event for a handle it
//! gave away. Any failure before step 4 restores the record into this table.

use tracing::info;

use crate::broker::client::BrokerClient;
use crate::broker::core::{Broker, BrokerBehavior, BrokerContext};
use crate::broker::error::BrokerError;
use crate::model::{ResourceHandle, ResourceKind};

impl BrokerContext {
    /// Transfers ownership of an open connection to a newly spawned broker
    /// driven by `behavior`, returning the new broker's client.
    ///
    /// Fails with `InvalidHandle` when the handle is not an open connection
    /// owned by this broker, `AlreadyDetached` when it was forked before,
    /// `ResourceLimitExceeded` from the child's table, and `SpawnFailed` when
    /// the descriptor cannot be rerouted; in every failure case the handle
    /// stays (or is restored) here.
    pub fn fork<B>(
        &mut self,
        behavior: B,
        handle: ResourceHandle,
    ) -> Result<BrokerClient<B::Message>, BrokerError>
    where
        B: BrokerBehavior,
    {
        if let Some(record) = self.table.lookup(handle) {
            if handle.kind() != ResourceKind::Connection || !record.is_open() {
                return Err(BrokerError::InvalidHandle(handle));
            }
        }
        let record = match self.table.take(handle) {
            Ok(record) => record,
            // An absent handle breaks the precondition; a detached one keeps
            // its more specific error.
            Err(BrokerError::NotFound(h)) => return Err(BrokerError::InvalidHandle(h)),
            Err(e) => return Err(e),
        };
        let descriptor = record.descriptor();
        let child_name = format!("{}/{}", self.name, handle);

        let (child, client) =
            match Broker::<B::Message>::adopting(&self.runtime, child_name.clone(), record) {
                Ok(pair) => pair,
                Err((e, record)) => {
                    self.table.restore(record);
                    return Err(e);
                }
            };

        let child_sink = child.mux_sink();
        if let Err(e) = self.runtime.mux().reroute(descriptor, child_sink.clone()) {
            if let Some(record) = child.reclaim(handle) {
                self.table.restore(record);
            }
            return Err(BrokerError::SpawnFailed(e.to_string()));
        }

        // From here on the descriptor has exactly one owner: the child.
        // Stragglers already in our readiness queue are forwarded.
        self.forwards.insert(descriptor, child_sink);
        tokio::spawn(child.run(move |_ctx: &mut BrokerContext| behavior));
        info!(broker = %self.name, %handle, child = %child_name, "connection forked");
        Ok(client)
    }
}
