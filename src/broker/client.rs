//! # Broker Client
//!
//! The cloneable, type-safe handle other tasks use to talk to a broker. It
//! forwards requests over the broker's bounded command mailbox and returns
//! results via oneshot channels. Behaviors running inside the broker do not
//! need a client; they get the context directly.

use tokio::sync::{mpsc, oneshot};

use crate::broker::core::BrokerMsg;
use crate::broker::error::BrokerError;
use crate::model::ResourceHandle;

/// Client side of a broker's command mailbox. Cheap to clone and share.
pub struct BrokerClient<M> {
    sender: mpsc::Sender<BrokerMsg<M>>,
}

impl<M> Clone for BrokerClient<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<M: Send + 'static> BrokerClient<M> {
    pub(crate) fn new(sender: mpsc::Sender<BrokerMsg<M>>) -> Self {
        Self { sender }
    }

    /// Sends an ordinary actor message to the behavior.
    pub async fn send(&self, message: M) -> Result<(), BrokerError> {
        self.sender
            .send(BrokerMsg::Message(message))
            .await
            .map_err(|_| BrokerError::BrokerClosed)
    }

    /// Queues bytes for a handle owned by this broker.
    pub async fn queue_write(
        &self,
        handle: ResourceHandle,
        bytes: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(BrokerMsg::QueueWrite {
                handle,
                bytes,
                respond_to,
            })
            .await
            .map_err(|_| BrokerError::BrokerClosed)?;
        response.await.map_err(|_| BrokerError::BrokerDropped)?
    }

    /// Gracefully closes a handle owned by this broker.
    pub async fn close(&self, handle: ResourceHandle) -> Result<(), BrokerError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(BrokerMsg::Close { handle, respond_to })
            .await
            .map_err(|_| BrokerError::BrokerClosed)?;
        response.await.map_err(|_| BrokerError::BrokerDropped)?
    }

    /// Asks the broker to terminate and waits until it has drained and
    /// closed every remaining handle.
    pub async fn shutdown(&self) -> Result<(), BrokerError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(BrokerMsg::Shutdown { respond_to })
            .await
            .map_err(|_| BrokerError::BrokerClosed)?;
        response.await.map_err(|_| BrokerError::BrokerDropped)?
    }
}
