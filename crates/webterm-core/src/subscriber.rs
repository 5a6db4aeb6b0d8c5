//! Registry of connected clients that receive unsolicited updates.

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use webterm_types::{ClientId, Response, ResponseEnvelope};

/// Something that accepts pushed messages for one client.
///
/// `notify` must not block: it is called while the coordinator lock is held.
/// Returning `false` means the client is gone and it will be dropped.
pub trait Subscriber: Send {
    fn notify(&self, envelope: ResponseEnvelope) -> bool;
}

impl Subscriber for UnboundedSender<ResponseEnvelope> {
    fn notify(&self, envelope: ResponseEnvelope) -> bool {
        self.send(envelope).is_ok()
    }
}

/// Subscribers in connection order, keyed by the id the transport issued.
#[derive(Default)]
pub struct Subscribers {
    entries: Vec<(ClientId, Box<dyn Subscriber>)>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client, replacing any previous subscriber under the same id.
    /// Returns `true` if the id was not registered before.
    pub fn insert(&mut self, client: ClientId, subscriber: Box<dyn Subscriber>) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(id, _)| *id == client) {
            entry.1 = subscriber;
            return false;
        }
        self.entries.push((client, subscriber));
        true
    }

    /// Returns `true` if the client was registered.
    pub fn remove(&mut self, client: ClientId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(id, _)| *id != client);
        self.entries.len() != before
    }

    pub fn contains(&self, client: ClientId) -> bool {
        self.entries.iter().any(|(id, _)| *id == client)
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Push a message to one client.
    pub fn send_to(&mut self, client: ClientId, response: Response) -> bool {
        let Some(pos) = self.entries.iter().position(|(id, _)| *id == client) else {
            return false;
        };
        if self.entries[pos].1.notify(ResponseEnvelope::broadcast(response)) {
            return true;
        }
        debug!(target: "webterm::session", "Dropping closed subscriber {}", client);
        self.entries.remove(pos);
        false
    }

    /// Push the same message to every client.
    pub fn broadcast(&mut self, response: &Response) {
        self.broadcast_with(|_| response.clone());
    }

    /// Push a message built per recipient.
    pub fn broadcast_with(&mut self, mut message: impl FnMut(ClientId) -> Response) {
        self.entries.retain(|(id, subscriber)| {
            let delivered = subscriber.notify(ResponseEnvelope::broadcast(message(*id)));
            if !delivered {
                debug!(target: "webterm::session", "Dropping closed subscriber {}", id);
            }
            delivered
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn drain(rx: &mut UnboundedReceiver<ResponseEnvelope>) -> Vec<Response> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            assert_eq!(envelope.id, None);
            out.push(envelope.response);
        }
        out
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let mut subscribers = Subscribers::new();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        subscribers.insert(ClientId::new(), Box::new(tx_a));
        subscribers.insert(ClientId::new(), Box::new(tx_b));

        subscribers.broadcast(&Response::Ok);
        assert_eq!(drain(&mut rx_a), vec![Response::Ok]);
        assert_eq!(drain(&mut rx_b), vec![Response::Ok]);
    }

    #[test]
    fn test_closed_subscribers_are_pruned() {
        let mut subscribers = Subscribers::new();
        let gone = ClientId::new();
        let alive = ClientId::new();
        let (tx_gone, rx_gone) = unbounded_channel();
        let (tx_alive, mut rx_alive) = unbounded_channel();
        subscribers.insert(gone, Box::new(tx_gone));
        subscribers.insert(alive, Box::new(tx_alive));
        drop(rx_gone);

        subscribers.broadcast(&Response::status("hi"));
        assert!(!subscribers.contains(gone));
        assert!(subscribers.contains(alive));
        assert_eq!(drain(&mut rx_alive), vec![Response::status("hi")]);
    }

    #[test]
    fn test_personalized_broadcast() {
        let mut subscribers = Subscribers::new();
        let a = ClientId::new();
        let b = ClientId::new();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        subscribers.insert(a, Box::new(tx_a));
        subscribers.insert(b, Box::new(tx_b));

        subscribers.broadcast_with(|id| Response::owner_for(Some(a), id));
        assert_eq!(drain(&mut rx_a), vec![Response::owner_for(Some(a), a)]);
        assert_eq!(drain(&mut rx_b), vec![Response::owner_for(Some(a), b)]);
    }

    #[test]
    fn test_insert_and_remove_are_idempotent() {
        let mut subscribers = Subscribers::new();
        let id = ClientId::new();
        let (tx, _rx) = unbounded_channel();
        assert!(subscribers.insert(id, Box::new(tx.clone())));
        assert!(!subscribers.insert(id, Box::new(tx)));
        assert_eq!(subscribers.len(), 1);
        assert!(subscribers.remove(id));
        assert!(!subscribers.remove(id));
        assert!(subscribers.is_empty());
    }
}
