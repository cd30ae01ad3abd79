use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::Sender;
use tracing::{debug, trace};

use crate::events::{Block, Reaction, Resource, StateObjectEvent, StorageState, Topic};

/// Host-side publish/subscribe mechanism the bridge listens to.
pub trait EventSource: Send + Sync {
    /// Deliver every future payload published under `topic` to `queue`.
    fn subscribe(&self, topic: Topic, queue: Sender<Reaction>);
}

/// In-memory [`EventSource`] keyed by topic.
///
/// Publishing waits for room in each subscriber's bounded queue, so a slow
/// consumer slows its publishers down instead of losing events. Queues whose
/// receiver has been dropped are pruned on the next publish to their topic.
#[derive(Debug, Default)]
pub struct Reactor {
    topics: Mutex<HashMap<Topic, Vec<Sender<Reaction>>>>,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `resource` under `topic`. Returns the number of queues it was
    /// delivered to.
    pub async fn publish(&self, topic: Topic, resource: Resource) -> usize {
        // Clone the senders so the lock is not held across an await
        let subscribers = {
            let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            match topics.get(&topic) {
                Some(subscribers) => subscribers.clone(),
                None => {
                    trace!(target: "reactor", "No subscribers for {}", topic);
                    return 0;
                }
            }
        };

        let mut delivered = 0;
        let mut saw_closed = false;

        for queue in subscribers {
            let reaction = Reaction {
                topic: topic.clone(),
                resource: resource.clone(),
            };

            match queue.send(reaction).await {
                Ok(()) => delivered += 1,
                Err(_) => saw_closed = true,
            }
        }

        if saw_closed {
            self.prune(&topic);
        }

        delivered
    }

    pub async fn publish_block(&self, block: Block) -> usize {
        self.publish(Topic::new_block(), Resource::Block(block)).await
    }

    pub async fn publish_state_object(&self, event: StateObjectEvent) -> usize {
        let topic = Topic::object(&event.address);
        self.publish(topic, Resource::StateObject(event)).await
    }

    pub async fn publish_storage(&self, storage: StorageState) -> usize {
        let topic = Topic::object(&storage.state_address);
        self.publish(topic, Resource::Storage(storage)).await
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    fn prune(&self, topic: &Topic) {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|queue| !queue.is_closed());
            if subscribers.is_empty() {
                topics.remove(topic);
            }
            debug!(target: "reactor", "Pruned closed subscribers for {}", topic);
        }
    }
}

impl EventSource for Reactor {
    fn subscribe(&self, topic: Topic, queue: Sender<Reaction>) {
        debug!(target: "reactor", "Subscribing queue to {}", topic);
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push(queue);
    }
}
