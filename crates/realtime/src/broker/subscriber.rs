use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub(crate) u64);

pub trait Subscriber: Send + Sync {
    /// Queues a serialized frame for delivery. Returns false when the
    /// connection cannot accept it (closed or backpressured).
    fn send(&self, payload: Arc<str>) -> bool;
    /// Connection id used to exclude the publisher from its own fan-out.
    fn exclude_id(&self) -> &str;
    /// Identity key (`user:{id}` / `partner:{id}`) for connection caps.
    fn identity_key(&self) -> &str;
    fn is_closed(&self) -> bool;
}
