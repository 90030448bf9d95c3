//! Bounded object pools for protocol values.
//!
//! Hot-path allocations (one [`Message`] per inbound line, one
//! [`LineBuffer`] per outbound line) are served from fixed-capacity pools
//! backed by a lock-free queue. Acquire and release never block: an empty
//! pool constructs a fresh item, a full pool lets the returned item drop.
//!
//! Items are handed out wrapped in a [`Pooled`] guard which scrubs the item
//! and returns it to the pool when dropped. This covers both the normal
//! recycle-after-write path and every early-error path with one mechanism.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, LazyLock};

use crossbeam_queue::ArrayQueue;

use crate::buffer::LineBuffer;
use crate::message::Message;

/// Capacity of the global message pool.
pub const MESSAGE_POOL_MAX: usize = 1000;
/// Capacity of the global line-buffer pool.
pub const BUFFER_POOL_MAX: usize = 1000;

/// Global pool of [`Message`] records.
pub static MESSAGES: LazyLock<Pool<Message>> =
    LazyLock::new(|| Pool::new(MESSAGE_POOL_MAX, Message::default));

/// Global pool of [`LineBuffer`] render targets.
pub static BUFFERS: LazyLock<Pool<LineBuffer>> =
    LazyLock::new(|| Pool::new(BUFFER_POOL_MAX, LineBuffer::default));

/// Implemented by pooled items: erase all state, keeping allocations where
/// practical so a recycled item is as cheap as a warm one.
pub trait Scrub {
    /// Reset the item to its zero state.
    fn scrub(&mut self);
}

struct Shared<T> {
    queue: ArrayQueue<T>,
    init: fn() -> T,
}

/// A bounded pool of scrubbable items.
pub struct Pool<T: Scrub> {
    shared: Arc<Shared<T>>,
}

impl<T: Scrub> Pool<T> {
    /// Create a pool with the given fixed capacity and item factory.
    pub fn new(capacity: usize, init: fn() -> T) -> Self {
        Pool {
            shared: Arc::new(Shared {
                queue: ArrayQueue::new(capacity),
                init,
            }),
        }
    }

    /// Pre-fill with up to `num` items, stopping early when full.
    pub fn warmup(&self, num: usize) {
        for _ in 0..num {
            if self.shared.queue.push((self.shared.init)()).is_err() {
                return;
            }
        }
    }

    /// Take an item from the pool, constructing one if the pool is empty.
    pub fn acquire(&self) -> Pooled<T> {
        let item = self
            .shared
            .queue
            .pop()
            .unwrap_or_else(|| (self.shared.init)());
        Pooled {
            item: Some(item),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of idle items currently queued.
    pub fn idle(&self) -> usize {
        self.shared.queue.len()
    }
}

impl<T: Scrub> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Owning guard over a pooled item.
///
/// Dereferences to the item; on drop the item is scrubbed and pushed back,
/// or silently discarded when the pool is already full.
pub struct Pooled<T: Scrub> {
    item: Option<T>,
    shared: Arc<Shared<T>>,
}

impl<T: Scrub> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled item present until drop")
    }
}

impl<T: Scrub> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item present until drop")
    }
}

impl<T: Scrub> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(mut item) = self.item.take() {
            item.scrub();
            // A full queue drops the item instead; let it go.
            let _ = self.shared.queue.push(item);
        }
    }
}

impl<T: Scrub + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.item.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::RPL_WELCOME;

    #[test]
    fn acquire_from_empty_pool_constructs() {
        let pool: Pool<Message> = Pool::new(1, Message::default);
        assert_eq!(pool.idle(), 0);
        let msg = pool.acquire();
        assert_eq!(msg.code, 0);
    }

    #[test]
    fn acquire_prefers_queued_items() {
        let pool: Pool<Message> = Pool::new(1, Message::default);
        pool.warmup(1);
        assert_eq!(pool.idle(), 1);
        let _msg = pool.acquire();
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn warmup_stops_at_capacity() {
        let pool: Pool<Message> = Pool::new(2, Message::default);
        pool.warmup(10);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn drop_scrubs_and_recycles() {
        let pool: Pool<Message> = Pool::new(1, Message::default);
        {
            let mut msg = pool.acquire();
            msg.source = "irc.someserver.org".into();
            msg.code = RPL_WELCOME;
            msg.command = "PRIVMSG".into();
            msg.params.push("somenick".into());
            msg.trailing = "I am the server.".into();
            msg.tags.insert("time".into(), "now".into());
        }
        assert_eq!(pool.idle(), 1);

        let msg = pool.acquire();
        assert_eq!(msg.source, "");
        assert_eq!(msg.code, 0);
        assert_eq!(msg.command, "");
        assert!(msg.params.is_empty());
        assert_eq!(msg.trailing, "");
        assert!(msg.tags.is_empty());
    }

    #[test]
    fn release_into_full_pool_drops_item() {
        let pool: Pool<Message> = Pool::new(1, Message::default);
        let first = pool.acquire();
        let second = pool.acquire();
        drop(first);
        assert_eq!(pool.idle(), 1);
        drop(second);
        assert_eq!(pool.idle(), 1);
    }
}
