//! Lock-guarded ordered message store
//!
//! One collection serves both the double-ended message history
//! ([`SyncList`]) and the FIFO-only queue ([`SyncQueue`]). Every access goes
//! through a [`StoreGuard`], so a multi-step operation (check, clear, append)
//! runs under one lock acquisition and the lock is released on every exit
//! path when the guard drops.

use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// Access capability of a store
pub trait Access: sealed::Sealed + Send + Sync + 'static {
    /// Label used in log output
    const NAME: &'static str;
}

/// Append and pop from the front only
#[derive(Debug, Clone, Copy)]
pub struct Fifo;

/// Append, pop from either end
#[derive(Debug, Clone, Copy)]
pub struct DoubleEnded;

impl sealed::Sealed for Fifo {}
impl sealed::Sealed for DoubleEnded {}

impl Access for Fifo {
    const NAME: &'static str = "queue";
}

impl Access for DoubleEnded {
    const NAME: &'static str = "list";
}

/// Ordered sequence, front = oldest
pub struct OrderedStore<T, A: Access = DoubleEnded> {
    items: Mutex<VecDeque<T>>,
    _access: PhantomData<fn() -> A>,
}

/// Double-ended message history
pub type SyncList<T> = OrderedStore<T, DoubleEnded>;

/// FIFO-only store
pub type SyncQueue<T> = OrderedStore<T, Fifo>;

/// Exclusive access to a store's contents
pub struct StoreGuard<'a, T, A: Access> {
    items: MutexGuard<'a, VecDeque<T>>,
    _access: PhantomData<fn() -> A>,
}

impl<T, A: Access> OrderedStore<T, A> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            _access: PhantomData,
        }
    }

    /// Acquire the store lock, blocking the current thread
    ///
    /// Do not hold the guard across an `.await`.
    #[inline]
    pub fn lock(&self) -> StoreGuard<'_, T, A> {
        StoreGuard {
            items: self.items.lock(),
            _access: PhantomData,
        }
    }

    /// Acquire the lock only if it is free
    #[inline]
    pub fn try_lock(&self) -> Option<StoreGuard<'_, T, A>> {
        self.items.try_lock().map(|items| StoreGuard {
            items,
            _access: PhantomData,
        })
    }

    /// Number of entries, under a short-lived lock
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the contents, front first
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.lock().iter().cloned().collect()
    }

    /// Capability label ("list" or "queue")
    pub fn kind(&self) -> &'static str {
        A::NAME
    }
}

impl<T, A: Access> Default for OrderedStore<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: Access> std::fmt::Debug for OrderedStore<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.try_lock() {
            Some(guard) => f
                .debug_struct("OrderedStore")
                .field("kind", &A::NAME)
                .field("len", &guard.len())
                .finish(),
            None => f
                .debug_struct("OrderedStore")
                .field("kind", &A::NAME)
                .field("len", &"<locked>")
                .finish(),
        }
    }
}

impl<'a, T, A: Access> StoreGuard<'a, T, A> {
    /// Append at the tail
    #[inline]
    pub fn push_back(&mut self, value: T) {
        self.items.push_back(value);
    }

    /// Remove the oldest entry
    #[inline]
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    #[inline]
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Entry at `index` from the front
    #[inline]
    pub fn at(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every entry
    #[inline]
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<'a, T> StoreGuard<'a, T, DoubleEnded> {
    /// Remove the newest entry
    #[inline]
    pub fn pop_back(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    #[inline]
    pub fn back(&self) -> Option<&T> {
        self.items.back()
    }
}
