use std::sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Receiver},
};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscribers<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

/// Publish/subscribe channel for one event type.
///
/// Cloning a `Signal` yields another handle to the same subscriber list, so an
/// owner can keep one clone and give another to the thread that emits.
pub struct Signal<T> {
    inner: Arc<Subscribers<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Subscribers {
                next_id: AtomicU64::new(1),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers `callback`; it stays connected until the returned
    /// `SignalConnection` is dropped.
    #[must_use = "dropping the connection disconnects the callback"]
    pub fn connect<F>(&self, callback: F) -> SignalConnection
    where
        F: Fn(&T) + Send + Sync + 'static,
        T: 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));

        let weak: Weak<Subscribers<T>> = Arc::downgrade(&self.inner);
        SignalConnection {
            disconnect: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .callbacks
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|(cb_id, _)| *cb_id != id);
                }
            })),
        }
    }

    /// Calls every connected subscriber with `value`.
    ///
    /// The subscriber list is snapshotted first, so callbacks may connect or
    /// disconnect without deadlocking.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for cb in snapshot {
            cb(value);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: Clone + Send + 'static> Signal<T> {
    /// Connects a forwarder that clones every emitted value into an mpsc
    /// channel. Values stop flowing once the connection is dropped.
    #[must_use = "dropping the connection disconnects the channel"]
    pub fn channel(&self) -> (SignalConnection, Receiver<T>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let conn = self.connect(move |value: &T| {
            let _ = tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .send(value.clone());
        });
        (conn, rx)
    }
}

/// RAII subscription handle returned by [`Signal::connect`].
pub struct SignalConnection {
    disconnect: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SignalConnection {
    /// Explicitly disconnects; equivalent to dropping the handle.
    pub fn disconnect(mut self) {
        if let Some(f) = self.disconnect.take() {
            f();
        }
    }
}

impl Drop for SignalConnection {
    fn drop(&mut self) {
        if let Some(f) = self.disconnect.take() {
            f();
        }
    }
}

impl std::fmt::Debug for SignalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalConnection")
            .field("connected", &self.disconnect.is_some())
            .finish()
    }
}
