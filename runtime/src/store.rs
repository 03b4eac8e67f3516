//! Single-consumer store: one reducer, one mailbox, one task.
//!
//! A [`Store`] owns its state outright. Actions arrive through a [`Mailbox`]
//! and are reduced one at a time on a dedicated task, which makes the task
//! the serial execution context for everything the reducer touches. Effects
//! run elsewhere (spawned tasks) and hop back by sending the action they
//! produce into the same mailbox.
//!
//! Effects hold only a [`WeakMailbox`]. Once every strong [`Mailbox`] is
//! dropped the channel closes, the task drains what is already queued and
//! stops, and late effect results are discarded.
//!
//! # Example
//!
//! ```ignore
//! let mailbox = Store::new(CounterReducer, ()).spawn(|_this| CounterState::default());
//! mailbox.send(CounterAction::Increment)?;
//! ```

use std::time::Instant;

use courier_core::{effect::Effect, reducer::Reducer};
use tokio::sync::mpsc;

use crate::error::StoreError;

/// Strong sending half of a store's mailbox.
///
/// The store keeps running for as long as at least one `Mailbox` exists.
pub struct Mailbox<A> {
    tx: mpsc::UnboundedSender<A>,
}

impl<A> Clone for Mailbox<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A> std::fmt::Debug for Mailbox<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<A> Mailbox<A> {
    /// Queue an action for the store
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MailboxClosed`] if the store task has stopped.
    pub fn send(&self, action: A) -> Result<(), StoreError> {
        self.tx.send(action).map_err(|_| StoreError::MailboxClosed)
    }

    /// Weak reference that does not keep the store alive
    #[must_use]
    pub fn downgrade(&self) -> WeakMailbox<A> {
        WeakMailbox {
            tx: self.tx.downgrade(),
        }
    }

    /// Whether both mailboxes feed the same store
    #[must_use]
    pub fn same_store(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Weak sending half of a store's mailbox.
pub struct WeakMailbox<A> {
    tx: mpsc::WeakUnboundedSender<A>,
}

impl<A> Clone for WeakMailbox<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A> std::fmt::Debug for WeakMailbox<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WeakMailbox")
    }
}

impl<A> WeakMailbox<A> {
    /// Upgrade to a strong mailbox if the store is still reachable
    #[must_use]
    pub fn upgrade(&self) -> Option<Mailbox<A>> {
        self.tx.upgrade().map(|tx| Mailbox { tx })
    }

    /// Queue an action if the store is still reachable
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MailboxClosed`] if no strong mailbox remains or
    /// the store task has stopped.
    pub fn send(&self, action: A) -> Result<(), StoreError> {
        self.upgrade()
            .ok_or(StoreError::MailboxClosed)?
            .send(action)
    }
}

/// A reducer paired with its environment, ready to be spawned.
pub struct Store<R: Reducer> {
    reducer: R,
    environment: R::Environment,
}

impl<R> Store<R>
where
    R: Reducer + Send + 'static,
    R::State: Send + 'static,
    R::Action: Send + 'static,
    R::Environment: Send + 'static,
{
    /// Pair a reducer with its injected dependencies
    #[must_use]
    pub const fn new(reducer: R, environment: R::Environment) -> Self {
        Self {
            reducer,
            environment,
        }
    }

    /// Start the store task and return its mailbox
    ///
    /// `init` builds the initial state and receives a weak reference to the
    /// store's own mailbox, for state that needs to address itself.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(self, init: F) -> Mailbox<R::Action>
    where
        F: FnOnce(WeakMailbox<R::Action>) -> R::State,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let mailbox = Mailbox { tx };
        let feedback = mailbox.downgrade();
        let state = init(feedback.clone());

        tokio::spawn(self.run(state, rx, feedback));
        mailbox
    }

    async fn run(
        self,
        mut state: R::State,
        mut rx: mpsc::UnboundedReceiver<R::Action>,
        feedback: WeakMailbox<R::Action>,
    ) {
        tracing::trace!("Store started");

        while let Some(action) = rx.recv().await {
            metrics::counter!("store.actions.total").increment(1);

            let start = Instant::now();
            let effects = self.reducer.reduce(&mut state, action, &self.environment);
            metrics::histogram!("store.reducer.duration_seconds")
                .record(start.elapsed().as_secs_f64());

            tracing::trace!("Reducer completed, returned {} effects", effects.len());
            for effect in effects {
                execute_effect(effect, &feedback);
            }
        }

        tracing::trace!("Store mailbox closed, stopping");
    }
}

fn execute_effect<A: Send + 'static>(effect: Effect<A>, feedback: &WeakMailbox<A>) {
    match effect {
        Effect::None => {
            metrics::counter!("store.effects.executed", "type" => "none").increment(1);
        },
        Effect::Future(fut) => {
            tracing::trace!("Executing Effect::Future");
            metrics::counter!("store.effects.executed", "type" => "future").increment(1);

            let feedback = feedback.clone();
            tokio::spawn(async move {
                if let Some(action) = fut.await {
                    feed_back(&feedback, action);
                } else {
                    tracing::trace!("Effect::Future completed with no action");
                }
            });
        },
        Effect::Delay { duration, action } => {
            tracing::trace!("Executing Effect::Delay (duration: {:?})", duration);
            metrics::counter!("store.effects.executed", "type" => "delay").increment(1);

            let feedback = feedback.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                feed_back(&feedback, *action);
            });
        },
    }
}

/// A mailbox with no store behind it, for driving reducers by hand.
#[cfg(test)]
pub(crate) fn detached_mailbox<A>() -> (Mailbox<A>, mpsc::UnboundedReceiver<A>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Mailbox { tx }, rx)
}

fn feed_back<A>(feedback: &WeakMailbox<A>, action: A) {
    if feedback.send(action).is_err() {
        tracing::trace!("Store is gone, discarding effect result");
    }
}
