//! Process-wide subscription registry for reviewer events.
//!
//! Handlers are called in registration order. Dispatch works on a snapshot,
//! so a handler may register or unregister handlers while an event is being
//! delivered; the change takes effect from the next event.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::card::{Card, NoteType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    QuestionShown,
    AnswerShown,
    ProfileOpened,
}

#[derive(Debug, Clone)]
pub enum HookEvent {
    QuestionShown(Card),
    AnswerShown { card: Card, note_type: NoteType },
    ProfileOpened,
}

impl HookEvent {
    pub fn kind(&self) -> HookKind {
        match self {
            HookEvent::QuestionShown(_) => HookKind::QuestionShown,
            HookEvent::AnswerShown { .. } => HookKind::AnswerShown,
            HookEvent::ProfileOpened => HookKind::ProfileOpened,
        }
    }
}

pub type Handler = Arc<dyn Fn(&HookEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: HookKind,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

#[derive(Default, Clone)]
pub struct HookRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, kind: HookKind, handler: F) -> SubscriptionId
    where
        F: Fn(&HookEvent) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscriptions.push(Subscription {
            id,
            kind,
            handler: Arc::new(handler),
        });
        debug!("Registered {:?} handler {:?}", kind, id);
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != id);
        before != inner.subscriptions.len()
    }

    /// Deliver `event` to every handler of its kind. Returns how many ran.
    pub fn emit(&self, event: &HookEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.handler.clone())
            .collect();

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    pub fn len(&self) -> usize {
        self.lock().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Handlers run outside the lock, so a poisoned registry still holds
        // consistent data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
