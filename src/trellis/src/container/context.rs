use std::collections::HashMap;
use std::iter;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use futures::future::Shared;
use oneshot::{Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};

use crate::binding::Binding;
use crate::container::error::ResolveError;
use crate::container::supplier::{LateBinding, ValueFuture};
use crate::container::Value;
use crate::identifier::Identifier;
use crate::scope::Lifetime;

pub(crate) type Waiter = Sender<Result<Value, ResolveError>>;

/// A cache of scoped values: the container itself, one request or one
/// supplier call.
pub(crate) struct Context {
    slots: Mutex<HashMap<Identifier, Slot>>,
    next_generation: AtomicU64,
}

pub(crate) enum Slot {
    Ready(Value),
    /// Constructed synchronously by `on_thread`. Other threads queue up.
    Constructing {
        on_thread: ThreadId,
        waiters: Vec<Waiter>,
    },
    /// Constructed asynchronously. Every resolver shares the same future.
    Pending {
        generation: u64,
        future: Shared<ValueFuture>,
    },
}

impl Slot {
    pub fn constructing() -> Self {
        Self::Constructing {
            on_thread: thread::current().id(),
            waiters: Vec::new(),
        }
    }
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    pub fn slots(&self) -> MutexGuard<'_, HashMap<Identifier, Slot>> {
        self.slots.lock()
    }

    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Stores the outcome of a synchronous construction and wakes up the
    /// threads waiting for it. Failures are not cached.
    pub fn finish(&self, key: &Identifier, result: &Result<Value, ResolveError>) {
        let mut slots = self.slots.lock();
        let previous = match result {
            Ok(value) => slots.insert(key.clone(), Slot::Ready(value.clone())),
            Err(_) => slots.remove(key),
        };
        drop(slots);

        if let Some(Slot::Constructing { waiters, .. }) = previous {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    /// Stores the outcome of an asynchronous construction, unless the slot
    /// was replaced in the meantime. Failures are evicted so the next
    /// resolution starts over.
    pub fn settle(&self, key: &Identifier, generation: u64, result: &Result<Value, ResolveError>) {
        let mut slots = self.slots.lock();
        let current = matches!(
            slots.get(key),
            Some(Slot::Pending { generation: g, .. }) if *g == generation
        );
        if !current {
            return;
        }

        match result {
            Ok(value) => {
                slots.insert(key.clone(), Slot::Ready(value.clone()));
            }
            Err(err) => {
                slots.remove(key);
                tracing::debug!(id = %key, error = %err, "evicted failed construction");
            }
        }
    }

    /// Guards the `Constructing` slot of `key` held by the current thread.
    pub fn guard<'a>(&'a self, key: &'a Identifier) -> ConstructionGuard<'a> {
        ConstructionGuard {
            context: self,
            key,
            finished: false,
        }
    }

    #[cfg(test)]
    pub fn is_ready(&self, key: &Identifier) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Ready(_)))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

/// Evicts a `Constructing` slot whose construction unwound before
/// finishing. Dropping the waiters lets them start over.
pub(crate) struct ConstructionGuard<'a> {
    context: &'a Context,
    key: &'a Identifier,
    finished: bool,
}

impl ConstructionGuard<'_> {
    pub fn finish(mut self, result: &Result<Value, ResolveError>) {
        self.finished = true;
        self.context.finish(self.key, result);
    }
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let interrupted = self.context.slots.lock().remove(self.key);
        if interrupted.is_some() {
            tracing::debug!(id = %self.key, "evicted interrupted construction");
        }
    }
}

/// The caches visible to one resolution chain, plus the chain itself.
#[derive(Clone)]
pub(crate) struct Frame {
    singletons: Arc<Context>,
    request: Arc<Context>,
    supplier: Arc<Context>,
    trace: Option<Arc<Trace>>,
}

impl Frame {
    /// The frame of an outermost request, which also serves as its own
    /// supplier context.
    pub fn root(singletons: Arc<Context>) -> Self {
        let request = Context::new();
        Self {
            singletons,
            supplier: Arc::clone(&request),
            request,
            trace: None,
        }
    }

    /// A frame for one call of a supplier which keeps the current request.
    pub fn propagated(&self) -> Self {
        Self {
            supplier: Context::new(),
            ..self.clone()
        }
    }

    /// A frame for one call of a supplier which opens a fresh request.
    pub fn isolated(&self) -> Self {
        let request = Context::new();
        Self {
            supplier: Arc::clone(&request),
            request,
            ..self.clone()
        }
    }

    pub fn enter(&self, trace: Arc<Trace>) -> Self {
        Self {
            trace: Some(trace),
            ..self.clone()
        }
    }

    pub fn context_for(&self, lifetime: Lifetime) -> Option<&Arc<Context>> {
        match lifetime {
            Lifetime::Transient => None,
            Lifetime::Container => Some(&self.singletons),
            Lifetime::Request => Some(&self.request),
            Lifetime::Supplier => Some(&self.supplier),
        }
    }

    pub fn trace(&self) -> Option<&Arc<Trace>> {
        self.trace.as_ref()
    }

    /// The traces of the chain, innermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Arc<Trace>> {
        iter::successors(self.trace.as_ref(), |trace| trace.parent.as_ref())
    }

    /// Finds the closest binding of the chain that is still in progress
    /// and would store its value in `context`.
    pub fn find_in_progress(
        &self,
        binding: &Arc<Binding>,
        context: Option<&Arc<Context>>,
    ) -> Option<Arc<Trace>> {
        let mut current = self.trace.as_ref();
        while let Some(trace) = current {
            if trace.is_for(binding, context) && !trace.is_settled() {
                return Some(Arc::clone(trace));
            }
            current = trace.parent.as_ref();
        }
        None
    }
}

/// One binding under construction within a resolution chain.
///
/// A trace outlives its provider call: after the provider returned, the
/// value is handed to late-binding handles of the same chain until every
/// deferred handle adopted by the binding has settled.
pub(crate) struct Trace {
    binding: Arc<Binding>,
    context: Option<Arc<Context>>,
    state: Mutex<TraceState>,
    adopted: Mutex<Vec<LateBinding>>,
    parent: Option<Arc<Trace>>,
}

enum TraceState {
    Constructing { waiters: Vec<Waiter> },
    Constructed(Value),
    Settled,
}

pub(crate) enum Join {
    Ready(Value),
    Waiting(Receiver<Result<Value, ResolveError>>),
    Gone,
}

impl Trace {
    pub fn new(
        binding: Arc<Binding>,
        context: Option<Arc<Context>>,
        parent: Option<Arc<Trace>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            binding,
            context,
            state: Mutex::new(TraceState::Constructing {
                waiters: Vec::new(),
            }),
            adopted: Mutex::new(Vec::new()),
            parent,
        })
    }

    fn is_for(&self, binding: &Arc<Binding>, context: Option<&Arc<Context>>) -> bool {
        let same_context = match (&self.context, context) {
            (None, None) => true,
            (Some(own), Some(other)) => Arc::ptr_eq(own, other),
            _ => false,
        };
        same_context && Arc::ptr_eq(&self.binding, binding)
    }

    pub fn binding(&self) -> &Arc<Binding> {
        &self.binding
    }

    pub fn is_constructing(&self) -> bool {
        matches!(*self.state.lock(), TraceState::Constructing { .. })
    }

    fn is_settled(&self) -> bool {
        matches!(*self.state.lock(), TraceState::Settled)
    }

    /// The value of the binding once its provider has returned.
    pub fn value(&self) -> Option<Value> {
        match &*self.state.lock() {
            TraceState::Constructed(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn join(&self) -> Join {
        let mut state = self.state.lock();
        match &mut *state {
            TraceState::Constructing { waiters } => {
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                Join::Waiting(receiver)
            }
            TraceState::Constructed(value) => Join::Ready(value.clone()),
            TraceState::Settled => Join::Gone,
        }
    }

    pub fn constructed(&self, value: &Value) {
        let previous = mem::replace(
            &mut *self.state.lock(),
            TraceState::Constructed(value.clone()),
        );
        if let TraceState::Constructing { waiters } = previous {
            for waiter in waiters {
                let _ = waiter.send(Ok(value.clone()));
            }
        }
    }

    pub fn fail(&self, err: &ResolveError) {
        drop(self.take_adopted());
        let previous = mem::replace(&mut *self.state.lock(), TraceState::Settled);
        if let TraceState::Constructing { waiters } = previous {
            for waiter in waiters {
                let _ = waiter.send(Err(err.clone()));
            }
        }
    }

    pub fn settle(&self) {
        drop(self.take_adopted());
        *self.state.lock() = TraceState::Settled;
    }

    /// Makes the binding responsible for settling `late` once its own
    /// provider has returned.
    pub fn adopt(&self, late: LateBinding) {
        self.adopted.lock().push(late);
    }

    pub fn take_adopted(&self) -> Vec<LateBinding> {
        mem::take(&mut *self.adopted.lock())
    }
}

#[cfg(test)]
mod tests {
    use crate::container::error::CyclicResolutionSnafu;
    use crate::provider::Provider;

    use super::*;

    struct Node;

    fn binding() -> Arc<Binding> {
        Arc::new(Binding::new(
            Identifier::of::<Node>(),
            [],
            Provider::sync(|_| Ok(Value::new(Node))),
        ))
    }

    #[test]
    fn frame_contexts_follow_supplier_mode() {
        let root = Frame::root(Context::new());
        assert!(Arc::ptr_eq(&root.request, &root.supplier));

        let propagated = root.propagated();
        assert!(Arc::ptr_eq(&propagated.request, &root.request));
        assert!(!Arc::ptr_eq(&propagated.supplier, &root.supplier));

        let isolated = root.isolated();
        assert!(!Arc::ptr_eq(&isolated.request, &root.request));
        assert!(Arc::ptr_eq(&isolated.request, &isolated.supplier));
        assert!(Arc::ptr_eq(&isolated.singletons, &root.singletons));
        assert!(root.context_for(Lifetime::Transient).is_none());
    }

    #[test]
    fn frame_find_in_progress_skips_settled_traces() {
        let binding = binding();
        let root = Frame::root(Context::new());
        let context = root.context_for(Lifetime::Container).cloned();

        let outer = Trace::new(Arc::clone(&binding), context.clone(), None);
        let frame = root.enter(Arc::clone(&outer));
        let found = frame.find_in_progress(&binding, context.as_ref()).unwrap();
        assert!(Arc::ptr_eq(&found, &outer));
        assert!(frame.find_in_progress(&binding, None).is_none());

        let inner = frame.enter(Trace::new(Arc::clone(&binding), None, Some(Arc::clone(&outer))));
        assert_eq!(inner.chain().count(), 2);
        assert!(inner.chain().all(|trace| trace.is_constructing()));

        outer.settle();
        assert!(frame.find_in_progress(&binding, context.as_ref()).is_none());
    }

    #[test]
    fn trace_join_receives_constructed_value() {
        let trace = Trace::new(binding(), None, None);
        let Join::Waiting(receiver) = trace.join() else {
            unreachable!("`trace` should still be constructing");
        };

        assert!(trace.value().is_none());
        trace.constructed(&Value::new(Node));
        assert!(receiver.recv().unwrap().unwrap().is::<Node>());
        assert!(trace.value().is_some());
        assert!(matches!(trace.join(), Join::Ready(_)));

        trace.settle();
        assert!(matches!(trace.join(), Join::Gone));
    }

    #[test]
    fn context_finish_notifies_waiters() {
        let context = Context::new();
        let key = Identifier::of::<Node>();
        let (sender, receiver) = oneshot::channel();
        context.slots().insert(
            key.clone(),
            Slot::Constructing {
                on_thread: thread::current().id(),
                waiters: vec![sender],
            },
        );

        context.finish(&key, &Ok(Value::Null));
        assert!(receiver.recv().unwrap().unwrap().is_null());
        assert!(context.is_ready(&key));

        context.finish(&key, &CyclicResolutionSnafu { id: key.clone() }.fail());
        assert!(context.is_empty());
    }
}
