use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use snafu::prelude::*;

use crate::binding::Binding;
use crate::container::context::{Context, Frame, Join, Slot, Trace};
use crate::container::error::{
    AsyncInSyncResolutionSnafu, CyclicResolutionSnafu, InstanceOfResponseSnafu,
    LatePendingSnafu, NullResponseSnafu, ProviderMissingSnafu, ResolveError,
    UndefinedResponseSnafu,
};
use crate::container::graph::Graph;
use crate::container::supplier::{
    AsyncSupplier, Injected, LateBinding, Supplier, Supply, ValueFuture,
};
use crate::container::Value;
use crate::identifier::Identifier;
use crate::module::BindingMap;
use crate::provider::{Dependencies, Provider};
use crate::util::any::DowncastRef;

/// How a request relates to the request that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    /// A request made through the container itself.
    Outer,
    /// A supplier call that opens its own request.
    Isolated,
    /// A supplier call that stays within the request of its dependent.
    Propagated,
}

pub(crate) struct ContainerCore {
    bindings: BindingMap,
    graph: Graph,
    is_async: bool,
    singletons: Arc<Context>,
    wired: AtomicBool,
    preloaded: AtomicBool,
    eager: Mutex<HashMap<usize, Arc<[Arc<Binding>]>>>,
}

impl ContainerCore {
    pub fn new(bindings: BindingMap) -> Self {
        let graph = Graph::new(&bindings);
        let is_async = bindings.is_async();
        tracing::debug!(
            bindings = bindings.bindings().count(),
            is_async,
            "container created"
        );
        Self {
            bindings,
            graph,
            is_async,
            singletons: Context::new(),
            wired: AtomicBool::new(false),
            preloaded: AtomicBool::new(false),
            eager: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn bindings(&self) -> &BindingMap {
        &self.bindings
    }

    pub fn check(&self) -> Result<(), ResolveError> {
        self.graph.validate()
    }

    /// Validates the graph the first time it is called. Later calls are
    /// free once a validation succeeded.
    pub fn wire(&self) -> Result<(), ResolveError> {
        if self.wired.load(Ordering::Acquire) {
            return Ok(());
        }
        self.graph.validate()?;
        if !self.wired.swap(true, Ordering::AcqRel) {
            tracing::debug!("container wired");
        }
        Ok(())
    }

    pub fn get(self: &Arc<Self>, id: &Identifier) -> Result<Value, ResolveError> {
        self.wire()?;
        let binding = self.binding_of(id)?;
        let frame = Frame::root(Arc::clone(&self.singletons));
        self.request_sync(&frame, &binding, RequestKind::Outer)
    }

    pub fn get_async(self: &Arc<Self>, id: &Identifier) -> ValueFuture {
        let core = Arc::clone(self);
        let id = id.clone();
        async move {
            core.wire()?;
            let binding = core.binding_of(&id)?;
            let frame = Frame::root(Arc::clone(&core.singletons));
            core.request_async(frame, binding, RequestKind::Outer).await
        }
        .boxed()
    }

    pub fn preload(self: &Arc<Self>) -> Result<(), ResolveError> {
        self.wire()?;
        self.preload_sync(&Frame::root(Arc::clone(&self.singletons)))
    }

    pub fn preload_async(self: &Arc<Self>) -> BoxFuture<'static, Result<(), ResolveError>> {
        let core = Arc::clone(self);
        async move {
            core.wire()?;
            let frame = Frame::root(Arc::clone(&core.singletons));
            core.preload_in(&frame).await
        }
        .boxed()
    }

    fn binding_of(&self, id: &Identifier) -> Result<Arc<Binding>, ResolveError> {
        let output_id = id.output_id();
        match self.bindings.get(&output_id) {
            Some(binding) => Ok(Arc::clone(binding)),
            None => ProviderMissingSnafu {
                ids: vec![output_id],
            }
            .fail(),
        }
    }

    fn mark_preloaded(&self) {
        if !self.preloaded.swap(true, Ordering::AcqRel) {
            tracing::debug!("optimistic singletons preloaded");
        }
    }

    fn eager_request_bindings(&self, binding: &Arc<Binding>) -> Arc<[Arc<Binding>]> {
        let Some(index) = self.graph.index_of(binding) else {
            return Arc::from(Vec::new());
        };
        let mut eager = self.eager.lock();
        let bindings = eager
            .entry(index)
            .or_insert_with(|| self.graph.eager_request_bindings(index).into());
        Arc::clone(bindings)
    }

    pub(crate) fn request_sync(
        self: &Arc<Self>,
        frame: &Frame,
        binding: &Arc<Binding>,
        kind: RequestKind,
    ) -> Result<Value, ResolveError> {
        if kind == RequestKind::Outer {
            self.preload_sync(frame)?;
        }
        if kind != RequestKind::Propagated {
            let errors: Vec<ResolveError> = self
                .eager_request_bindings(binding)
                .iter()
                .filter_map(|eager| self.resolve_sync(frame, eager).err())
                .collect();
            ResolveError::aggregate(errors)?;
        }
        self.resolve_sync(frame, binding)
    }

    pub(crate) fn request_async(
        self: &Arc<Self>,
        frame: Frame,
        binding: Arc<Binding>,
        kind: RequestKind,
    ) -> ValueFuture {
        let core = Arc::clone(self);
        async move {
            if kind == RequestKind::Outer {
                core.preload_in(&frame).await?;
            }
            if kind != RequestKind::Propagated {
                let eager = core.eager_request_bindings(&binding);
                let results = future::join_all(
                    eager
                        .iter()
                        .map(|eager| core.resolve_async(frame.clone(), Arc::clone(eager))),
                )
                .await;
                ResolveError::aggregate(results.into_iter().filter_map(Result::err).collect())?;
            }
            core.resolve_async(frame, binding).await
        }
        .boxed()
    }

    fn preload_sync(self: &Arc<Self>, frame: &Frame) -> Result<(), ResolveError> {
        if self.preloaded.load(Ordering::Acquire) {
            return Ok(());
        }
        let errors: Vec<ResolveError> = self
            .graph
            .optimistic_singletons()
            .filter_map(|binding| self.resolve_sync(frame, binding).err())
            .collect();
        ResolveError::aggregate(errors)?;
        self.mark_preloaded();
        Ok(())
    }

    fn preload_in(self: &Arc<Self>, frame: &Frame) -> BoxFuture<'static, Result<(), ResolveError>> {
        if self.preloaded.load(Ordering::Acquire) {
            return future::ready(Ok(())).boxed();
        }
        let pending: Vec<ValueFuture> = self
            .graph
            .optimistic_singletons()
            .map(|binding| self.resolve_async(frame.clone(), Arc::clone(binding)))
            .collect();
        let core = Arc::clone(self);
        async move {
            let results = future::join_all(pending).await;
            ResolveError::aggregate(results.into_iter().filter_map(Result::err).collect())?;
            core.mark_preloaded();
            Ok(())
        }
        .boxed()
    }

    fn resolve_sync(self: &Arc<Self>, frame: &Frame, binding: &Arc<Binding>) -> Result<Value, ResolveError> {
        if binding.is_placeholder() {
            return unbound(binding);
        }
        let context = frame.context_for(binding.scope().lifetime()).cloned();
        if let Some(trace) = frame.find_in_progress(binding, context.as_ref()) {
            return rejoin(binding, &trace);
        }
        match context {
            None => self.construct_sync(frame, binding, None),
            Some(context) => self.resolve_cached_sync(frame, binding, context),
        }
    }

    fn resolve_cached_sync(
        self: &Arc<Self>,
        frame: &Frame,
        binding: &Arc<Binding>,
        context: Arc<Context>,
    ) -> Result<Value, ResolveError> {
        let key = binding.output_id();
        let mut slots = context.slots();
        match slots.get_mut(key) {
            Some(Slot::Ready(value)) => return Ok(value.clone()),
            Some(Slot::Pending { future, .. }) => {
                let future = future.clone();
                drop(slots);
                return match future.now_or_never() {
                    Some(res) => res,
                    None => AsyncInSyncResolutionSnafu { id: key.clone() }.fail(),
                };
            }
            Some(Slot::Constructing { on_thread, waiters }) => {
                if *on_thread == thread::current().id() {
                    return CyclicResolutionSnafu { id: key.clone() }.fail();
                }
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                drop(slots);
                return match receiver.recv() {
                    Ok(res) => res,
                    Err(_) => self.resolve_cached_sync(frame, binding, context),
                };
            }
            None => {
                slots.insert(key.clone(), Slot::constructing());
            }
        }
        drop(slots);

        let guard = context.guard(key);
        let res = self.construct_sync(frame, binding, Some(&context));
        guard.finish(&res);
        res
    }

    fn construct_sync(
        self: &Arc<Self>,
        frame: &Frame,
        binding: &Arc<Binding>,
        context: Option<&Arc<Context>>,
    ) -> Result<Value, ResolveError> {
        let trace = Trace::new(Arc::clone(binding), context.cloned(), frame.trace().cloned());
        let inner = frame.enter(Arc::clone(&trace));
        let res = self.produce_sync(&inner, binding, &trace);
        match &res {
            Ok(_) => trace.settle(),
            Err(err) => trace.fail(err),
        }
        res
    }

    fn produce_sync(
        self: &Arc<Self>,
        frame: &Frame,
        binding: &Arc<Binding>,
        trace: &Trace,
    ) -> Result<Value, ResolveError> {
        let mut dependencies = Vec::with_capacity(binding.dependency_ids().len());
        let mut errors = Vec::new();
        for id in binding.dependency_ids() {
            match self.inject_sync(frame, id) {
                Ok(dependency) => dependencies.push(dependency),
                Err(err) => errors.push(err),
            }
        }
        ResolveError::aggregate(errors)?;

        let Provider::Sync(provide) = binding.provider() else {
            return AsyncInSyncResolutionSnafu {
                id: binding.output_id().clone(),
            }
            .fail();
        };
        tracing::trace!(id = %binding.output_id(), "invoking provider");
        let value = provide(Dependencies::new(dependencies))
            .map_err(|err| ResolveError::upstream_of(binding.output_id(), err))?;
        check_response(binding, &value)?;
        trace.constructed(&value);

        // Handles still pending here are left for their holder to await.
        let errors: Vec<ResolveError> = trace
            .take_adopted()
            .iter()
            .filter_map(LateBinding::poll)
            .filter_map(Result::err)
            .collect();
        ResolveError::aggregate(errors)?;
        Ok(value)
    }

    fn inject_sync(self: &Arc<Self>, frame: &Frame, id: &Identifier) -> Result<Injected, ResolveError> {
        let binding = self.binding_of(id)?;
        match self.inject_handle(frame, id, &binding) {
            Some(injected) => Ok(injected),
            None => self.resolve_sync(frame, &binding).map(Injected::Value),
        }
    }

    /// Resolves `binding` the first time the returned future is polled.
    /// Bindings that never wait on an asynchronous provider take the
    /// synchronous path, so sync and async requesters share one slot.
    fn resolve_async(self: &Arc<Self>, frame: Frame, binding: Arc<Binding>) -> ValueFuture {
        let core = Arc::clone(self);
        async move {
            if !core.graph.needs_async(&binding) {
                return core.resolve_sync(&frame, &binding);
            }
            if binding.is_placeholder() {
                return unbound(&binding);
            }
            let context = frame.context_for(binding.scope().lifetime()).cloned();
            if let Some(trace) = frame.find_in_progress(&binding, context.as_ref()) {
                return rejoin(&binding, &trace);
            }
            match context {
                None => core.construct_async(frame, binding, None).await,
                Some(context) => core.resolve_cached_async(frame, binding, context).await,
            }
        }
        .boxed()
    }

    fn resolve_cached_async(
        self: &Arc<Self>,
        frame: Frame,
        binding: Arc<Binding>,
        context: Arc<Context>,
    ) -> ValueFuture {
        let key = binding.output_id().clone();
        let mut slots = context.slots();
        match slots.get_mut(&key) {
            Some(Slot::Ready(value)) => return future::ready(Ok(value.clone())).boxed(),
            Some(Slot::Pending { future, .. }) => return future.clone().boxed(),
            Some(Slot::Constructing { on_thread, waiters }) => {
                if *on_thread == thread::current().id() {
                    return future::ready(CyclicResolutionSnafu { id: key }.fail()).boxed();
                }
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                drop(slots);
                let core = Arc::clone(self);
                return async move {
                    match receiver.await {
                        Ok(res) => res,
                        Err(_) => core.resolve_cached_async(frame, binding, context).await,
                    }
                }
                .boxed();
            }
            None => {}
        }

        let generation = context.next_generation();
        let construction = self.construct_async(frame, binding, Some(Arc::clone(&context)));
        let owner = Arc::clone(&context);
        let settled_key = key.clone();
        let shared = async move {
            let res = construction.await;
            owner.settle(&settled_key, generation, &res);
            res
        }
        .boxed()
        .shared();
        slots.insert(
            key,
            Slot::Pending {
                generation,
                future: shared.clone(),
            },
        );
        drop(slots);
        shared.boxed()
    }

    fn construct_async(
        self: &Arc<Self>,
        frame: Frame,
        binding: Arc<Binding>,
        context: Option<Arc<Context>>,
    ) -> ValueFuture {
        let core = Arc::clone(self);
        async move {
            let trace = Trace::new(Arc::clone(&binding), context, frame.trace().cloned());
            let inner = frame.enter(Arc::clone(&trace));
            let res = core.produce_async(inner, &binding, &trace).await;
            match &res {
                Ok(_) => trace.settle(),
                Err(err) => trace.fail(err),
            }
            res
        }
        .boxed()
    }

    async fn produce_async(
        self: &Arc<Self>,
        frame: Frame,
        binding: &Arc<Binding>,
        trace: &Trace,
    ) -> Result<Value, ResolveError> {
        let results = future::join_all(
            binding
                .dependency_ids()
                .iter()
                .map(|id| self.inject_async(&frame, id)),
        )
        .await;
        let mut dependencies = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for res in results {
            match res {
                Ok(dependency) => dependencies.push(dependency),
                Err(err) => errors.push(err),
            }
        }
        ResolveError::aggregate(errors)?;

        tracing::trace!(id = %binding.output_id(), "invoking provider");
        let provided = match binding.provider() {
            Provider::Sync(provide) => provide(Dependencies::new(dependencies)),
            Provider::Async(provide) => provide(Dependencies::new(dependencies)).await,
        };
        let value = provided.map_err(|err| ResolveError::upstream_of(binding.output_id(), err))?;
        check_response(binding, &value)?;
        trace.constructed(&value);

        let adopted = trace.take_adopted();
        let settled = future::join_all(adopted.iter().map(LateBinding::resolve)).await;
        ResolveError::aggregate(settled.into_iter().filter_map(Result::err).collect())?;
        Ok(value)
    }

    fn inject_async(
        self: &Arc<Self>,
        frame: &Frame,
        id: &Identifier,
    ) -> BoxFuture<'static, Result<Injected, ResolveError>> {
        let binding = match self.binding_of(id) {
            Ok(binding) => binding,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        match self.inject_handle(frame, id, &binding) {
            Some(injected) => future::ready(Ok(injected)).boxed(),
            None => self
                .resolve_async(frame.clone(), binding)
                .map(|res| res.map(Injected::Value))
                .boxed(),
        }
    }

    /// Builds the supplier or late-binding handle `id` asks for, if any. A
    /// supplier annotation takes precedence over late binding.
    fn inject_handle(self: &Arc<Self>, frame: &Frame, id: &Identifier, binding: &Arc<Binding>) -> Option<Injected> {
        if let Some(mode) = id.supplier_mode() {
            let call = Arc::new(SupplierCall {
                core: Arc::clone(self),
                frame: frame.clone(),
                binding: Arc::clone(binding),
                propagate: mode.propagate_scope,
            });
            return Some(if mode.sync {
                Injected::Supplier(Supplier::new(id.clone(), call))
            } else {
                Injected::AsyncSupplier(AsyncSupplier::new(id.clone(), call))
            });
        }
        if id.is_late_binding() {
            let late = self.late_binding(frame, id, binding);
            if late.is_deferred() {
                if let Some(settler) = self.settler_of(frame, binding) {
                    settler.adopt(late.clone());
                }
            }
            return Some(Injected::LateBinding(late));
        }
        None
    }

    /// The binding of the chain that settles a deferred handle on `target`.
    /// That is the outermost binding still under construction which the
    /// target waits on, or else the binding receiving the handle.
    fn settler_of(&self, frame: &Frame, target: &Arc<Binding>) -> Option<Arc<Trace>> {
        let current = frame.trace()?;
        let reached = self
            .graph
            .index_of(target)
            .map(|index| self.graph.reachable_from(index))
            .unwrap_or_default();
        let outermost = frame
            .chain()
            .filter(|trace| trace.is_constructing())
            .filter(|trace| {
                self.graph
                    .index_of(trace.binding())
                    .is_some_and(|index| reached.get(index).copied().unwrap_or(false))
            })
            .last();
        Some(Arc::clone(outermost.unwrap_or(current)))
    }

    /// A handle on a binding already under construction in this chain joins
    /// that construction. Any other handle resolves its target on its own
    /// once the dependent is constructed.
    fn late_binding(self: &Arc<Self>, frame: &Frame, id: &Identifier, binding: &Arc<Binding>) -> LateBinding {
        let context = frame.context_for(binding.scope().lifetime());
        if let Some(trace) = frame.find_in_progress(binding, context) {
            match trace.join() {
                Join::Ready(value) => {
                    return LateBinding::joined(id.clone(), future::ready(Ok(value)).boxed());
                }
                Join::Waiting(receiver) => {
                    let pending_id = id.clone();
                    let future = async move {
                        match receiver.await {
                            Ok(res) => res,
                            Err(_) => LatePendingSnafu { id: pending_id }.fail(),
                        }
                    };
                    return LateBinding::joined(id.clone(), future.boxed());
                }
                Join::Gone => {}
            }
        }
        LateBinding::deferred(id.clone(), self.resolve_async(frame.clone(), Arc::clone(binding)))
    }
}

/// The source behind the [`Supplier`]s and [`AsyncSupplier`]s injected into
/// a binding. Each call is a new request for the target.
struct SupplierCall {
    core: Arc<ContainerCore>,
    frame: Frame,
    binding: Arc<Binding>,
    propagate: bool,
}

impl SupplierCall {
    fn open(&self) -> (Frame, RequestKind) {
        if self.propagate {
            (self.frame.propagated(), RequestKind::Propagated)
        } else {
            (self.frame.isolated(), RequestKind::Isolated)
        }
    }
}

impl Supply for SupplierCall {
    fn supply(&self) -> Result<Value, ResolveError> {
        let (frame, kind) = self.open();
        self.core.request_sync(&frame, &self.binding, kind)
    }

    fn supply_async(&self) -> ValueFuture {
        let (frame, kind) = self.open();
        self.core
            .request_async(frame, Arc::clone(&self.binding), kind)
    }
}

fn unbound(binding: &Binding) -> Result<Value, ResolveError> {
    ProviderMissingSnafu {
        ids: vec![binding.output_id().clone()],
    }
    .fail()
}

/// A binding met again further down its own chain: fine once its provider
/// returned, a cycle otherwise.
fn rejoin(binding: &Binding, trace: &Trace) -> Result<Value, ResolveError> {
    match trace.value() {
        Some(value) => Ok(value),
        None => CyclicResolutionSnafu {
            id: binding.output_id().clone(),
        }
        .fail(),
    }
}

fn check_response(binding: &Binding, value: &Value) -> Result<(), ResolveError> {
    let output_id = binding.output_id();
    match value {
        Value::Null => {
            ensure!(
                output_id.is_nullable(),
                NullResponseSnafu {
                    output_id: output_id.clone()
                }
            );
        }
        Value::Undefined => {
            ensure!(
                output_id.is_undefinable(),
                UndefinedResponseSnafu {
                    output_id: output_id.clone()
                }
            );
        }
        Value::Instance(object) => {
            if let Some(class) = output_id.class() {
                ensure!(
                    object.concrete_type_id() == class.type_id,
                    InstanceOfResponseSnafu {
                        output_id: output_id.clone(),
                        value: value.describe(),
                    }
                );
            }
        }
    }
    Ok(())
}
