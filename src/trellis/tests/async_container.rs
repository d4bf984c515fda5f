mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use trellis::container::{AsyncSupplier, ErrorKind};
use trellis::prelude::*;

struct Pool;

struct Repository {
    pool: Arc<Pool>,
}

fn counting_singleton(calls: &Arc<AtomicUsize>, fail_first: bool) -> Binding {
    let calls = Arc::clone(calls);
    Binding::new(
        Identifier::of::<Pool>(),
        [],
        Provider::future(move |_| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if fail_first && call == 0 {
                    return Err("pool is unavailable".into());
                }
                Ok(Value::new(Pool))
            }
        }),
    )
    .with_scope(Scope::Singleton)
}

#[tokio::test]
async fn async_container_get_async_joins_in_flight_construction() {
    common::init_tracing();
    const REQUESTS: usize = 16;
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Module::from_binding(counting_singleton(&calls, false))
        .into_container()
        .into_async()
        .unwrap();

    let id = Identifier::of::<Pool>();
    let values = future::join_all((0..REQUESTS).map(|_| container.get_async(&id))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = values[0].as_ref().unwrap();
    assert!(values.iter().all(|value| value.as_ref().unwrap().same(first)));
}

#[tokio::test]
async fn async_container_get_async_evicts_failed_construction() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Module::from_binding(counting_singleton(&calls, true))
        .into_container()
        .into_async()
        .unwrap();

    let id = Identifier::of::<Pool>();
    let (first, second) = futures::join!(container.get_async(&id), container.get_async(&id));
    let first = first.unwrap_err();
    let second = second.unwrap_err();
    assert_eq!(first.kind(), ErrorKind::Upstream);
    assert_eq!(first.to_string(), "pool is unavailable");
    assert_eq!(second.to_string(), first.to_string());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let value = container.get_async(&id).await.unwrap();
    assert!(value.is::<Pool>());
    assert!(value.same(&container.get_async(&id).await.unwrap()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn async_container_get_async_mixes_sync_and_async_providers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let module = Module::from_binding(counting_singleton(&calls, false))
        .add_binding(Binding::new(
            Identifier::of::<Repository>(),
            [Identifier::of::<Pool>()],
            Provider::sync(|deps| {
                Ok(Value::new(Repository {
                    pool: deps.instance(0).ok_or("pool is missing")?,
                }))
            }),
        ))
        .unwrap();
    assert!(module.is_async());

    let container = module.into_container();
    assert!(!container.is_sync());
    let first = container
        .get_async(&Identifier::of::<Repository>())
        .await
        .unwrap()
        .downcast::<Repository>()
        .unwrap();
    let second = container
        .get_async(&Identifier::of::<Repository>())
        .await
        .unwrap()
        .downcast::<Repository>()
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first.pool, &second.pool));
}

#[tokio::test]
async fn async_container_get_async_collects_every_failed_branch() {
    let (left, right, root) = (
        Identifier::new("left"),
        Identifier::new("right"),
        Identifier::new("root"),
    );
    let module = Module::from_binding(Binding::new(
        left.clone(),
        [],
        Provider::future(|_| async { Err("left failed".into()) }),
    ))
    .add_binding(Binding::new(
        right.clone(),
        [],
        Provider::sync(|_| Err("right failed".into())),
    ))
    .and_then(|module| {
        module.add_binding(Binding::new(
            root.clone(),
            [left.clone(), right.clone()],
            Provider::sync(|_| Ok(Value::Null)),
        ))
    })
    .unwrap();

    let err = module
        .into_container()
        .get_async(&root)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aggregate);
    assert_eq!(err.causes().len(), 2);
    assert_eq!(err.to_string(), "Multiple errors: [left failed, right failed]");
}

#[tokio::test]
async fn async_container_preload_async_resolves_optimistic_singletons() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Module::from_binding(
        counting_singleton(&calls, false).with_scope(Scope::OptimisticSingleton),
    )
    .into_container();

    container.preload_async().await.unwrap();
    container.preload_async().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    container.get_async(&Identifier::of::<Pool>()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

struct Session {
    id: usize,
    token: Arc<Token>,
}

struct Token;

struct Handler {
    sessions: AsyncSupplier,
}

#[tokio::test]
async fn async_supplier_opens_a_request_per_call_unless_propagating() {
    let opened = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opened);
    let session = Identifier::of::<Session>();
    let token = Identifier::of::<Token>();

    let module = Module::from_binding(
        Binding::new(token.clone(), [], Provider::sync(|_| Ok(Value::new(Token))))
            .with_scope(Scope::Request),
    )
    .add_binding(
        Binding::new(
            session.clone(),
            [token.clone()],
            Provider::future(move |deps| {
                let id = counter.fetch_add(1, Ordering::SeqCst);
                let token = deps.instance::<Token>(0);
                async move {
                    Ok(Value::new(Session {
                        id,
                        token: token.ok_or("token is missing")?,
                    }))
                }
            }),
        )
        .with_scope(Scope::Request),
    )
    .and_then(|module| {
        module.add_binding(Binding::new(
            Identifier::of::<Handler>().named("isolated"),
            [session.supplier(SupplierMode::asynchronous())],
            Provider::sync(|deps| {
                let sessions = deps.async_supplier(0).ok_or("supplier is missing")?.clone();
                Ok(Value::new(Handler { sessions }))
            }),
        ))
    })
    .and_then(|module| {
        module.add_binding(Binding::new(
            Identifier::of::<Handler>().named("propagating"),
            [session.supplier(SupplierMode::asynchronous().propagating())],
            Provider::sync(|deps| {
                let sessions = deps.async_supplier(0).ok_or("supplier is missing")?.clone();
                Ok(Value::new(Handler { sessions }))
            }),
        ))
    })
    .unwrap();
    let container = module.into_container().into_async().unwrap();

    let session_of = |value: Value| value.downcast::<Session>().unwrap();
    let isolated = container
        .get_async(&Identifier::of::<Handler>().named("isolated"))
        .await
        .unwrap()
        .downcast::<Handler>()
        .unwrap();
    let first = session_of(isolated.sessions.get().await.unwrap());
    let second = session_of(isolated.sessions.get().await.unwrap());
    assert_ne!(first.id, second.id);
    assert!(!Arc::ptr_eq(&first.token, &second.token));

    let propagating = container
        .get_async(&Identifier::of::<Handler>().named("propagating"))
        .await
        .unwrap()
        .downcast::<Handler>()
        .unwrap();
    let first = session_of(propagating.sessions.get().await.unwrap());
    let second = session_of(propagating.sessions.get().await.unwrap());
    assert_eq!(first.id, second.id);
    assert_eq!(opened.load(Ordering::SeqCst), 3);
}

struct Inner {
    per_call: Value,
    per_request: Value,
}

struct Outer {
    inner: Arc<Inner>,
    per_call: Value,
    per_request: Value,
}

struct Calls {
    supply: AsyncSupplier,
}

#[tokio::test]
async fn async_supplier_scope_is_shared_within_one_call_only() {
    let (outer, inner, per_call, per_request) = (
        Identifier::new("outer"),
        Identifier::new("inner"),
        Identifier::new("per call"),
        Identifier::new("per request"),
    );
    let module = Module::from_binding(Binding::new(
        outer.clone(),
        [inner.clone(), per_call.clone(), per_request.clone()],
        Provider::sync(|deps| {
            Ok(Value::new(Outer {
                inner: deps.instance(0).ok_or("inner is missing")?,
                per_call: deps.value(1).cloned().ok_or("per call is missing")?,
                per_request: deps.value(2).cloned().ok_or("per request is missing")?,
            }))
        }),
    ))
    .add_binding(Binding::new(
        inner,
        [per_call.clone(), per_request.clone()],
        Provider::sync(|deps| {
            Ok(Value::new(Inner {
                per_call: deps.value(0).cloned().ok_or("per call is missing")?,
                per_request: deps.value(1).cloned().ok_or("per request is missing")?,
            }))
        }),
    ))
    .and_then(|module| {
        module.add_binding(
            Binding::new(
                per_call,
                [],
                Provider::future(|_| async {
                    tokio::task::yield_now().await;
                    Ok(Value::new(Token))
                }),
            )
            .with_scope(Scope::Supplier),
        )
    })
    .and_then(|module| {
        module.add_binding(
            Binding::new(per_request, [], Provider::sync(|_| Ok(Value::new(Pool))))
                .with_scope(Scope::Request),
        )
    })
    .and_then(|module| {
        module.add_binding(Binding::new(
            Identifier::of::<Calls>(),
            [outer.supplier(SupplierMode::asynchronous().propagating())],
            Provider::sync(|deps| {
                let supply = deps.async_supplier(0).ok_or("supplier is missing")?.clone();
                Ok(Value::new(Calls { supply }))
            }),
        ))
    })
    .unwrap();

    let container = module.into_container().into_async().unwrap();
    let calls = container
        .get_async(&Identifier::of::<Calls>())
        .await
        .unwrap()
        .downcast::<Calls>()
        .unwrap();
    let first = calls.supply.get().await.unwrap().downcast::<Outer>().unwrap();
    let second = calls.supply.get().await.unwrap().downcast::<Outer>().unwrap();

    assert!(!Arc::ptr_eq(&first.inner, &second.inner));
    assert!(first.per_call.same(&first.inner.per_call));
    assert!(!second.per_call.same(&first.per_call));
    assert!(first.per_request.same(&first.inner.per_request));
    assert!(second.per_request.same(&first.per_request));
}
