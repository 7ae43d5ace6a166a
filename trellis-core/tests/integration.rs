//! Integration Tests for Request Resolution
//!
//! These tests drive whole requests through the public API: registry,
//! invoker, channel and teardown working together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use trellis_core::{
    builtin, ArgType, AsyncResource, BoxError, BuildError, Context, Error, ExecutionChannel,
    InvokerConfig, ParamDecl, Provider, Registry, Request, ResolveError, Resource,
};

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Root depends on dep1 and dep2; dep2 also depends on dep1.
#[tokio::test]
async fn shared_dependency_is_resolved_once() {
    let dep1_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dep1_calls);

    let registry = Registry::builder()
        .provide(Provider::sync("dep1", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1_i64)
        }))
        .provide(
            Provider::sync("dep2", |call| Ok(call.dep::<i64>("dep1")? + 1))
                .depends_on("dep1", "dep1"),
        )
        .provide(
            Provider::sync("root", |call| {
                Ok((*call.dep::<i64>("dep1")?, *call.dep::<i64>("dep2")?))
            })
            .depends_on("dep1", "dep1")
            .depends_on("dep2", "dep2"),
        )
        .build()
        .unwrap();

    let value = registry
        .invoker("root")
        .unwrap()
        .invoke(Request::new())
        .await
        .unwrap();

    assert_eq!(value.downcast_ref::<(i64, i64)>(), Some(&(1, 2)));
    assert_eq!(dep1_calls.load(Ordering::SeqCst), 1);
}

/// Root depends on a scoped resource; cleanup runs once, after the root
/// returns and before `invoke` completes.
#[tokio::test]
async fn scoped_resource_is_released_after_the_root() {
    let events = log();
    let acquire_log = Arc::clone(&events);
    let root_log = Arc::clone(&events);

    let registry = Registry::builder()
        .provide(Provider::scoped("resource", move |_| {
            acquire_log.lock().push("acquire".into());
            let release_log = Arc::clone(&acquire_log);
            Ok(Resource::new(String::from("resource"), move || {
                release_log.lock().push("release".into());
                Ok(())
            }))
        }))
        .provide(
            Provider::sync("root", move |call| {
                let resource = call.dep::<String>("resource")?;
                root_log.lock().push(format!("root saw {resource}"));
                Ok(resource.clone())
            })
            .depends_on("resource", "resource"),
        )
        .build()
        .unwrap();

    let value = registry
        .invoker("root")
        .unwrap()
        .invoke(Request::new())
        .await
        .unwrap();

    assert_eq!(value.downcast_ref::<String>().unwrap(), "resource");
    assert_eq!(
        entries(&events),
        vec!["acquire", "root saw resource", "release"]
    );
}

/// Diamond: root -> a, b; a -> c; b -> c.
#[tokio::test]
async fn diamond_evaluates_the_shared_node_once() {
    let c_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&c_calls);

    let registry = Registry::builder()
        .provide(Provider::async_fn("c", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, BoxError>(3_u64)
            }
        }))
        .provide(Provider::sync("a", |call| Ok(call.dep::<u64>("c")? * 2)).depends_on("c", "c"))
        .provide(Provider::sync("b", |call| Ok(call.dep::<u64>("c")? * 3)).depends_on("c", "c"))
        .provide(
            Provider::sync("root", |call| Ok(call.dep::<u64>("a")? + call.dep::<u64>("b")?))
                .depends_on("a", "a")
                .depends_on("b", "b"),
        )
        .build()
        .unwrap();

    let graph = registry.graph("root").unwrap();
    assert_eq!(graph.len(), 3);

    let value = registry
        .invoker("root")
        .unwrap()
        .invoke(Request::new())
        .await
        .unwrap();

    assert_eq!(value.downcast_ref::<u64>(), Some(&15));
    assert_eq!(c_calls.load(Ordering::SeqCst), 1);
}

/// Siblings run concurrently: two 50ms providers finish well under 100ms.
#[tokio::test]
async fn independent_dependencies_run_concurrently() {
    let slow = |name: &str| {
        Provider::async_fn(name, |_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, BoxError>(())
        })
    };

    let registry = Registry::builder()
        .provide(slow("left"))
        .provide(slow("right"))
        .provide(
            Provider::sync("root", |_| Ok(()))
                .depends_on("left", "left")
                .depends_on("right", "right"),
        )
        .build()
        .unwrap();
    let invoker = registry.invoker("root").unwrap();

    let started = tokio::time::Instant::now();
    invoker.invoke(Request::new()).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(95));
}

/// Each request gets a fresh channel; nothing is memoized across requests.
#[tokio::test]
async fn every_request_evaluates_again() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let registry = Registry::builder()
        .provide(
            Provider::sync("user", move |call| {
                counter.fetch_add(1, Ordering::SeqCst);
                call.arg::<String>("name").map_err(Into::into)
            })
            .param("name", ParamDecl::typed(ArgType::String.non_null())),
        )
        .provide(
            Provider::sync("root", |call| Ok(format!("hi {}", call.dep::<String>("user")?)))
                .depends_on("user", "user"),
        )
        .build()
        .unwrap();
    let invoker = registry.invoker("root").unwrap();

    let ada = invoker
        .invoke(Request::new().argument("name", "ada"))
        .await
        .unwrap();
    let bob = invoker
        .invoke(Request::new().argument("name", "bob"))
        .await
        .unwrap();

    assert_eq!(ada.downcast_ref::<String>().unwrap(), "hi ada");
    assert_eq!(bob.downcast_ref::<String>().unwrap(), "hi bob");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// A failing node fails its dependents with the originating error, and
/// every acquired resource is still released.
#[tokio::test]
async fn failure_propagates_and_resources_are_released() {
    let events = log();
    let session_log = Arc::clone(&events);

    let registry = Registry::builder()
        .provide(Provider::scoped("session", move |_| {
            let release_log = Arc::clone(&session_log);
            Ok(Resource::new((), move || {
                release_log.lock().push("session released".into());
                Ok(())
            }))
        }))
        .provide(
            Provider::sync("orders", |_| Err::<Vec<u32>, _>(BoxError::from("table missing")))
                .depends_on("session", "session"),
        )
        .provide(
            Provider::sync("root", |call| Ok(call.dep::<Vec<u32>>("orders")?.len()))
                .depends_on("orders", "orders"),
        )
        .build()
        .unwrap();

    let err = registry
        .invoker("root")
        .unwrap()
        .invoke(Request::new())
        .await
        .unwrap_err();

    match err {
        Error::Resolve(ResolveError::NodeFailed { node, source }) => {
            assert_eq!(node.as_str(), "orders");
            assert_eq!(source.to_string(), "table missing");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(entries(&events), vec!["session released"]);
}

/// Async scoped resources follow the same LIFO discipline as sync ones.
#[tokio::test]
async fn async_scoped_resources_are_released_in_reverse_order() {
    let events = log();

    let step = |name: &'static str, dependency: Option<&'static str>| {
        let events = Arc::clone(&events);
        let provider = Provider::async_scoped(name, move |_| {
            let events = Arc::clone(&events);
            async move {
                tokio::task::yield_now().await;
                events.lock().push(format!("open {name}"));
                Ok::<_, BoxError>(AsyncResource::new(name, move || async move {
                    tokio::task::yield_now().await;
                    events.lock().push(format!("close {name}"));
                    Ok::<(), BoxError>(())
                }))
            }
        });
        match dependency {
            Some(dep) => provider.depends_on(dep, dep),
            None => provider,
        }
    };

    let registry = Registry::builder()
        .provide(step("connection", None))
        .provide(step("transaction", Some("connection")))
        .provide(step("cursor", Some("transaction")))
        .provide(Provider::sync("root", |_| Ok(())).depends_on("cursor", "cursor"))
        .build()
        .unwrap();

    registry
        .invoker("root")
        .unwrap()
        .invoke(Request::new())
        .await
        .unwrap();

    assert_eq!(
        entries(&events),
        vec![
            "open connection",
            "open transaction",
            "open cursor",
            "close cursor",
            "close transaction",
            "close connection",
        ]
    );
}

/// A failed release after a successful root is reported; the other releases
/// still run.
#[tokio::test]
async fn teardown_failures_are_reported() {
    let events = log();
    let healthy_log = Arc::clone(&events);

    let registry = Registry::builder()
        .provide(Provider::scoped("healthy", move |_| {
            let release_log = Arc::clone(&healthy_log);
            Ok(Resource::new(1_u8, move || {
                release_log.lock().push("healthy released".into());
                Ok(())
            }))
        }))
        .provide(
            Provider::scoped("broken", |_| {
                Ok(Resource::new(2_u8, || Err(BoxError::from("commit failed"))))
            })
            .depends_on("healthy", "healthy"),
        )
        .provide(Provider::sync("root", |_| Ok(())).depends_on("broken", "broken"))
        .build()
        .unwrap();

    let err = registry
        .invoker("root")
        .unwrap()
        .invoke(Request::new())
        .await
        .unwrap_err();

    match err {
        Error::Teardown(teardown) => {
            assert_eq!(teardown.failures.len(), 1);
            assert_eq!(teardown.failures[0].node.as_str(), "broken");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(entries(&events), vec!["healthy released"]);
}

/// A timed-out request still releases what it acquired.
#[tokio::test]
async fn timeout_still_releases_resources() {
    let events = log();
    let lock_log = Arc::clone(&events);

    let registry = Registry::builder()
        .provide(Provider::scoped("lock", move |_| {
            let release_log = Arc::clone(&lock_log);
            Ok(Resource::new((), move || {
                release_log.lock().push("lock released".into());
                Ok(())
            }))
        }))
        .provide(
            Provider::async_fn("root", |_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, BoxError>(())
            })
            .depends_on("lock", "lock"),
        )
        .build()
        .unwrap();

    let invoker = registry
        .invoker_with(
            "root",
            InvokerConfig::new().with_timeout(Duration::from_millis(20)),
        )
        .unwrap();

    let err = invoker.invoke(Request::new()).await.unwrap_err();

    assert!(matches!(err, Error::Timeout { timeout } if timeout == Duration::from_millis(20)));
    assert_eq!(entries(&events), vec!["lock released"]);
}

/// Detached invocations hand back the value while teardown runs.
#[tokio::test]
async fn detached_invocation_finishes_teardown_later() {
    let events = log();
    let session_log = Arc::clone(&events);

    let registry = Registry::builder()
        .provide(Provider::async_scoped("session", move |_| {
            let release_log = Arc::clone(&session_log);
            async move {
                Ok::<_, BoxError>(AsyncResource::new(9_u16, move || async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    release_log.lock().push("session released".into());
                    Ok::<(), BoxError>(())
                }))
            }
        }))
        .provide(
            Provider::sync("root", |call| Ok(*call.dep::<u16>("session")?))
                .depends_on("session", "session"),
        )
        .build()
        .unwrap();

    let detached = registry
        .invoker("root")
        .unwrap()
        .invoke_detached(Request::new())
        .await;

    assert_eq!(
        detached.result.as_ref().unwrap().downcast_ref::<u16>(),
        Some(&9)
    );

    detached.teardown.await.unwrap().unwrap();
    assert_eq!(entries(&events), vec!["session released"]);
}

/// Missing required arguments fail the request before the body runs.
#[tokio::test]
async fn missing_required_argument_is_reported() {
    let registry = Registry::builder()
        .provide(
            Provider::sync("root", |call| call.arg::<i64>("id").map_err(Into::into))
                .param("id", ParamDecl::typed(ArgType::Int.non_null())),
        )
        .build()
        .unwrap();
    let invoker = registry.invoker("root").unwrap();

    let err = invoker.invoke(Request::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "missing required argument 'id' for provider 'root'");

    let value = invoker
        .invoke(Request::new().argument("id", 4))
        .await
        .unwrap();
    assert_eq!(value.downcast_ref::<i64>(), Some(&4));
}

/// Structural problems surface when the graph is built, not per request.
#[test]
fn build_errors_surface_before_any_request() {
    let registry = Registry::builder()
        .provide(Provider::sync("a", |_| Ok(())).depends_on("b", "b"))
        .provide(Provider::sync("b", |_| Ok(())).depends_on("a", "a"))
        .provide(Provider::sync("orphan", |_| Ok(())).depends_on("ghost", "ghost"))
        .build()
        .unwrap();

    assert!(matches!(
        registry.invoker("a"),
        Err(BuildError::CircularDependency { ref cycle }) if cycle.len() == 3
    ));
    assert!(matches!(
        registry.invoker("orphan"),
        Err(BuildError::UnknownProvider { .. })
    ));
}

/// The merged argument map is what a schema layer exposes.
#[test]
fn merged_arguments_are_serializable() {
    let registry = Registry::builder()
        .provide(
            Provider::sync("page", |_| Ok(()))
                .param("limit", ParamDecl::default_value(20).describe("page size"))
                .param("after", ParamDecl::typed(ArgType::String)),
        )
        .provide(
            Provider::sync("root", |_| Ok(()))
                .param("id", ParamDecl::typed(ArgType::Id.non_null()))
                .depends_on("page", "page"),
        )
        .build()
        .unwrap();

    let graph = registry.graph("root").unwrap();
    let rendered: Vec<String> = graph
        .arguments()
        .iter()
        .map(|(name, decl)| format!("{name}: {}", decl.resolved_type().unwrap()))
        .collect();

    assert_eq!(rendered, vec!["id: ID!", "limit: Int", "after: String"]);
    assert_eq!(
        serde_json::to_value(graph.arguments()).unwrap()["limit"],
        serde_json::json!({"type": "int", "default": 20, "description": "page size"})
    );
}

/// A channel can be driven directly, with callers on separate tasks.
#[tokio::test]
async fn channel_serves_concurrent_callers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let registry = Registry::builder()
        .provide(Provider::async_fn("config", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, BoxError>(String::from("loaded"))
            }
        }))
        .provide(Provider::sync("root", |_| Ok(())).depends_on("config", "config"))
        .build()
        .unwrap();
    let invoker = registry.invoker("root").unwrap();
    let channel: Arc<ExecutionChannel> = Arc::new(invoker.channel(Request::new()).unwrap());

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.get_key("config").await })
        })
        .collect();

    for task in tasks {
        let value = task.await.unwrap().unwrap();
        assert_eq!(value.downcast_ref::<String>().unwrap(), "loaded");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    channel.release().await.unwrap();
}

/// Cancelling an invocation while a resource is being released does not
/// interrupt the release.
#[tokio::test]
async fn cancelled_invocation_still_finishes_its_release() {
    let events = log();
    let tx_log = Arc::clone(&events);

    let registry = Registry::builder()
        .provide(Provider::async_scoped("tx", move |_| {
            let release_log = Arc::clone(&tx_log);
            async move {
                Ok::<_, BoxError>(AsyncResource::new((), move || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    release_log.lock().push("committed".into());
                    Ok::<(), BoxError>(())
                }))
            }
        }))
        .provide(Provider::sync("root", |_| Ok(())).depends_on("tx", "tx"))
        .build()
        .unwrap();
    let invoker = registry.invoker("root").unwrap();

    let outer =
        tokio::time::timeout(Duration::from_millis(10), invoker.invoke(Request::new())).await;
    assert!(outer.is_err());
    assert!(entries(&events).is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(entries(&events), vec!["committed"]);
}

/// Requests can share one context; each still gets its own channel.
#[tokio::test]
async fn requests_can_share_a_context() {
    let context = Arc::new(Context::new().with("tenant", String::from("acme")));

    let registry = Registry::builder()
        .provide(builtin::context_entry("tenant"))
        .provide(
            Provider::sync("root", |call| {
                let tenant = call.dep::<String>("tenant")?;
                let page: u32 = call.arg("page")?;
                Ok(format!("{tenant}/{page}"))
            })
            .param("page", ParamDecl::default_value(1))
            .depends_on("tenant", "context:tenant"),
        )
        .build()
        .unwrap();
    let invoker = registry.invoker("root").unwrap();

    let first = invoker
        .invoke(Request::new().shared_context(Arc::clone(&context)))
        .await
        .unwrap();
    let second = invoker
        .invoke(
            Request::new()
                .shared_context(Arc::clone(&context))
                .argument("page", 2),
        )
        .await
        .unwrap();

    assert_eq!(first.downcast_ref::<String>().unwrap(), "acme/1");
    assert_eq!(second.downcast_ref::<String>().unwrap(), "acme/2");
}
