use crosswire::{
    Event, EventName, MemoryStore, Module, RuntimeConfig, RuntimeContext, StoreError,
    StoreModuleDef, Value, Wire, WiringError, WiringTable,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

fn context() -> RuntimeContext {
    RuntimeContext::new(Arc::new(MemoryStore::new()), RuntimeConfig::default())
}

fn search_store_module() -> StoreModuleDef {
    StoreModuleDef::new(json!({ "query": "", "results": [], "queryLog": [] }))
        .mutation("setQuery", |slice, payload| {
            slice["query"] = payload.unwrap_or(Value::Null);
            Ok(())
        })
        .mutation("logQuery", |slice, payload| {
            let entry = payload.unwrap_or(Value::Null);
            slice["queryLog"]
                .as_array_mut()
                .ok_or_else(|| StoreError::Other("queryLog is not an array".into()))?
                .push(entry);
            Ok(())
        })
        .operation("fetchAndSaveResults", |ctx, _payload| {
            Box::pin(async move {
                let query = ctx.state()?["query"].clone();
                ctx.commit("setResults", Some(json!([query])))?;
                Ok(Value::Null)
            })
        })
        .operation("alwaysFails", |ctx, _payload| {
            Box::pin(async move {
                Err(StoreError::OperationFailed {
                    module: ctx.module().to_string(),
                    name: "alwaysFails".to_string(),
                    message: "adapter unreachable".to_string(),
                })
            })
        })
        .mutation("setResults", |slice, payload| {
            slice["results"] = payload.unwrap_or_else(|| json!([]));
            Ok(())
        })
}

fn module_with_wiring(wiring: WiringTable) -> Module {
    Module::new("search")
        .events([
            EventName::custom("UserAcceptedAQuery"),
            EventName::custom("SearchRequestChanged"),
        ])
        .store_module(search_store_module())
        .wiring(wiring)
}

#[tokio::test]
async fn test_commit_wire_writes_event_payload_into_the_store() {
    let ctx = context();
    let wiring = WiringTable::builder()
        .on(EventName::custom("UserAcceptedAQuery"), Wire::commit("setQuery"))
        .build();
    ctx.install(vec![module_with_wiring(wiring)]).await.unwrap();

    ctx.bus()
        .emit(Event::new(EventName::custom("UserAcceptedAQuery")).with_payload(json!("shoes")))
        .await;

    assert_eq!(
        ctx.store().state("search").unwrap()["query"],
        json!("shoes")
    );
}

#[tokio::test]
async fn test_wires_for_one_event_run_in_declaration_order() {
    let ctx = context();
    let order = Arc::new(Mutex::new(Vec::new()));
    let first = {
        let order = order.clone();
        Wire::new("first", move |_, _, _| {
            let order = order.clone();
            Box::pin(async move {
                order.lock().unwrap().push(1);
                Ok(())
            })
        })
    };
    let second = {
        let order = order.clone();
        Wire::new("second", move |_, _, _| {
            let order = order.clone();
            Box::pin(async move {
                order.lock().unwrap().push(2);
                Ok(())
            })
        })
    };
    let wiring = WiringTable::builder()
        .on(EventName::custom("UserAcceptedAQuery"), first)
        .on(EventName::custom("UserAcceptedAQuery"), second)
        .build();
    ctx.install(vec![module_with_wiring(wiring)]).await.unwrap();

    ctx.bus()
        .emit(Event::new(EventName::custom("UserAcceptedAQuery")))
        .await;

    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_failing_wire_does_not_stop_its_siblings() {
    let ctx = context();
    let failing = Wire::new("failing", |_, _, _| {
        Box::pin(async { Err(WiringError::Store(StoreError::Other("wire exploded".into()))) })
    });
    let wiring = WiringTable::builder()
        .on(EventName::custom("UserAcceptedAQuery"), failing)
        .on(EventName::custom("UserAcceptedAQuery"), Wire::commit("setQuery"))
        .build();
    ctx.install(vec![module_with_wiring(wiring)]).await.unwrap();

    ctx.bus()
        .emit(Event::new(EventName::custom("UserAcceptedAQuery")).with_payload(json!("boots")))
        .await;

    assert_eq!(
        ctx.store().state("search").unwrap()["query"],
        json!("boots")
    );
}

#[tokio::test]
async fn test_condition_gates_the_wire() {
    let ctx = context();
    let wiring = WiringTable::builder()
        .on(
            EventName::custom("UserAcceptedAQuery"),
            Wire::commit("setQuery").with_condition(|payload, _| {
                payload
                    .as_ref()
                    .and_then(Value::as_str)
                    .is_some_and(|query| !query.is_empty())
            }),
        )
        .build();
    ctx.install(vec![module_with_wiring(wiring)]).await.unwrap();
    let bus = ctx.bus();

    bus.emit(Event::new(EventName::custom("UserAcceptedAQuery")).with_payload(json!("")))
        .await;
    assert_eq!(ctx.store().state("search").unwrap()["query"], json!(""));

    bus.emit(Event::new(EventName::custom("UserAcceptedAQuery")).with_payload(json!("shoes")))
        .await;
    assert_eq!(
        ctx.store().state("search").unwrap()["query"],
        json!("shoes")
    );
}

#[tokio::test]
async fn test_debounced_wire_coalesces_to_the_final_payload() {
    let ctx = context();
    let wiring = WiringTable::builder()
        .on(
            EventName::custom("UserAcceptedAQuery"),
            Wire::commit("logQuery").with_debounce(Duration::from_millis(30)),
        )
        .build();
    ctx.install(vec![module_with_wiring(wiring)]).await.unwrap();

    for value in ["a", "b", "c"] {
        ctx.bus()
            .emit(
                Event::new(EventName::custom("UserAcceptedAQuery")).with_payload(json!(value)),
            )
            .await;
    }
    sleep(Duration::from_millis(80)).await;

    // One delegate call, carrying the last payload of the window.
    assert_eq!(
        ctx.store().state("search").unwrap()["queryLog"],
        json!(["c"])
    );
}

#[tokio::test]
async fn test_dispatch_wire_runs_the_operation_without_blocking_the_emission() {
    let ctx = context();
    let wiring = WiringTable::builder()
        .on(
            EventName::custom("SearchRequestChanged"),
            Wire::dispatch_without_payload("fetchAndSaveResults"),
        )
        .build();
    ctx.install(vec![module_with_wiring(wiring)]).await.unwrap();

    ctx.store()
        .commit("search", "setQuery", Some(json!("shoes")))
        .unwrap();
    ctx.bus()
        .emit(Event::new(EventName::custom("SearchRequestChanged")))
        .await;
    sleep(Duration::from_millis(20)).await;

    assert_eq!(
        ctx.store().state("search").unwrap()["results"],
        json!(["shoes"])
    );
}

#[tokio::test]
async fn test_failed_dispatch_is_reported_not_retried() {
    let ctx = context();
    let wiring = WiringTable::builder()
        .on(
            EventName::custom("SearchRequestChanged"),
            Wire::dispatch_without_payload("alwaysFails"),
        )
        .build();
    ctx.install(vec![module_with_wiring(wiring)]).await.unwrap();

    ctx.bus()
        .emit(Event::new(EventName::custom("SearchRequestChanged")))
        .await;
    sleep(Duration::from_millis(20)).await;

    // The failure stays inside the operation; state is untouched.
    assert_eq!(ctx.store().state("search").unwrap()["results"], json!([]));
}

#[tokio::test]
async fn test_uninstalled_module_receives_nothing() {
    let ctx = context();
    let calls = Arc::new(Mutex::new(0usize));
    let recording = {
        let calls = calls.clone();
        Wire::new("recording", move |_, _, _| {
            let calls = calls.clone();
            Box::pin(async move {
                *calls.lock().unwrap() += 1;
                Ok(())
            })
        })
    };
    let wiring = WiringTable::builder()
        .on(EventName::custom("UserAcceptedAQuery"), recording)
        .build();
    ctx.install(vec![module_with_wiring(wiring)]).await.unwrap();

    ctx.bus()
        .emit(Event::new(EventName::custom("UserAcceptedAQuery")))
        .await;
    assert_eq!(*calls.lock().unwrap(), 1);

    ctx.uninstall("search").await.unwrap();
    ctx.bus()
        .emit(Event::new(EventName::custom("UserAcceptedAQuery")))
        .await;
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_uninstall_clears_a_pending_debounced_wire() {
    let ctx = context();
    let calls = Arc::new(Mutex::new(0usize));
    let recording = {
        let calls = calls.clone();
        Wire::new("recording", move |_, _, _| {
            let calls = calls.clone();
            Box::pin(async move {
                *calls.lock().unwrap() += 1;
                Ok(())
            })
        })
        .with_debounce(Duration::from_millis(30))
    };
    let wiring = WiringTable::builder()
        .on(EventName::custom("UserAcceptedAQuery"), recording)
        .build();
    ctx.install(vec![module_with_wiring(wiring)]).await.unwrap();

    ctx.bus()
        .emit(Event::new(EventName::custom("UserAcceptedAQuery")))
        .await;
    ctx.uninstall("search").await.unwrap();
    sleep(Duration::from_millis(80)).await;

    assert_eq!(*calls.lock().unwrap(), 0);
}
