//! Re-entrancy tests for fos-object
//!
//! Collaborators that call back into the loader while one of its operations
//! is in flight. The nested call wins; the outer call stops quietly.

mod common;

use common::*;
use fos_object::*;
use url::Url;

fn url(path: &str) -> Url {
    Url::parse(DOCUMENT_URL).unwrap().join(path).unwrap()
}

#[test]
fn test_policy_check_reenters_load() {
    let (host, mut loader) = setup();
    let id = loader.bind(NodeId(1), ElementInfo::object().with_data("a.png"));

    MockHost::set_hook(&host.on_check_load, move |loader| {
        loader.update_element(id, ElementInfo::object().with_data("b.png")).unwrap();
        loader.load_object(id, true, false).unwrap();
    });
    loader.load_object(id, true, false).unwrap();

    assert_eq!(host.opened().len(), 1);
    assert_eq!(host.opened()[0].1, url("b.png"));
    assert_eq!(loader.channel(id).map(|c| c.uri.clone()), Some(url("b.png")));
    assert_eq!(loader.guard(id, Operation::Loading), Guard::Idle);
}

#[test]
fn test_cancel_reenters_forced_load() {
    let (host, mut loader) = setup();
    let id = load(&mut loader, ElementInfo::object().with_data("a.png"));
    let first = host.last_channel();
    loader.on_start_request(id, first, ChannelResponse::ok("image/png")).unwrap();

    loader.update_element(id, ElementInfo::object().with_data("c.png")).unwrap();
    MockHost::set_hook(&host.on_cancel, move |loader| {
        loader.load_object(id, true, true).unwrap();
    });
    loader.load_object(id, true, false).unwrap();

    let opened = host.opened();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[1].1, url("c.png"));
    assert_eq!(loader.kind(id), Some(ObjectKind::Loading));
    assert_eq!(loader.channel(id).map(|c| c.id), Some(opened[1].0));
    assert!(!loader.is_channel_loaded(id));
}

#[test]
fn test_spawn_superseded_by_reload() {
    let (host, mut loader) = setup();
    let id = load(&mut loader, ElementInfo::embed().with_type(MODULE_TYPE));

    MockHost::set_hook(&host.on_spawn, move |loader| {
        loader
            .update_element(id, ElementInfo::embed().with_type("application/x-unknown"))
            .unwrap();
        loader.load_object(id, true, false).unwrap();
    });
    loader.run_pending_tasks();

    // The instance spawned under the old type is stopped again
    let spawned = host.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(host.stopped(), spawned);
    assert!(!loader.has_running_module(id));
    assert_eq!(loader.kind(id), Some(ObjectKind::Null));
    assert_eq!(loader.fallback_reason(id), Some(FallbackReason::Unsupported));
    assert!(!host.event_names().contains(&"PluginInstantiated"));
}

#[test]
fn test_layout_flush_destroys_target() {
    let (host, mut loader) = setup();
    let id = load(&mut loader, ElementInfo::embed().with_type(MODULE_TYPE));

    MockHost::set_hook(&host.on_flush_layout, move |loader| {
        loader.destroy(id).unwrap();
    });
    loader.run_pending_tasks();

    assert!(host.spawned().is_empty());
    assert_eq!(loader.target_count(), 0);
    assert_eq!(loader.kind(id), None);
}

#[test]
fn test_stop_reenters_destroy() {
    let (host, mut loader) = setup();
    let (id, instance) = running_module(&host, &mut loader);

    MockHost::set_hook(&host.on_stop, move |loader| {
        loader.destroy(id).unwrap();
    });
    loader.stop_module(id, false).unwrap();

    assert_eq!(host.stopped(), vec![instance]);
    assert_eq!(loader.target_count(), 0);
}

#[test]
fn test_stop_reenters_stop() {
    let (host, mut loader) = setup();
    let (id, instance) = running_module(&host, &mut loader);

    MockHost::set_hook(&host.on_stop, move |loader| {
        loader.stop_module(id, false).unwrap();
    });
    loader.stop_module(id, false).unwrap();
    loader.run_pending_tasks();

    assert_eq!(host.stopped(), vec![instance]);
    assert_eq!(loader.guard(id, Operation::Stopping), Guard::Idle);
}

#[test]
fn test_stop_during_stop_is_deferred() {
    let (host, mut loader) = setup();
    let (id, first) = running_module(&host, &mut loader);

    // Respawn from inside the stop, then stop the new instance while the
    // first stop is still in progress
    MockHost::set_hook(&host.on_stop, move |loader| {
        loader.script_request_instance(id, true).unwrap();
        loader.stop_module(id, false).unwrap();
    });
    loader.stop_module(id, false).unwrap();

    let spawned = host.spawned();
    assert_eq!(spawned.len(), 2);
    assert_eq!(host.stopped(), vec![first]);

    loader.run_pending_tasks();
    assert_eq!(host.stopped(), vec![first, spawned[1]]);
    assert_eq!(loader.guard(id, Operation::Stopping), Guard::Idle);
}

#[test]
fn test_spawn_hook_destroys_target() {
    let (host, mut loader) = setup();
    let id = load(&mut loader, ElementInfo::embed().with_type(MODULE_TYPE));

    MockHost::set_hook(&host.on_spawn, move |loader| {
        loader.destroy(id).unwrap();
    });
    loader.run_pending_tasks();

    let spawned = host.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(host.stopped(), spawned);
    assert_eq!(loader.target_count(), 0);
}
