//! Hook serialization across clients

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use playcore::{
    ClientEvent, ClientHandle, Core, CoreConfig, CoreError, Envelope, HookError, HookSeq, MediaInfo, Node,
    PropertyError,
};

const WAIT: Duration = Duration::from_secs(5);

fn core() -> Arc<Core> {
    let config = CoreConfig::new().with_hook_poll_interval(Duration::from_millis(10));
    let core = Core::new(config).unwrap();
    core.register_media("a.mkv", MediaInfo::new().with_duration(60.0));
    Arc::new(core)
}

/// Next event that is not a player lifecycle broadcast
fn next_message(client: &ClientHandle) -> Option<Envelope> {
    loop {
        let envelope = client.recv_timeout(WAIT)?;
        if !matches!(envelope.event, ClientEvent::Player(_)) {
            return Some(envelope);
        }
    }
}

/// Wait for the next hook invocation and return (name, seq, reply id)
fn expect_hook(client: &ClientHandle) -> (String, HookSeq, u64) {
    let envelope = next_message(client).expect("hook invocation");
    match envelope.event {
        ClientEvent::Hook { name, id } => (name, HookSeq::new(id), envelope.reply_id),
        other => panic!("unexpected event {:?}", other),
    }
}

fn assert_idle(client: &ClientHandle) {
    thread::sleep(Duration::from_millis(30));
    while let Some(envelope) = client.try_recv() {
        assert!(
            matches!(envelope.event, ClientEvent::Player(_)),
            "client {} was invoked: {:?}",
            client.name(),
            envelope.event
        );
    }
}

#[test]
fn test_on_load_handlers_run_one_at_a_time() {
    let core = core();
    let a = core.connect_client("a");
    let b = core.connect_client("b");
    let seq_a = core.add_hook(a.id(), "on_load", 11, 0).unwrap();
    let seq_b = core.add_hook(b.id(), "on_load", 22, 10).unwrap();

    let loader = {
        let core = Arc::clone(&core);
        thread::spawn(move || core.command_blocking("loadfile a.mkv"))
    };

    let (name, seq, reply) = expect_hook(&a);
    assert_eq!((name.as_str(), seq, reply), ("on_load", seq_a, 11));
    assert_idle(&b);
    assert!(matches!(core.get_property("path"), Err(CoreError::Property(PropertyError::Unavailable))));

    // B is registered but not running yet
    assert!(matches!(
        core.hook_continue(b.id(), seq_b),
        Err(CoreError::Hook(HookError::NotActive { .. }))
    ));
    // A cannot acknowledge B's handler
    assert!(matches!(
        core.hook_continue(a.id(), seq_b),
        Err(CoreError::Hook(HookError::NotFound { .. }))
    ));

    core.hook_continue(a.id(), seq_a).unwrap();
    let (_, seq, reply) = expect_hook(&b);
    assert_eq!((seq, reply), (seq_b, 22));
    assert_idle(&a);

    core.hook_continue(b.id(), seq_b).unwrap();
    loader.join().unwrap().unwrap();
    assert_eq!(core.get_property("path").unwrap(), Node::from("a.mkv"));
}

/// Sequence numbers of the running `on_load` handlers
fn active_on_load(core: &Core) -> Vec<HookSeq> {
    core.with_session(|s| {
        s.hooks
            .handlers()
            .iter()
            .filter(|h| h.hook_type == "on_load" && h.active)
            .map(|h| h.seq)
            .collect()
    })
}

#[test]
fn test_many_handlers_run_in_priority_order_one_at_a_time() {
    let core = core();
    let clients: Vec<ClientHandle> = (0..5).map(|i| core.connect_client(&format!("c{i}"))).collect();
    // Registration order differs from run order; equal priorities run in
    // registration order
    let mut expected = Vec::new();
    let registrations = [(3, 30), (0, -10), (4, 50), (1, 0), (2, 20), (0, 20)];
    for (user_id, (client, priority)) in (0u64..).zip(registrations) {
        let seq = core.add_hook(clients[client].id(), "on_load", user_id, priority).unwrap();
        expected.push((priority, seq, client, user_id));
    }
    core.add_hook(clients[2].id(), "on_unload", 99, -100).unwrap();
    expected.sort_by_key(|&(priority, seq, _, _)| (priority, seq));
    assert!(active_on_load(&core).is_empty());

    let loader = {
        let core = Arc::clone(&core);
        thread::spawn(move || core.command_blocking("loadfile a.mkv"))
    };

    for &(_, seq, client, user_id) in &expected {
        let (name, invoked, reply) = expect_hook(&clients[client]);
        assert_eq!((name.as_str(), invoked, reply), ("on_load", seq, user_id));
        assert_eq!(active_on_load(&core), [seq]);
        for (other, handle) in clients.iter().enumerate() {
            if other != client {
                assert_idle(handle);
            }
        }
        assert!(!loader.is_finished());
        core.hook_continue(clients[client].id(), seq).unwrap();
    }

    loader.join().unwrap().unwrap();
    assert!(active_on_load(&core).is_empty());
    assert_eq!(core.get_property("path").unwrap(), Node::from("a.mkv"));
}

#[test]
fn test_client_dropped_mid_hook_completes_hook() {
    let core = core();
    let a = core.connect_client("a");
    let b = core.connect_client("b");
    core.add_hook(a.id(), "on_load", 1, 0).unwrap();
    core.add_hook(b.id(), "on_load", 2, 5).unwrap();

    let loader = {
        let core = Arc::clone(&core);
        thread::spawn(move || core.command_blocking("loadfile a.mkv"))
    };
    expect_hook(&a);
    let gone = a.id();
    drop(a);

    loader.join().unwrap().unwrap();
    assert_eq!(core.get_property("filename").unwrap(), Node::from("a.mkv"));
    // The vanished handler is gone; B was not invoked for this load
    core.with_session(|s| assert!(s.hooks.handlers().iter().all(|h| h.client != gone)));
    assert_idle(&b);
}

#[test]
fn test_run_hook_waits_for_every_handler() {
    let core = core();
    let a = core.connect_client("a");
    let b = core.connect_client("b");
    let late = core.add_hook(b.id(), "on_unload", 0, 50).unwrap();
    let early = core.add_hook(a.id(), "on_unload", 0, -50).unwrap();
    core.add_hook(a.id(), "on_preloaded", 0, 0).unwrap();

    let runner = {
        let core = Arc::clone(&core);
        thread::spawn(move || core.run_hook("on_unload"))
    };

    let (name, seq, _) = expect_hook(&a);
    assert_eq!((name.as_str(), seq), ("on_unload", early));
    core.hook_continue(a.id(), early).unwrap();

    let (_, seq, _) = expect_hook(&b);
    assert_eq!(seq, late);
    assert!(!runner.is_finished());
    core.hook_continue(b.id(), late).unwrap();

    runner.join().unwrap().unwrap();
    // Handlers of other types were never invoked
    assert_idle(&a);
}

#[test]
fn test_forgotten_client_no_longer_blocks_load() {
    let core = core();
    let a = core.connect_client("a");
    core.add_hook(a.id(), "on_load", 1, 0).unwrap();
    core.forget_client(a.id());

    core.command_blocking("loadfile a.mkv").unwrap();
    assert_idle(&a);
    assert_eq!(core.get_property("duration").unwrap(), Node::Double(60.0));
}

#[test]
fn test_legacy_hook_protocol_through_commands() {
    let core = core();
    let script = core.connect_client("script");
    core.command_from_client(script.id(), "hook-add on_load 42 0").unwrap();

    let loader = {
        let core = Arc::clone(&core);
        thread::spawn(move || core.command_blocking("loadfile a.mkv"))
    };

    let envelope = next_message(&script).unwrap();
    let ClientEvent::ClientMessage(args) = envelope.event else {
        panic!("expected a client message");
    };
    assert_eq!(args[0], "hook_run");
    assert_eq!(args[1], "42");

    core.command_from_client(script.id(), &format!("hook-ack {}", args[2])).unwrap();
    loader.join().unwrap().unwrap();
    assert_eq!(core.get_property("path").unwrap(), Node::from("a.mkv"));
}
