//! End-to-end command execution through the `Core` facade

use std::sync::mpsc;
use std::time::{Duration, Instant};

use playcore::{CommandError, Core, CoreConfig, CoreError, MediaInfo, Node};
use rstest::rstest;

fn core() -> Core {
    let core = Core::new(CoreConfig::default()).unwrap();
    core.register_media("a.mkv", MediaInfo::new().with_duration(100.0));
    core.register_media("b.mkv", MediaInfo::new().with_duration(50.0));
    core
}

#[rstest]
#[case("no", "inf")]
#[case("inf", "force")]
#[case("force", "no")]
fn test_cycle_wraps_choice(#[case] from: &str, #[case] to: &str) {
    let core = core();
    core.set_property_string("loop-playlist", from).unwrap();
    core.command_blocking("cycle loop-playlist").unwrap();
    assert_eq!(core.get_property("loop-playlist").unwrap(), Node::from(to));
}

#[test]
fn test_cycle_down_wraps_backwards() {
    let core = core();
    core.command_blocking("cycle loop-playlist down").unwrap();
    assert_eq!(core.get_property("loop-playlist").unwrap(), Node::from("force"));
}

#[test]
fn test_add_huge_increment_to_choice() {
    let core = core();
    core.command_blocking("set loop-playlist inf; add loop-playlist 1e19").unwrap();
    assert_eq!(core.get_property("loop-playlist").unwrap(), Node::from("force"));
    core.command_blocking("add loop-playlist -1e19").unwrap();
    assert_eq!(core.get_property("loop-playlist").unwrap(), Node::from("no"));
}

#[test]
fn test_list_with_failing_middle_entry() {
    let core = core();
    let err = core
        .command_blocking("set volume 40; set no-such-property 1; set mute yes")
        .unwrap_err();
    assert!(matches!(err, CoreError::Command(CommandError::Failed(_))));

    // Entries around the failure ran
    assert_eq!(core.get_property("volume").unwrap(), Node::Double(40.0));
    assert_eq!(core.get_property("mute").unwrap(), Node::Flag(true));
}

#[test]
fn test_long_list_runs_without_recursion() {
    let core = core();
    let text = vec!["ignore"; 10_000].join("; ");
    assert_eq!(core.command_blocking(&text).unwrap(), Node::None);

    let text = format!("{}; add volume 1", vec!["ignore"; 10_000].join("; "));
    core.command_blocking(&text).unwrap();
    assert_eq!(core.get_property("volume").unwrap(), Node::Double(101.0));
}

#[test]
fn test_expansion_in_arguments() {
    let core = core();
    core.command_blocking("loadfile a.mkv").unwrap();
    let text = core
        .command_blocking("expand-text \"${filename/no-ext} ${?pause==yes:paused}${!pause==yes:playing} $$\"")
        .unwrap();
    assert_eq!(text, Node::from("a playing $"));

    core.command_blocking("stop").unwrap();
    let text = core.command_blocking("expand-text \"[${nope}][${path}][${path:none}]\"").unwrap();
    assert_eq!(text, Node::from("[(error)][(unavailable)][none]"));
}

#[test]
fn test_playlist_navigation() {
    let core = core();
    core.command_blocking("loadfile a.mkv").unwrap();
    core.command_blocking("loadfile b.mkv append").unwrap();
    assert_eq!(core.get_property("playlist-count").unwrap(), Node::Int(2));

    core.command_blocking("playlist-next").unwrap();
    assert_eq!(core.get_property("filename").unwrap(), Node::from("b.mkv"));
    assert_eq!(core.get_property("duration").unwrap(), Node::Double(50.0));

    // Weak navigation past the end fails and keeps playing
    assert!(core.command_blocking("playlist-next").is_err());
    assert_eq!(core.get_property("playlist-pos").unwrap(), Node::Int(1));

    core.command_blocking("playlist-next force").unwrap();
    assert_eq!(core.get_property("idle-active").unwrap(), Node::Flag(true));
}

#[test]
fn test_seek_and_revert() {
    let core = core();
    // Nothing to seek in
    assert!(core.command_blocking("seek 10").is_err());

    core.command_blocking("loadfile a.mkv").unwrap();
    core.command_blocking("seek 30 absolute").unwrap();
    core.command_blocking("seek 10").unwrap();
    assert_eq!(core.get_property("time-pos").unwrap(), Node::Double(40.0));

    core.command_blocking("revert-seek").unwrap();
    assert_eq!(core.get_property("time-pos").unwrap(), Node::Double(30.0));

    core.command_blocking("seek 50 absolute-percent").unwrap();
    assert_eq!(core.get_property("percent-pos").unwrap(), Node::Double(50.0));
}

#[test]
fn test_async_command_callback() {
    let core = core();
    let (tx, rx) = mpsc::channel();
    core.command_async("loadfile a.mkv", None, move |outcome| {
        tx.send(outcome).unwrap();
    })
    .unwrap();
    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(outcome.success);
}

#[cfg(unix)]
#[test]
fn test_subprocess_killed_when_playback_ends() {
    let core = core();
    core.command_blocking("loadfile a.mkv").unwrap();

    let (tx, rx) = mpsc::channel();
    core.command_async("subprocess sleep,30", None, move |outcome| {
        tx.send(outcome).unwrap();
    })
    .unwrap();
    std::thread::sleep(Duration::from_millis(100));
    core.command_blocking("stop").unwrap();

    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.result.get("killed_by_us"), Some(&Node::Flag(true)));
    assert_eq!(outcome.result.get("error_string"), Some(&Node::from("killed")));
}

#[cfg(unix)]
#[test]
fn test_detached_subprocess_survives_stop() {
    let core = core();
    core.command_blocking("loadfile a.mkv").unwrap();

    let (tx, rx) = mpsc::channel();
    core.command_async("subprocess sleep,0.2 no", None, move |outcome| {
        tx.send(outcome).unwrap();
    })
    .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    core.command_blocking("stop").unwrap();

    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.result.get("status"), Some(&Node::Int(0)));
    assert_eq!(outcome.result.get("killed_by_us"), Some(&Node::Flag(false)));
}

#[cfg(unix)]
#[test]
fn test_queued_subprocess_killed_when_playback_ends() {
    let core = Core::new(CoreConfig::new().with_worker_threads(1)).unwrap();
    core.register_media("a.mkv", MediaInfo::new().with_duration(100.0));
    core.command_blocking("loadfile a.mkv").unwrap();

    // Occupies the only worker thread
    core.command_async("subprocess sleep,0.5 no", None, |_| {}).unwrap();
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    core.command_async("subprocess sleep,3", None, move |outcome| {
        tx.send(outcome).unwrap();
    })
    .unwrap();
    std::thread::sleep(Duration::from_millis(50));
    core.command_blocking("stop").unwrap();

    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.result.get("killed_by_us"), Some(&Node::Flag(true)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[cfg(unix)]
#[test]
fn test_playback_only_subprocess_while_idle_is_killed() {
    let core = core();
    let started = Instant::now();
    let result = core.command_blocking("subprocess sleep,3").unwrap();
    assert_eq!(result.get("killed_by_us"), Some(&Node::Flag(true)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_quit_records_exit_code() {
    let core = core();
    core.command_blocking("quit 3").unwrap();
    assert_eq!(core.quit_requested(), Some(3));
}
