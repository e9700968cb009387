//! End-to-end runs of the scheduler against the ramp instrument.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Capture, Recorder, ramp_registry};
use parking_lot::Mutex;
use seqcore::timing::{Lifecycle, StopReason};
use seqcore::{
    Event, EventKind, Repeat, RunMode, RunState, Scheduler, SchedulerConfig, spawn_engine,
};

fn wait_for_state(handle: &seqcore::EngineHandle, state: RunState) {
    for _ in 0..5000 {
        if handle.state() == state {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("engine never reached {state:?}");
}

#[test]
fn test_single_note_runs_for_its_duration() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::note(1, 1, 0, 1000));

    let summary = scheduler.run(&mut registry, 0, 0, RunMode::ONCE);

    assert_eq!(summary.ticks, 1000);
    assert_eq!(summary.reason, StopReason::Idle);
    assert!(scheduler.voices().is_empty());
    assert_eq!(registry.bus().frames(), 1000);
}

#[test]
fn test_overlapping_notes_release_independently() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::note(1, 1, 0, 1000));
    scheduler.add_event(Event::note(2, 1, 500, 1000));

    scheduler.run(&mut registry, 0, 600, RunMode::ONCE);
    assert_eq!(scheduler.now(), 600);
    assert_eq!(scheduler.voices().len(), 2);

    scheduler.run(&mut registry, 600, 1499, RunMode::ONCE);
    assert_eq!(scheduler.voices().len(), 1);
    assert!(scheduler.voices().contains(2));

    let summary = scheduler.run(&mut registry, 1499, 0, RunMode::ONCE);
    assert_eq!(summary.ticks, 1);
    assert_eq!(scheduler.now(), 1500);
    assert!(scheduler.voices().is_empty());
}

#[test]
fn test_overlapping_notes_removal_ticks() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::note(1, 1, 0, 1000));
    scheduler.add_event(Event::note(2, 1, 500, 1000));
    let recorder = Recorder::default();
    recorder.attach(&mut scheduler);

    let summary = scheduler.run(&mut registry, 0, 0, RunMode::ONCE);

    assert_eq!(summary.ticks, 1500);
    assert_eq!(recorder.ticks_of(Lifecycle::VoiceStarted), vec![0, 500]);
    assert_eq!(recorder.ticks_of(Lifecycle::VoiceRemoved), vec![999, 1499]);
}

#[test]
fn test_stray_stop_changes_nothing() {
    let reference = Capture::default();
    let mut registry = ramp_registry(0, Some(reference.clone()));
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::note(1, 1, 0, 100));
    let expected = scheduler.run(&mut registry, 0, 0, RunMode::ONCE);

    let capture = Capture::default();
    let mut registry = ramp_registry(0, Some(capture.clone()));
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::note(1, 1, 0, 100));
    scheduler.add_event(Event::stop(99, 10));
    let summary = scheduler.run(&mut registry, 0, 0, RunMode::ONCE);

    assert_eq!(summary.ticks, expected.ticks);
    assert_eq!(capture.frames(), reference.frames());
}

#[test]
fn test_pause_and_resume_from_another_thread() {
    fn timeline() -> Scheduler {
        let mut scheduler = Scheduler::default();
        for i in 0..8 {
            scheduler.add_event(Event::note(i + 1, 1, i as u64 * 500, 900));
        }
        scheduler
    }

    let reference = Capture::default();
    let mut registry = ramp_registry(3, Some(reference.clone()));
    let expected = timeline().run(&mut registry, 0, 0, RunMode::ONCE);

    let capture = Capture::default();
    let registry = ramp_registry(3, Some(capture.clone()));
    let mut scheduler = timeline();

    // hold the render thread at tick 1000 until the pause request is in
    let (reached_tx, reached_rx) = crossbeam::channel::bounded::<u64>(1);
    let (go_tx, go_rx) = crossbeam::channel::bounded::<()>(1);
    let mut held = false;
    scheduler.set_tick_callback(1000, move |ticks| {
        if !held {
            held = true;
            let _ = reached_tx.send(ticks);
            let _ = go_rx.recv();
        }
    });

    let engine = spawn_engine(scheduler, registry, 0, 0, RunMode::ONCE).unwrap();
    assert_eq!(reached_rx.recv().unwrap(), 1000);
    engine.pause();
    engine.pause();
    go_tx.send(()).unwrap();

    wait_for_state(&engine, RunState::Paused);
    let frozen = capture.len();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(frozen, 1000);
    assert_eq!(capture.len(), frozen);

    assert!(engine.resume());
    let (_, registry, summary) = engine.join().unwrap();

    assert_eq!(summary.ticks, expected.ticks);
    assert_eq!(registry.bus().frames(), expected.ticks);
    assert_eq!(capture.frames(), reference.frames());
}

#[test]
fn test_voice_limit_rejects_new_voices() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::new(SchedulerConfig {
        max_voices: Some(2),
        ..SchedulerConfig::default()
    });
    for id in 1..=3 {
        scheduler.add_event(Event::note(id, 1, 0, 50));
    }
    let recorder = Recorder::default();
    recorder.attach(&mut scheduler);

    scheduler.run(&mut registry, 0, 10, RunMode::ONCE);

    assert_eq!(scheduler.voices().len(), 2);
    assert!(!scheduler.voices().contains(3));
    assert_eq!(recorder.count(Lifecycle::VoiceRejected), 1);
}

#[test]
fn test_duplicate_start_keeps_first_voice() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::note(1, 1, 0, 100));
    scheduler.add_event(Event::note(1, 1, 10, 500));
    let recorder = Recorder::default();
    recorder.attach(&mut scheduler);

    let summary = scheduler.run(&mut registry, 0, 0, RunMode::ONCE);

    assert_eq!(recorder.count(Lifecycle::VoiceStarted), 1);
    assert_eq!(recorder.ticks_of(Lifecycle::VoiceRemoved), vec![99]);
    // the track itself runs to the end of the ignored note
    assert_eq!(summary.ticks, 510);
}

#[test]
fn test_restart_detaches_old_voice() {
    let mut registry = ramp_registry(5, None);
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::held(1, 1));
    let mut restart = Event::held(1, 1);
    restart.kind = EventKind::Restart;
    restart.start = 10;
    scheduler.add_event(restart);

    scheduler.run(&mut registry, 0, 11, RunMode::PERFORM);
    assert_eq!(scheduler.voices().len(), 2);
    assert!(scheduler.voices().contains(1));
    assert_eq!(scheduler.voices().iter().filter(|v| v.id().is_none()).count(), 1);

    scheduler.run(&mut registry, 11, 20, RunMode::LIVE);
    assert_eq!(scheduler.voices().len(), 1);
    assert_eq!(scheduler.voices().state(1), Some(seqcore::VoiceState::On));
}

#[test]
fn test_cancel_silences_all_voices() {
    let mut registry = ramp_registry(1000, None);
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::held(1, 1));
    scheduler.add_event(Event::held(2, 1));
    scheduler.add_event(Event::new(EventKind::Cancel, 0, 5));

    let summary = scheduler.run(&mut registry, 0, 0, RunMode::ONCE);

    assert_eq!(summary.reason, StopReason::Idle);
    assert_eq!(summary.ticks, 6);
    assert!(scheduler.voices().is_empty());
}

fn looping_timeline() -> Scheduler {
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::track_start(1, 10));
    scheduler.add_event(Event::track_stop(1, 30));
    for (id, start) in [(1, 0), (2, 5), (3, 9)] {
        scheduler.add_event(Event::note(id, 1, start, 1).on_track(1));
    }
    scheduler.add_track(1).set_repeat(Repeat::Forever);
    scheduler
}

#[test]
fn test_track_events_start_and_stop_tracks() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = looping_timeline();
    let recorder = Recorder::default();
    recorder.attach(&mut scheduler);

    let summary = scheduler.run(&mut registry, 0, 0, RunMode::ONCE);

    assert_eq!(
        recorder.ticks_of(Lifecycle::VoiceStarted),
        vec![10, 15, 19, 20, 25, 29]
    );
    // loops are reported once the wrapping tick has been rendered
    assert_eq!(recorder.ticks_of(Lifecycle::TrackLooped(1)), vec![20, 30]);
    assert_eq!(summary.ticks, 31);
    assert!(!scheduler.track(1).unwrap().is_enabled());
}

#[test]
fn test_start_mid_timeline_restores_started_tracks() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = looping_timeline();
    let recorder = Recorder::default();
    recorder.attach(&mut scheduler);

    let summary = scheduler.run(&mut registry, 17, 0, RunMode::ONCE);
    assert_eq!(summary.reason, StopReason::Idle);

    assert_eq!(
        recorder.ticks_of(Lifecycle::VoiceStarted),
        vec![19, 20, 25, 29]
    );
}

/// Track 0 plays twice and switches track 1 on and off in each pass.
fn two_pass_timeline() -> Scheduler {
    let mut scheduler = Scheduler::default();
    scheduler.add_track(0).set_repeat(Repeat::Times(2));
    scheduler.add_event(Event::track_start(1, 10));
    scheduler.add_event(Event::track_stop(1, 90));
    scheduler.add_event(Event::note(100, 1, 99, 1));
    scheduler.add_event(Event::note(1, 1, 0, 1).on_track(1));
    scheduler.add_event(Event::note(2, 1, 10, 1).on_track(1));
    scheduler.add_track(1).set_repeat(Repeat::Forever);
    scheduler
}

#[test]
fn test_start_in_second_pass_matches_full_run() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = two_pass_timeline();
    let full = Recorder::default();
    full.attach(&mut scheduler);
    scheduler.run(&mut registry, 0, 0, RunMode::ONCE);

    let mut registry = ramp_registry(0, None);
    let mut scheduler = two_pass_timeline();
    let partial = Recorder::default();
    partial.attach(&mut scheduler);
    let summary = scheduler.run(&mut registry, 150, 0, RunMode::ONCE);

    let expected: Vec<u64> = full
        .ticks_of(Lifecycle::VoiceStarted)
        .into_iter()
        .filter(|&tick| tick >= 150)
        .collect();
    assert!(expected.len() > 1);
    assert_eq!(partial.ticks_of(Lifecycle::VoiceStarted), expected);
    assert_eq!(summary.end, 200);
}

#[test]
fn test_higher_track_starts_lower_track_in_same_tick() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::track_start(2, 0));
    scheduler.add_event(Event::note(20, 1, 0, 20).on_track(2));
    scheduler.add_track(2).insert(Event::track_start(1, 10));
    scheduler.add_event(Event::note(1, 1, 0, 1).on_track(1));
    // a track asking to restart itself is ignored
    scheduler.add_track(1).insert(Event::track_start(1, 0));
    let recorder = Recorder::default();
    recorder.attach(&mut scheduler);

    scheduler.run(&mut registry, 0, 0, RunMode::ONCE);

    assert_eq!(recorder.ticks_of_id(Lifecycle::VoiceStarted, 1), vec![10]);
    assert_eq!(recorder.ticks_of(Lifecycle::TrackStarted(1)), vec![10]);
}

#[test]
fn test_rewound_lower_track_plays_on_time() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::track_start(1, 0));
    scheduler.add_event(Event::track_start(2, 0));
    scheduler.add_event(Event::note(1, 1, 0, 1).on_track(1));
    scheduler.add_event(Event::note(2, 1, 19, 1).on_track(1));
    scheduler.add_track(1).set_repeat(Repeat::Forever);
    scheduler.add_event(Event::note(30, 1, 0, 12).on_track(2));
    scheduler.add_track(2).insert(Event::track_start(1, 10));
    let recorder = Recorder::default();
    recorder.attach(&mut scheduler);

    scheduler.run(&mut registry, 0, 15, RunMode::ONCE);

    assert_eq!(recorder.ticks_of_id(Lifecycle::VoiceStarted, 1), vec![0, 10]);
}

#[test]
fn test_track_started_from_immediate_queue_plays_on_time() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::new(SchedulerConfig {
        resolution: 4,
        ..SchedulerConfig::default()
    });
    scheduler.add_event(Event::note(5, 1, 0, 1).on_track(1));
    scheduler.immediate_queue().push(Event::track_start(1, 0));
    let recorder = Recorder::default();
    recorder.attach(&mut scheduler);

    scheduler.run(&mut registry, 0, 8, RunMode::PERFORM);

    assert_eq!(recorder.ticks_of_id(Lifecycle::VoiceStarted, 5), vec![0]);
}

#[test]
fn test_restart_at_voice_limit_replaces_voice() {
    let mut registry = ramp_registry(5, None);
    let mut scheduler = Scheduler::new(SchedulerConfig {
        max_voices: Some(1),
        ..SchedulerConfig::default()
    });
    scheduler.add_event(Event::held(1, 1));
    let mut restart = Event::held(1, 1);
    restart.kind = EventKind::Restart;
    restart.start = 3;
    scheduler.add_event(restart);
    let recorder = Recorder::default();
    recorder.attach(&mut scheduler);

    scheduler.run(&mut registry, 0, 5, RunMode::PERFORM);

    assert_eq!(recorder.count(Lifecycle::VoiceRejected), 0);
    assert_eq!(recorder.ticks_of_id(Lifecycle::VoiceStarted, 1), vec![0, 3]);
    assert_eq!(scheduler.voices().state(1), Some(seqcore::VoiceState::On));
}

#[test]
fn test_tick_callback_cadence() {
    let mut registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    scheduler.set_tick_callback(100, move |ticks| sink.lock().push(ticks));

    scheduler.run(&mut registry, 0, 1000, RunMode::LIVE);

    let expected: Vec<u64> = (1..=10).map(|n| n * 100).collect();
    assert_eq!(*seen.lock(), expected);
}

#[test]
fn test_immediate_events_during_perform() {
    let registry = ramp_registry(0, None);
    let mut scheduler = Scheduler::default();
    scheduler.add_event(Event::note(1, 1, 0, 10));

    let engine = spawn_engine(scheduler, registry, 0, 0, RunMode::PERFORM).unwrap();
    engine.push_event(Event::held(50, 1));
    let updates = engine.updates().clone();

    let mut started = false;
    for _ in 0..5000 {
        if updates.try_iter().any(|u| {
            matches!(
                u,
                seqcore::EngineUpdate::Lifecycle {
                    what: Lifecycle::VoiceStarted,
                    id: Some(50),
                    ..
                }
            )
        }) {
            started = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(started);

    engine.push_event(Event::stop(50, 0));
    engine.halt();
    let (_, _, summary) = engine.join().unwrap();
    assert_eq!(summary.reason, StopReason::Halted);
    assert!(summary.ticks > 0);
}
