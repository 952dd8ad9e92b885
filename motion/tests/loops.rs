use motion::loops::{ClimaxLoop, IdleLoop, PistonLoop, VibeLoop};
use motion::registry::{Capabilities, DeviceInfo, Signal};
use motion::state::{AnimationState, ControlState};
use motion::testing::{Command, RecordingActuator};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

const CLIMAX: i64 = 1514068739;
const DOGGY: i64 = 344055696;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn rig(caps: Capabilities, signals: &[Signal]) -> (Arc<ControlState>, Arc<RecordingActuator>) {
    let state = Arc::new(ControlState::default());
    state.edit_registry(|r| {
        r.rebuild([DeviceInfo::new(0, "device", caps)]);
        for &signal in signals {
            r.select(signal, 0).unwrap();
        }
    });
    (state, Arc::new(RecordingActuator::new()))
}

fn timeline(start: Instant, commands: &[Command]) -> Vec<(u128, f64, Duration)> {
    commands
        .iter()
        .filter_map(|c| {
            let (p, d) = c.position()?;
            Some(((c.at - start).as_millis(), p, d))
        })
        .collect()
}

fn set_hash(state: &ControlState, hash: i64) {
    state.set_animation(AnimationState {
        hash,
        progress: 0.0,
    });
}

#[tokio::test(start_paused = true)]
async fn piston_alternates_then_homes() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Piston]);
    let start = Instant::now();
    state.set_piston_mode(1);
    let task = tokio::spawn(PistonLoop::new(state.clone(), rec.clone()).run());

    sleep(ms(2800)).await;
    state.set_piston_mode(0);
    sleep(ms(1200)).await;
    state.request_shutdown();
    task.await.unwrap();

    assert_eq!(
        timeline(start, &rec.commands()),
        vec![
            (0, 0.8, ms(900)),
            (900, 0.0, ms(900)),
            (1800, 0.8, ms(900)),
            (2700, 0.0, ms(900)),
            (3600, 0.5, ms(700)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn piston_stands_down_for_pose() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Piston]);
    state.set_piston_mode(2);
    set_hash(&state, DOGGY);
    let task = tokio::spawn(PistonLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(2000)).await;
    state.request_shutdown();
    task.await.unwrap();
    assert!(rec.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn piston_waits_out_cooldown() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Piston]);
    let start = Instant::now();
    state.start_cooldown(start + ms(1500));
    state.set_piston_mode(1);
    let task = tokio::spawn(PistonLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(2050)).await;
    state.request_shutdown();
    task.await.unwrap();

    let strokes = timeline(start, &rec.commands());
    assert_eq!(strokes.first(), Some(&(1500, 0.8, ms(900))));
}

#[tokio::test(start_paused = true)]
async fn linked_ramp_rises_then_falls_within_one_interval_each() {
    let (state, rec) = rig(Capabilities::BOTH, &[Signal::Piston, Signal::Vibe]);
    state.set_piston_mode(2);
    state.set_vibe_mode(2);
    let task = tokio::spawn(VibeLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(975)).await;
    state.request_shutdown();
    task.await.unwrap();

    let levels = rec.intensities();
    assert_eq!(levels.len(), 20);
    let (up, down) = levels.split_at(10);
    assert!((up[0] - 0.6).abs() < 1e-9);
    assert!((up[9] - 1.0).abs() < 1e-9);
    assert!(up.windows(2).all(|w| w[0] <= w[1]));
    assert!((down[0] - 1.0).abs() < 1e-9);
    assert!((down[9] - 0.6).abs() < 1e-9);
    assert!(down.windows(2).all(|w| w[0] >= w[1]));
    let cmds = rec.commands();
    assert_eq!(cmds[1].at - cmds[0].at, ms(50));
}

#[tokio::test(start_paused = true)]
async fn linked_device_ramps_while_piston_loop_stands_down() {
    let (state, rec) = rig(Capabilities::BOTH, &[Signal::Piston, Signal::Vibe]);
    state.set_piston_mode(2);
    state.set_vibe_mode(1);
    let piston = tokio::spawn(PistonLoop::new(state.clone(), rec.clone()).run());
    let vibe = tokio::spawn(VibeLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(475)).await;
    state.request_shutdown();
    piston.await.unwrap();
    vibe.await.unwrap();

    assert!(rec.positions().is_empty());
    let levels = rec.intensities();
    assert_eq!(levels.len(), 10);
    assert!((levels[0] - 0.3).abs() < 1e-9);
    assert!((levels[9] - 0.5).abs() < 1e-9);
    assert!(levels.windows(2).all(|w| w[0] < w[1]));
    let cmds = rec.commands();
    assert!(cmds.windows(2).all(|w| w[1].at - w[0].at == ms(50)));
}

#[tokio::test(start_paused = true)]
async fn linked_device_holds_strength_without_piston_mode() {
    let (state, rec) = rig(Capabilities::BOTH, &[Signal::Piston, Signal::Vibe]);
    state.set_vibe_mode(1);
    let task = tokio::spawn(VibeLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(450)).await;
    state.request_shutdown();
    task.await.unwrap();
    assert_eq!(rec.intensities(), vec![0.5]);
}

#[tokio::test(start_paused = true)]
async fn vibe_only_resends_on_change_or_every_second() {
    let (state, rec) = rig(Capabilities::VIBE, &[Signal::Vibe]);
    let start = Instant::now();
    state.set_vibe_mode(1);
    let task = tokio::spawn(VibeLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(2450)).await;
    state.set_vibe_mode(2);
    sleep(ms(100)).await;
    state.request_shutdown();
    task.await.unwrap();

    let sent: Vec<(u128, f64)> = rec
        .commands()
        .iter()
        .map(|c| ((c.at - start).as_millis(), c.intensity().unwrap()))
        .collect();
    assert_eq!(sent, vec![(0, 0.5), (1000, 0.5), (2000, 0.5), (2500, 1.0)]);
}

#[tokio::test(start_paused = true)]
async fn piston_only_device_emulates_vibe() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Vibe]);
    let start = Instant::now();
    state.set_vibe_mode(2);
    let task = tokio::spawn(VibeLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(750)).await;
    state.set_vibe_mode(0);
    sleep(ms(500)).await;
    state.request_shutdown();
    task.await.unwrap();

    assert_eq!(
        timeline(start, &rec.commands()),
        vec![(0, 0.8, ms(400)), (400, 0.0, ms(400)), (800, 0.5, ms(700))]
    );
    assert!(rec.intensities().is_empty());
}

#[tokio::test(start_paused = true)]
async fn emulated_vibe_waits_for_pose_homing() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Vibe]);
    let start = Instant::now();
    state.set_pose_homing(true);
    state.set_vibe_mode(2);
    let task = tokio::spawn(VibeLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(950)).await;
    assert!(rec.commands().is_empty());
    state.set_pose_homing(false);
    sleep(ms(100)).await;
    state.request_shutdown();
    task.await.unwrap();

    assert_eq!(timeline(start, &rec.commands()), vec![(1000, 0.8, ms(400))]);
}

#[tokio::test(start_paused = true)]
async fn climax_plays_once_then_releases() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Piston]);
    set_hash(&state, CLIMAX);
    let task = tokio::spawn(ClimaxLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(5000)).await;

    let positions = rec.positions();
    assert_eq!(positions.len(), 11, "choreography plus six reverb pulses");
    assert_eq!(positions[0], (0.95, ms(150)));
    assert_eq!(positions[4], (0.5, ms(600)));
    let pulses = &positions[5..];
    assert!((pulses[0].0 - 0.65).abs() < 1e-9);
    assert!(pulses[1].0 < 0.5);
    assert!(pulses.windows(2).all(|w| w[1].1 <= w[0].1));

    set_hash(&state, 0);
    sleep(ms(200)).await;
    assert_eq!(rec.positions().last(), Some(&(0.5, ms(500))));
    assert!(state.device_busy());
    sleep(ms(1500)).await;
    assert!(!state.device_busy());

    state.request_shutdown();
    task.await.unwrap();
    assert_eq!(rec.positions().len(), 12);
}

#[tokio::test(start_paused = true)]
async fn low_rate_climax_skips_reverb() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Piston]);
    state.edit_config(|c| c.set_low_rate_device(true));
    set_hash(&state, CLIMAX);
    let task = tokio::spawn(ClimaxLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(4000)).await;
    state.request_shutdown();
    task.await.unwrap();
    assert_eq!(rec.positions().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn idle_settles_then_waves_inside_range() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Piston]);
    state.edit_config(|c| c.set_idle_motion(true));
    let start = Instant::now();
    let task = tokio::spawn(IdleLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(2050)).await;

    let moves = timeline(start, &rec.commands());
    assert_eq!(moves[0], (0, 0.4, ms(1000)));
    assert!(moves.len() > 10);
    for (at, p, d) in &moves[1..] {
        assert!(*at >= 1000);
        assert!((0.0..=0.8).contains(p));
        assert_eq!(*d, ms(100));
    }

    state.set_piston_mode(1);
    sleep(ms(150)).await;
    let frozen = rec.commands().len();
    sleep(ms(1000)).await;
    assert_eq!(rec.commands().len(), frozen);

    state.request_shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn low_rate_idle_alternates_ends() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Piston]);
    state.edit_config(|c| {
        c.set_idle_motion(true);
        c.set_low_rate_device(true);
    });
    let start = Instant::now();
    let task = tokio::spawn(IdleLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(6500)).await;
    state.request_shutdown();
    task.await.unwrap();

    assert_eq!(
        timeline(start, &rec.commands()),
        vec![
            (0, 0.0, ms(3000)),
            (3000, 0.8, ms(3000)),
            (6000, 0.0, ms(3000)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn idle_stays_off_when_disabled() {
    let (state, rec) = rig(Capabilities::PISTON, &[Signal::Piston]);
    let task = tokio::spawn(IdleLoop::new(state.clone(), rec.clone()).run());
    sleep(ms(2000)).await;
    state.request_shutdown();
    task.await.unwrap();
    assert!(rec.commands().is_empty());
}
