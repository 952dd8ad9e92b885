use motion::loops::{PistonLoop, PoseLoop, PosePhase};
use motion::registry::{Capabilities, DeviceInfo, Signal};
use motion::state::{AnimationState, ControlState, PoseChange, PoseSender, pose_channel};
use motion::testing::RecordingActuator;
use motion::{ControlLoop, NoopActuator};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const STROKING: i64 = 7717404;
const DOGGY: i64 = 344055696;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

struct Rig {
    state: Arc<ControlState>,
    rec: Arc<RecordingActuator>,
    tx: PoseSender,
}

impl Rig {
    fn new() -> (Self, PoseLoop) {
        let state = Arc::new(ControlState::default());
        state.edit_registry(|r| {
            r.rebuild([DeviceInfo::new(0, "stroker", Capabilities::PISTON)]);
            r.select(Signal::Piston, 0).unwrap();
        });
        let rec = Arc::new(RecordingActuator::new());
        let (tx, rx) = pose_channel();
        let control = PoseLoop::new(state.clone(), rec.clone(), rx);
        (Self { state, rec, tx }, control)
    }

    fn animate(&self, hash: i64, progress: f64) {
        self.state.set_animation(AnimationState { hash, progress });
        self.tx.send(PoseChange { hash }).unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn fixed_cadence_alternates_on_half_cycles_for_slow_devices() {
    let (rig, control) = Rig::new();
    rig.state.edit_config(|c| c.set_low_rate_device(true));
    rig.animate(STROKING, 0.0);
    let task = tokio::spawn(control.run());
    sleep(ms(1000)).await;
    rig.state.request_shutdown();
    task.await.unwrap();

    let moves = rig.rec.positions();
    assert!(moves.len() >= 4);
    for (i, (p, d)) in moves.iter().enumerate() {
        let expected = if i % 2 == 0 { 0.6 } else { 0.2 };
        assert_eq!(*p, expected);
        assert_eq!(*d, ms(198));
    }
}

#[tokio::test(start_paused = true)]
async fn tracked_pose_follows_progress_inside_override_range() {
    let (rig, mut control) = Rig::new();
    rig.state.edit_config(|c| {
        c.set_pose_range(DOGGY, 0.1, 0.3);
    });
    rig.animate(DOGGY, 0.5);
    for _ in 0..60 {
        control.tick().await.unwrap();
    }
    assert_eq!(control.phase(), PosePhase::Running);
    let moves = rig.rec.positions();
    assert!(moves.iter().all(|(p, _)| (0.1..=0.3).contains(p)));
    assert_eq!(moves.last().map(|m| m.1), Some(ms(50)));
}

#[tokio::test(start_paused = true)]
async fn ended_pose_eases_home_and_then_goes_quiet() {
    let (rig, control) = Rig::new();
    rig.animate(DOGGY, 0.3);
    let task = tokio::spawn(control.run());
    sleep(ms(2000)).await;
    rig.animate(0, 0.0);
    sleep(ms(500)).await;
    assert!(rig.state.pose_homing());
    sleep(ms(6000)).await;

    let settled = rig.rec.positions();
    let (last, duration) = *settled.last().unwrap();
    assert!((last - 0.5).abs() <= 0.011);
    assert_eq!(duration, ms(200));
    assert!(!rig.state.pose_homing());

    sleep(ms(1000)).await;
    assert_eq!(rig.rec.positions().len(), settled.len());
    rig.state.request_shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn piston_resumes_only_after_the_pose_is_home() {
    let (rig, control) = Rig::new();
    rig.state.set_piston_mode(3);
    rig.animate(DOGGY, 0.3);
    let pose = tokio::spawn(control.run());
    let piston = tokio::spawn(PistonLoop::new(rig.state.clone(), rig.rec.clone()).run());
    sleep(ms(2000)).await;
    rig.state.set_pose_homing(true);
    rig.animate(0, 0.0);
    sleep(ms(8000)).await;
    rig.state.request_shutdown();
    pose.await.unwrap();
    piston.await.unwrap();

    let moves = rig.rec.positions();
    let first_stroke = moves
        .iter()
        .position(|&(_, d)| d == ms(400))
        .expect("piston never resumed");
    assert!(moves[..first_stroke].iter().any(|&(_, d)| d == ms(200)));
    assert!(moves[first_stroke..].iter().all(|&(_, d)| d == ms(400)));
    assert!(!rig.state.pose_homing());
}

#[tokio::test(start_paused = true)]
async fn climax_interrupts_pose_without_homing() {
    let (rig, mut control) = Rig::new();
    rig.animate(DOGGY, 0.3);
    for _ in 0..5 {
        control.tick().await.unwrap();
    }
    let before = rig.rec.positions().len();
    rig.animate(1514068739, 0.0);
    for _ in 0..5 {
        control.tick().await.unwrap();
    }
    assert_eq!(control.phase(), PosePhase::Inactive);
    assert_eq!(rig.rec.positions().len(), before);
}

#[tokio::test(start_paused = true)]
async fn no_piston_device_means_no_motion() {
    let state = Arc::new(ControlState::default());
    let (tx, rx) = pose_channel();
    let mut control = PoseLoop::new(state.clone(), Arc::new(NoopActuator), rx);
    state.set_animation(AnimationState {
        hash: DOGGY,
        progress: 0.0,
    });
    tx.send(PoseChange { hash: DOGGY }).unwrap();
    control.tick().await.unwrap();
    assert_eq!(control.position(), 0.5);
}
