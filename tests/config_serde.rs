use halo_sync::{
    algs::HaloConfig,
    geometry::IndexBox,
    layout::VecLayout,
    sync::{ConnectionConfig, FiringRule, LocalConnection},
};
use std::time::Duration;

#[test]
fn halo_config_round_trips_through_json() {
    let cfg = HaloConfig {
        n_grow: [2, 2, 0],
        n_comp: 3,
        workers: 4,
        firing_rule: FiringRule::ReceiveOnly,
        epoch_deadline: Some(Duration::from_millis(250)),
    };
    let json = serde_json::to_string(&cfg).unwrap();
    let back: HaloConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cfg);
    back.validate().unwrap();

    let send_only = HaloConfig {
        firing_rule: FiringRule::SendOnly,
        ..back
    };
    assert!(send_only.validate().is_err());
}

#[test]
fn connection_config_builds_barrier() {
    let cfg: ConnectionConfig =
        serde_json::from_str(r#"{"firing_rule":"ReceiveOnly","barrier_participants":2}"#).unwrap();
    let c = LocalConnection::from_config(&cfg).unwrap();
    assert_eq!(c.firing_rule(), FiringRule::ReceiveOnly);
    assert_eq!(c.barrier().map(|b| b.participants()), Some(2));

    let zero = ConnectionConfig {
        barrier_participants: Some(0),
        ..ConnectionConfig::default()
    };
    assert!(LocalConnection::from_config(&zero).is_err());
}

#[test]
fn layout_round_trips_through_json() {
    let l = VecLayout::tiled(IndexBox::new([0, 0, 0], [7, 3, 0]), [4, 4, 1]);
    let json = serde_json::to_string(&l).unwrap();
    assert_eq!(serde_json::from_str::<VecLayout>(&json).unwrap(), l);
}
