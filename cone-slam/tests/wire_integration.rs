//! Configuration files and the inbound message path.
//!
//! Run with: `cargo test --test wire_integration`

mod common;

use std::fs;

use clap::Parser;
use cone_slam::config::Args;
use cone_slam::engine::slam::ConePart;
use cone_slam::io::{Envelope, Route, Router};
use cone_slam::{SlamConfig, SlamError};
use tempfile::TempDir;

use common::*;

const BASE_ARGS: [&str; 11] = [
    "cone-slam",
    "--cid",
    "111",
    "--id",
    "120",
    "--detectConeId",
    "118",
    "--estimationId",
    "114",
    "--stateMachineId",
    "1401",
];

#[test]
fn test_cli_overrides_toml_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("cone-slam.toml");
    fs::write(
        &file,
        r#"
[reference]
latitude = 57.71
longitude = 11.95

[matcher]
new_cone_threshold = 0.8
cone_mapping_threshold = 40.0

[output]
cones_per_packet = 10

[persistence]
localization = true
"#,
    )
    .unwrap();

    let mut argv = BASE_ARGS.to_vec();
    let path = file.to_str().unwrap().to_string();
    argv.extend(["--config", path.as_str(), "--conesPerPacket", "5"]);
    let args = Args::try_parse_from(argv).unwrap();
    let config = SlamConfig::from_args(&args).unwrap();

    // File values survive where the command line is silent
    assert_eq!(config.reference.latitude, 57.71);
    assert_eq!(config.matcher.new_cone_threshold, 0.8);
    assert_eq!(config.matcher.cone_mapping_threshold, 40.0);
    assert!(config.persistence.localization);
    // Command line wins
    assert_eq!(config.output.cones_per_packet, 5);
    assert_eq!(config.session.detect_cone_id, 118);
    // Untouched sections keep defaults
    assert_eq!(config.session.port, 12175);
    assert_eq!(config.collector.gathering_time_ms, 10);
}

#[test]
fn test_broken_toml_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("broken.toml");
    fs::write(&file, "[matcher\nnew_cone_threshold = ").unwrap();

    match SlamConfig::load(&file) {
        Err(SlamError::Config(_)) => {}
        other => panic!("expected config error, got {:?}", other.map(|_| ())),
    }
    assert!(SlamConfig::load(&dir.path().join("missing.toml")).is_err());
}

#[test]
fn test_datagrams_drive_slam_inputs() {
    let mut config = test_config();
    config.session.detect_cone_id = 118;
    config.session.estimation_id = 114;
    let (slam, _events) = new_slam(config);
    let router = Router::new(&slam.config().session);

    let datagrams: [&[u8]; 4] = [
        br#"{"sender_stamp":114,"sample_time_us":0,
            "message":{"type":"Geolocation","latitude":57.7,"longitude":11.9,"heading":0.0}}"#,
        br#"{"sender_stamp":118,"sample_time_us":10,
            "message":{"type":"ObjectDirection","object_id":0,"azimuth_angle":0.0,"zenith_angle":0.0}}"#,
        br#"{"sender_stamp":118,"sample_time_us":10,
            "message":{"type":"ObjectDistance","object_id":0,"distance":5.0}}"#,
        br#"{"sender_stamp":118,"sample_time_us":10,
            "message":{"type":"ObjectType","object_id":0,"type_id":1}}"#,
    ];

    for datagram in datagrams {
        let envelope = Envelope::decode(datagram).unwrap();
        match router.route(envelope) {
            Some(Route::Pose {
                fix,
                sample_time_us,
            }) => slam.next_pose(fix, sample_time_us),
            Some(Route::ConePart {
                object_id,
                part,
                sample_time_us,
            }) => {
                assert!(matches!(
                    part,
                    ConePart::Direction { .. } | ConePart::Distance(_) | ConePart::Type(_)
                ));
                assert!(slam.push_cone_part(sample_time_us, object_id, part).is_none());
            }
            other => panic!("unexpected route {:?}", other),
        }
    }

    assert!(slam.initialize_module());

    let frame = slam
        .poll_cone_buffer(std::time::Instant::now() + std::time::Duration::from_secs(1))
        .expect("quiet stream completes the frame");
    assert_eq!(frame.cones.len(), 1);

    let result = slam.receive_combined_message(frame).unwrap();
    assert_eq!(result.new_cones, 1);
    let cone = &slam.draw_cones()[0];
    assert!((cone.position.x - 5.0).abs() < 1e-9);
    assert!(cone.position.y.abs() < 1e-9);
}

#[test]
fn test_foreign_sender_is_ignored() {
    let mut config = test_config();
    config.session.estimation_id = 114;
    let router = Router::new(&config.session);
    let datagram = br#"{"sender_stamp":999,"sample_time_us":0,
        "message":{"type":"GroundSpeed","ground_speed":3.0}}"#;
    let envelope = Envelope::decode(datagram).unwrap();
    assert!(router.route(envelope).is_none());
}
