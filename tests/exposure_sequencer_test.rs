//! Exposure sequencing against the simulated driver.
//!
//! Verifies call ordering, short-circuiting on each failure point, binning
//! resolution and promise pairing through the driver call journal.

use dfcore::driver::sim::{DriverCall, SimBackend, SimConfig, SimFaults, SimProbe};
use dfcore::driver::SensorSetting;
use dfcore::error::CoreError;
use dfcore::exposure::{ExposureRequest, ExposureResult, ExposureSequencer, PollPolicy};
use dfcore::session::GatewaySession;
use std::time::Duration;
use tokio::time::Instant;

async fn expose(backend: &SimBackend, request: ExposureRequest) -> Result<ExposureResult, CoreError> {
    let session = GatewaySession::open(backend)?;
    let camera = session.discover_camera()?;
    let sensor = camera.acquire_sensor()?;
    ExposureSequencer::default()
        .run(&camera, &sensor, &request)
        .await
}

fn position(calls: &[DriverCall], predicate: impl Fn(&DriverCall) -> bool) -> Option<usize> {
    calls.iter().position(predicate)
}

fn is_subframe(call: &DriverCall) -> bool {
    matches!(call, DriverCall::SetSubframe(_))
}

fn is_start(call: &DriverCall) -> bool {
    matches!(call, DriverCall::StartExposure(_))
}

fn is_status(call: &DriverCall) -> bool {
    matches!(call, DriverCall::QueryStatus)
}

fn is_download(call: &DriverCall) -> bool {
    matches!(call, DriverCall::StartDownload)
}

fn assert_settled(probe: &SimProbe) {
    assert_eq!(probe.outstanding_promises(), 0, "every promise is released");
    assert_eq!(probe.count(|c| *c == DriverCall::CloseGateway), 1);
}

#[tokio::test]
async fn test_unbinned_exposure_full_sequence() {
    let backend = SimBackend::new(SimConfig::instant());
    let probe = backend.probe();

    let result = expose(&backend, ExposureRequest::new(1.0)).await.unwrap();

    assert_eq!((result.width, result.height), (1024, 1024));
    assert_eq!(result.element_count(), 1024 * 1024);
    assert!(result.frame_type.is_light());

    let calls = probe.calls();
    let subframe = position(&calls, is_subframe).unwrap();
    let start = position(&calls, is_start).unwrap();
    let status = position(&calls, is_status).unwrap();
    let download = position(&calls, is_download).unwrap();
    let take = position(&calls, |c| *c == DriverCall::TakeImage).unwrap();
    assert!(subframe < start && start < status && status < download && download < take);
    assert_settled(&probe);
}

#[tokio::test]
async fn test_unbinned_never_touches_on_chip_binning() {
    for on_chip_binning in [true, false] {
        let backend = SimBackend::new(SimConfig {
            on_chip_binning,
            ..SimConfig::instant()
        });
        let probe = backend.probe();

        expose(&backend, ExposureRequest::new(1.0)).await.unwrap();

        assert_eq!(probe.count(|c| *c == DriverCall::QueryCapability), 0);
        assert_eq!(probe.count(|c| matches!(c, DriverCall::SetSetting(..))), 0);
        let calls = probe.calls();
        let Some(DriverCall::SetSubframe(subframe)) = calls.iter().find(|c| is_subframe(c)) else {
            panic!("subframe was not configured");
        };
        assert_eq!((subframe.bin_x, subframe.bin_y), (1, 1));
        assert_settled(&probe);
    }
}

#[tokio::test]
async fn test_binning_without_capability_has_no_side_effects() {
    let backend = SimBackend::new(SimConfig {
        on_chip_binning: false,
        ..SimConfig::instant()
    });
    let probe = backend.probe();

    let err = expose(&backend, ExposureRequest::new(1.0).binning(2, 1))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::BinningUnsupported { bin_x: 2, bin_y: 1 }));
    assert_eq!(probe.count(|c| *c == DriverCall::QueryCapability), 1);
    assert_eq!(probe.count(is_subframe), 0);
    assert_eq!(probe.count(is_start), 0);
    assert_eq!(probe.count(is_download), 0);
    assert_eq!(probe.count(|c| matches!(c, DriverCall::SetSetting(..))), 0);
    assert_settled(&probe);
}

#[tokio::test]
async fn test_binning_with_capability_goes_on_chip() {
    let backend = SimBackend::new(SimConfig::instant());
    let probe = backend.probe();

    let result = expose(&backend, ExposureRequest::new(1.0).binning(2, 4))
        .await
        .unwrap();

    let calls = probe.calls();
    let setting = position(&calls, |c| {
        *c == DriverCall::SetSetting(SensorSetting::UseOnChipBinning, 1)
    })
    .unwrap();
    let subframe_at = position(&calls, is_subframe).unwrap();
    assert!(setting < subframe_at);

    let Some(DriverCall::SetSubframe(subframe)) = calls.get(subframe_at) else {
        panic!("subframe was not configured");
    };
    assert_eq!((subframe.bin_x, subframe.bin_y), (1, 1));
    assert_eq!((subframe.width, subframe.height), (1024, 1024));

    let Some(DriverCall::StartExposure(options)) = calls.iter().find(|c| is_start(c)) else {
        panic!("exposure was not started");
    };
    assert_eq!((options.bin_x, options.bin_y), (2, 4));
    assert!(!options.use_rbi_preflash);
    assert!(!options.use_ext_trigger);

    assert_eq!((result.bin_x, result.bin_y), (2, 4));
    assert_eq!((result.width, result.height), (512, 256));
    assert_settled(&probe);
}

#[tokio::test]
async fn test_duration_below_minimum_is_raised() {
    let backend = SimBackend::new(SimConfig {
        min_exposure_duration: 0.5,
        ..SimConfig::instant()
    });
    let probe = backend.probe();

    let result = expose(&backend, ExposureRequest::new(0.1)).await.unwrap();

    let calls = probe.calls();
    let Some(DriverCall::StartExposure(options)) = calls.iter().find(|c| is_start(c)) else {
        panic!("exposure was not started");
    };
    assert_eq!(options.duration, 0.5);
    assert!((result.exposure_duration - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_dark_frame_reaches_driver_and_result() {
    let backend = SimBackend::new(SimConfig::instant());
    let probe = backend.probe();

    let result = expose(&backend, ExposureRequest::new(1.0).dark()).await.unwrap();

    let calls = probe.calls();
    let Some(DriverCall::StartExposure(options)) = calls.iter().find(|c| is_start(c)) else {
        panic!("exposure was not started");
    };
    assert!(!options.is_light_frame);
    assert!(!result.frame_type.is_light());
}

#[tokio::test]
async fn test_polling_stops_at_first_ready_report() {
    let backend = SimBackend::new(SimConfig {
        busy_polls: 3,
        ..SimConfig::instant()
    });
    let probe = backend.probe();

    expose(&backend, ExposureRequest::new(1.0)).await.unwrap();

    // three busy reports, then ready
    assert_eq!(probe.count(is_status), 4);
    let calls = probe.calls();
    let download = position(&calls, is_download).unwrap();
    assert!(calls[download..].iter().all(|c| !is_status(c)));
    assert_settled(&probe);
}

#[tokio::test(start_paused = true)]
async fn test_polling_with_interval_still_waits_for_ready() {
    let backend = SimBackend::new(SimConfig {
        busy_polls: 2,
        ..SimConfig::instant()
    });
    let probe = backend.probe();
    let session = GatewaySession::open(&backend).unwrap();
    let camera = session.discover_camera().unwrap();
    let sensor = camera.acquire_sensor().unwrap();

    let interval = Duration::from_secs(10);
    let sequencer = ExposureSequencer::new(PollPolicy { interval });
    let started = Instant::now();
    sequencer
        .run(&camera, &sensor, &ExposureRequest::new(1.0))
        .await
        .unwrap();

    // two busy reports, one pause after each, none after ready
    assert_eq!(probe.count(is_status), 3);
    let waited = started.elapsed();
    assert!(waited >= interval * 2);
    assert!(waited < interval * 3);
}

#[tokio::test]
async fn test_status_failure_propagates_without_retry() {
    let backend = SimBackend::new(SimConfig {
        busy_polls: 10,
        ..SimConfig::instant()
    })
    .with_faults(SimFaults {
        query_status_after: Some((2, "camera link lost".to_string())),
        ..SimFaults::default()
    });
    let probe = backend.probe();

    let err = expose(&backend, ExposureRequest::new(1.0)).await.unwrap_err();

    assert!(matches!(&err, CoreError::StatusQueryFailed(msg) if msg == "camera link lost"));
    assert_eq!(probe.count(is_status), 3);
    assert_eq!(probe.count(is_download), 0);
    assert_settled(&probe);
}

#[tokio::test]
async fn test_subframe_failure_never_starts_exposure() {
    let backend = SimBackend::new(SimConfig::instant()).with_faults(SimFaults {
        set_subframe: Some("invalid region".to_string()),
        ..SimFaults::default()
    });
    let probe = backend.probe();

    let err = expose(&backend, ExposureRequest::new(1.0)).await.unwrap_err();

    assert!(matches!(&err, CoreError::SubframeConfigFailed(msg) if msg == "invalid region"));
    assert_eq!(probe.count(is_start), 0);
    assert_eq!(probe.count(is_status), 0);
    assert_settled(&probe);
}

#[tokio::test]
async fn test_start_failure_issues_no_further_calls() {
    let backend = SimBackend::new(SimConfig::instant()).with_faults(SimFaults {
        start_exposure: Some("shutter fault".to_string()),
        ..SimFaults::default()
    });
    let probe = backend.probe();

    let err = expose(&backend, ExposureRequest::new(1.0)).await.unwrap_err();

    assert!(matches!(&err, CoreError::ExposureStartFailed(msg) if msg == "shutter fault"));
    let calls = probe.calls();
    let start = position(&calls, is_start).unwrap();
    assert_eq!(calls[start + 1..], [DriverCall::CloseGateway]);
    assert_settled(&probe);
}

#[tokio::test]
async fn test_download_failure() {
    let backend = SimBackend::new(SimConfig::instant()).with_faults(SimFaults {
        start_download: Some("transfer aborted".to_string()),
        ..SimFaults::default()
    });
    let probe = backend.probe();

    let err = expose(&backend, ExposureRequest::new(1.0)).await.unwrap_err();

    assert!(matches!(&err, CoreError::DownloadFailed(msg) if msg == "transfer aborted"));
    assert_eq!(probe.count(|c| *c == DriverCall::TakeImage), 0);
    assert_settled(&probe);
}

#[tokio::test]
async fn test_download_without_image_fails() {
    let backend = SimBackend::new(SimConfig::instant()).with_faults(SimFaults {
        lose_image: true,
        ..SimFaults::default()
    });

    let err = expose(&backend, ExposureRequest::new(1.0)).await.unwrap_err();
    assert!(matches!(err, CoreError::DownloadFailed(_)));
}

#[tokio::test]
async fn test_info_query_failure_stops_before_configuration() {
    let backend = SimBackend::new(SimConfig::instant()).with_faults(SimFaults {
        query_info: Some("sensor busy".to_string()),
        ..SimFaults::default()
    });
    let probe = backend.probe();

    let err = expose(&backend, ExposureRequest::new(1.0)).await.unwrap_err();

    assert!(matches!(&err, CoreError::DeviceQueryFailed(msg) if msg == "sensor busy"));
    assert_eq!(probe.count(is_subframe), 0);
    assert_settled(&probe);
}

#[tokio::test]
async fn test_capability_query_failure() {
    let backend = SimBackend::new(SimConfig::instant()).with_faults(SimFaults {
        query_capability: Some("not supported by firmware".to_string()),
        ..SimFaults::default()
    });
    let probe = backend.probe();

    let err = expose(&backend, ExposureRequest::new(1.0).binning(2, 2))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::DeviceQueryFailed(_)));
    assert_eq!(probe.count(is_subframe), 0);
    assert_settled(&probe);
}

#[tokio::test]
async fn test_binning_above_maximum_is_left_to_the_driver() {
    let backend = SimBackend::new(SimConfig {
        max_bin_x: 4,
        max_bin_y: 4,
        ..SimConfig::instant()
    });
    let probe = backend.probe();

    let err = expose(&backend, ExposureRequest::new(1.0).binning(8, 1))
        .await
        .unwrap_err();

    assert!(matches!(&err, CoreError::ExposureStartFailed(msg) if msg.contains("exceeds")));
    assert_eq!(
        probe.count(|c| *c == DriverCall::SetSetting(SensorSetting::UseOnChipBinning, 1)),
        1
    );
    let calls = probe.calls();
    let Some(DriverCall::StartExposure(options)) = calls.iter().find(|c| is_start(c)) else {
        panic!("exposure was not started");
    };
    assert_eq!((options.bin_x, options.bin_y), (8, 1));
    assert_eq!(probe.count(is_status), 0);
    assert_settled(&probe);
}

#[tokio::test]
async fn test_with_latency_each_promise_is_released() {
    let backend = SimBackend::new(SimConfig {
        latency_ms: 1,
        time_scale: 0.0,
        busy_polls: 2,
        ..SimConfig::default()
    });
    let probe = backend.probe();

    expose(&backend, ExposureRequest::new(1.0).binning(2, 2))
        .await
        .unwrap();
    assert_settled(&probe);
}
