//! Controller and target runtimes talking through a real hub.

use std::sync::Arc;
use std::time::Duration;

use remote_client::connection::HubEndpoint;
use remote_client::controller::ControllerEvent;
use remote_client::mirror::Freshness;
use remote_client::player::SimulatedPlayer;
use remote_client::runtime::{self, ControllerView, TargetNotice, UiUpdate};
use remote_client::target::Executor;
use remote_hub::core::HubCore;
use remote_hub::http::{self, HttpState};
use remote_hub::identity::StaticIdentity;
use remote_proto::config::ClientConfig;
use remote_proto::protocol::{Command, DeviceId};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn start_hub() -> String {
    let identity = StaticIdentity::default();
    identity.insert("phone", 7, "Phone");
    identity.insert("tv", 7, "Living Room TV");

    let (hub, _task) = HubCore::spawn();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::serve(
        listener,
        HttpState {
            hub,
            identity: Arc::new(identity),
        },
    ));
    format!("http://{}", addr)
}

fn client_config() -> ClientConfig {
    ClientConfig {
        reconnect_delay_ms: 100,
        ..ClientConfig::default()
    }
}

async fn wait_for<T: std::fmt::Debug>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    within: Duration,
    mut accept: impl FnMut(&T) -> bool,
) -> T {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let item = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        if accept(&item) {
            return item;
        }
    }
}

fn view(update: &UiUpdate) -> Option<&ControllerView> {
    match update {
        UiUpdate::View(view) => Some(view),
        _ => None,
    }
}

#[tokio::test]
async fn controller_drives_simulated_target() {
    let base = start_hub().await;
    let cancel = CancellationToken::new();

    let (notice_tx, mut notices) = mpsc::unbounded_channel();
    let target = tokio::spawn(runtime::run_target(
        HubEndpoint::new(&base, "tv"),
        client_config(),
        Executor::new(SimulatedPlayer::new(), Duration::from_millis(1000)),
        notice_tx,
        cancel.clone(),
    ));

    let (input, input_rx) = mpsc::unbounded_channel();
    let (ui_tx, mut ui) = mpsc::unbounded_channel();
    let controller = tokio::spawn(runtime::run_controller(
        HubEndpoint::new(&base, "phone"),
        client_config(),
        input_rx,
        ui_tx,
        cancel.clone(),
    ));

    wait_for(&mut ui, Duration::from_secs(2), |u| {
        view(u).is_some_and(|v| v.phase == "device-listing")
    })
    .await;

    // Ask until the target has registered with the hub.
    let tv = DeviceId::from_token("tv");
    let mut listed = false;
    for _ in 0..50 {
        input.send(ControllerEvent::RefreshDevices).unwrap();
        let update = wait_for(&mut ui, Duration::from_secs(2), |u| {
            matches!(u, UiUpdate::Devices(_))
        })
        .await;
        if let UiUpdate::Devices(devices) = update {
            if devices.iter().any(|d| d.device_id == tv) {
                listed = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(listed, "target never showed up in the device list");

    input.send(ControllerEvent::SelectDevice(tv.clone())).unwrap();
    let paired = wait_for(&mut ui, Duration::from_secs(2), |u| {
        view(u).is_some_and(|v| v.phase == "paired")
    })
    .await;
    assert_eq!(
        view(&paired).unwrap().device_name.as_deref(),
        Some("Living Room TV")
    );
    wait_for(&mut notices, Duration::from_secs(2), |n| {
        matches!(n, TargetNotice::RemoteConnected(name) if name == "Phone")
    })
    .await;

    // Play: the target's own snapshot (it carries a thumbnail) comes back.
    input
        .send(ControllerEvent::Issue(Command::Play {
            video_id: "abc123".into(),
            title: None,
            channel: None,
            duration: Some(120.0),
            start_time: None,
            playlist_id: None,
        }))
        .unwrap();
    let playing = wait_for(&mut ui, Duration::from_secs(1), |u| {
        view(u).is_some_and(|v| {
            v.freshness == Some(Freshness::Live)
                && v.state.as_ref().is_some_and(|s| {
                    s.video_id.as_deref() == Some("abc123")
                        && s.thumbnail.is_some()
                        && !s.paused
                })
        })
    })
    .await;
    assert_eq!(view(&playing).unwrap().state.as_ref().unwrap().duration, 120.0);

    // Seek: the target clamps and reports the new position.
    input
        .send(ControllerEvent::Issue(Command::Seek { time: 42.0 }))
        .unwrap();
    let published = wait_for(&mut notices, Duration::from_secs(1), |n| {
        matches!(n, TargetNotice::Published(s) if (s.current_time - 42.0).abs() < 1.0)
    })
    .await;
    let TargetNotice::Published(state) = published else {
        unreachable!()
    };
    assert_eq!(state.duration, 120.0);

    wait_for(&mut ui, Duration::from_secs(1), |u| {
        view(u).is_some_and(|v| {
            v.state
                .as_ref()
                .is_some_and(|s| s.thumbnail.is_some() && (s.current_time - 42.0).abs() < 1.0)
        })
    })
    .await;

    // Quitting the controller releases the target.
    drop(input);
    controller.await.unwrap().unwrap();
    wait_for(&mut notices, Duration::from_secs(2), |n| {
        matches!(n, TargetNotice::RemoteDisconnected)
    })
    .await;

    cancel.cancel();
    let executor = target.await.unwrap().unwrap();
    assert_eq!(
        executor.engine().state().video_id.as_deref(),
        Some("abc123")
    );
}
