use super::*;
use crate::chunked::StreamableBuffer;
use crate::config::{CaptureConfig, ChannelConfig};
use crate::robot::{HumanHandle, HumanInfo, Picture};
use futures_util::{SinkExt, StreamExt};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

/// Robot that records every action it is asked to perform.
#[derive(Default)]
struct RecordingRobot {
    actions: Mutex<Vec<String>>,
    fail_speech: bool,
}

impl RecordingRobot {
    fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }

    fn record(&self, action: String) {
        self.actions.lock().unwrap().push(action);
    }
}

#[async_trait]
impl RobotActions for RecordingRobot {
    async fn say(&self, text: &str) -> Result<(), RobotError> {
        self.record(format!("say:{text}"));
        if self.fail_speech { Err(RobotError::Failed("speaker muted".into())) } else { Ok(()) }
    }

    async fn say_with_animation(&self, text: &str) -> Result<(), RobotError> {
        self.record(format!("say_animated:{text}"));
        Ok(())
    }

    async fn animate(&self, animation: &str) -> Result<(), RobotError> {
        self.record(format!("animate:{animation}"));
        Ok(())
    }

    async fn go_to(&self, x: f64, y: f64, theta: f64) -> Result<(), RobotError> {
        self.record(format!("goto:{x},{y},{theta}"));
        Ok(())
    }

    async fn engage(&self, human: &HumanHandle) -> Result<(), RobotError> {
        self.record(format!("engage:{}", human.0));
        Ok(())
    }

    async fn take_picture(&self) -> Result<Picture, RobotError> {
        Ok(Picture { captured_at_ms: 1_700_000_000_000, data: Arc::new(StreamableBuffer::from_vec(vec![7; 300])) })
    }

    async fn humans_around(&self) -> Result<Vec<HumanInfo>, RobotError> {
        Ok(Vec::new())
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/pepper", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (tcp, _) = timeout(WAIT, listener.accept()).await.expect("no connection").unwrap();
    tokio_tungstenite::accept_async(tcp).await.unwrap()
}

fn link_config(url: &str, fps: u32) -> LinkConfig {
    LinkConfig {
        channel: ChannelConfig::with_url(url),
        capture: CaptureConfig { target_fps: fps },
        chunk_size: 128,
    }
}

/// Next text message of `kind`, skipping everything else.
async fn next_of_kind(ws: &mut ServerSocket, kind: Kind) -> Message {
    loop {
        match timeout(WAIT, ws.next()).await.expect("server read timed out") {
            Some(Ok(WsMessage::Text(text))) => {
                let message = frames::decode_message(text.as_str()).unwrap();
                if message.kind() == &kind {
                    return message;
                }
            }
            Some(Ok(_)) => {}
            other => panic!("connection ended while waiting for {kind}: {other:?}"),
        }
    }
}

async fn send_text(ws: &mut ServerSocket, text: &str) {
    ws.send(WsMessage::Text(text.to_owned().into())).await.unwrap();
}

async fn wait_for(robot: &RecordingRobot, action: &str) {
    let found = timeout(WAIT, async {
        while !robot.actions().iter().any(|a| a == action) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(found.is_ok(), "robot never performed {action}, saw {:?}", robot.actions());
}

#[tokio::test]
async fn announces_robot_on_connect() {
    let (listener, url) = bind().await;
    let _bridge = Bridge::start(link_config(&url, 1), Arc::new(RecordingRobot::default())).unwrap();
    let mut ws = accept(&listener).await;

    let info = next_of_kind(&mut ws, Kind::RobotInfo).await;

    assert_eq!(info.str_field("name"), Some("Pepper"));
    assert_eq!(info.str_field("version"), Some("1.0"));
    assert_eq!(info.payload()["capabilities"], serde_json::json!(["speech", "human_awareness"]));
    assert!(info.payload().contains_key("timestamp"));
}

#[tokio::test]
async fn say_command_reports_status_around_speech() {
    let (listener, url) = bind().await;
    let robot = Arc::new(RecordingRobot::default());
    let _bridge = Bridge::start(link_config(&url, 1), robot.clone()).unwrap();
    let mut ws = accept(&listener).await;
    next_of_kind(&mut ws, Kind::RobotInfo).await;

    send_text(&mut ws, r#"{"type":"command","action":"say","text":"hello","with_animation":true}"#).await;

    let started = next_of_kind(&mut ws, Kind::CommandStatus).await;
    assert_eq!(started.str_field("status"), Some("started"));
    assert_eq!(started.str_field("text"), Some("hello"));
    assert_eq!(started.action(), Some("say"));

    let completed = next_of_kind(&mut ws, Kind::CommandStatus).await;
    assert_eq!(completed.str_field("status"), Some("completed"));
    assert_eq!(robot.actions(), vec!["say_animated:hello"]);
}

#[tokio::test]
async fn failed_speech_reports_error_status() {
    let (listener, url) = bind().await;
    let robot = Arc::new(RecordingRobot { fail_speech: true, ..RecordingRobot::default() });
    let _bridge = Bridge::start(link_config(&url, 1), robot).unwrap();
    let mut ws = accept(&listener).await;
    next_of_kind(&mut ws, Kind::RobotInfo).await;

    send_text(&mut ws, r#"{"type":"command","action":"say","text":"anyone?"}"#).await;

    assert_eq!(next_of_kind(&mut ws, Kind::CommandStatus).await.str_field("status"), Some("started"));
    assert_eq!(next_of_kind(&mut ws, Kind::CommandStatus).await.str_field("status"), Some("error"));
}

#[tokio::test]
async fn speech_and_legacy_speak_reach_the_robot() {
    let (listener, url) = bind().await;
    let robot = Arc::new(RecordingRobot::default());
    let _bridge = Bridge::start(link_config(&url, 1), robot.clone()).unwrap();
    let mut ws = accept(&listener).await;
    next_of_kind(&mut ws, Kind::RobotInfo).await;

    send_text(&mut ws, r#"{"type":"speech","action":"say","text":"from server"}"#).await;
    send_text(&mut ws, r#"{"type":"speak","text":"old style"}"#).await;

    wait_for(&robot, "say:old style").await;
    assert_eq!(robot.actions(), vec!["say_animated:from server", "say:old style"]);
}

#[tokio::test]
async fn motion_commands_run_in_order() {
    let (listener, url) = bind().await;
    let robot = Arc::new(RecordingRobot::default());
    let _bridge = Bridge::start(link_config(&url, 1), robot.clone()).unwrap();
    let mut ws = accept(&listener).await;
    next_of_kind(&mut ws, Kind::RobotInfo).await;

    send_text(&mut ws, r#"{"type":"command","action":"animate","animation":"dance"}"#).await;
    send_text(&mut ws, r#"{"type":"command","action":"fly"}"#).await;
    send_text(&mut ws, r#"{"type":"command","action":"goto","x":1,"y":0.5,"theta":0}"#).await;

    wait_for(&robot, "goto:1,0.5,0").await;
    assert_eq!(robot.actions(), vec!["animate:dance", "goto:1,0.5,0"]);
}

#[tokio::test]
async fn captured_frames_are_sent_with_timestamp() {
    let (listener, url) = bind().await;
    let _bridge = Bridge::start(link_config(&url, 20), Arc::new(RecordingRobot::default())).unwrap();
    let mut ws = accept(&listener).await;

    let binary = loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(WsMessage::Binary(bytes))) => break bytes,
            Some(Ok(_)) => {}
            other => panic!("connection ended: {other:?}"),
        }
    };
    assert_eq!(binary.len(), 300);

    let stamp = next_of_kind(&mut ws, Kind::FrameTimestamp).await;
    assert_eq!(stamp.payload()["size"], serde_json::json!(300));
    assert_eq!(stamp.payload()["timestamp"], serde_json::json!(1_700_000_000_000_i64));
}

#[tokio::test]
async fn config_message_moves_the_channel() {
    let (first, first_url) = bind().await;
    let (second, second_url) = bind().await;
    let bridge = Bridge::start(link_config(&first_url, 1), Arc::new(RecordingRobot::default())).unwrap();
    let mut old = accept(&first).await;
    next_of_kind(&mut old, Kind::RobotInfo).await;

    send_text(&mut old, &format!(r#"{{"type":"config","websocket_url":"{second_url}"}}"#)).await;

    let mut new = accept(&second).await;
    next_of_kind(&mut new, Kind::RobotInfo).await;
    assert_eq!(bridge.channel().url(), second_url);
}

#[tokio::test]
async fn report_speaker_sends_speaker_change() {
    let (listener, url) = bind().await;
    let bridge = Bridge::start(link_config(&url, 1), Arc::new(RecordingRobot::default())).unwrap();
    let mut ws = accept(&listener).await;
    next_of_kind(&mut ws, Kind::RobotInfo).await;

    let speaker = SpeakerProfile { gender: "female".into(), age: 34, emotion: "joyful".into() };
    bridge.report_speaker(&speaker).unwrap();

    let change = next_of_kind(&mut ws, Kind::SpeakerChange).await;
    assert_eq!(change.str_field("gender"), Some("female"));
    assert_eq!(change.payload()["age"], serde_json::json!(34));
    assert_eq!(change.str_field("emotion"), Some("joyful"));
}

#[tokio::test]
async fn shutdown_closes_and_releases() {
    let (listener, url) = bind().await;
    let bridge = Bridge::start(link_config(&url, 1), Arc::new(RecordingRobot::default())).unwrap();
    let mut ws = accept(&listener).await;
    next_of_kind(&mut ws, Kind::RobotInfo).await;

    bridge.shutdown();

    assert!(!bridge.focus().is_held());
    assert_eq!(bridge.capture().state(), crate::capture::CaptureState::Released);
    assert!(matches!(
        bridge.report_speaker(&SpeakerProfile { gender: "male".into(), age: 40, emotion: "calm".into() }),
        Err(ChannelError::NotConnected)
    ));
}
