use super::*;

#[tokio::test]
async fn commands_reach_every_robot() {
    let state = AppState::new();
    let (tx_a, mut rx_a) = mpsc::channel(4);
    let (tx_b, mut rx_b) = mpsc::channel(4);
    state.add_robot(Uuid::new_v4(), tx_a).await;
    state.add_robot(Uuid::new_v4(), tx_b).await;

    let delivered = state.send_to_robots(r#"{"type":"command","action":"say","text":"hi"}"#).await;

    assert_eq!(delivered, 2);
    assert!(rx_a.recv().await.unwrap().contains("\"say\""));
    assert!(rx_b.recv().await.unwrap().contains("\"say\""));
}

#[tokio::test]
async fn no_robots_means_nothing_delivered() {
    let state = AppState::new();
    assert_eq!(state.send_to_robots("{}").await, 0);
}

#[tokio::test]
async fn removed_robot_stops_receiving() {
    let state = AppState::new();
    let robot_id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(4);
    state.add_robot(robot_id, tx).await;
    state.remove_robot(robot_id).await;

    assert_eq!(state.send_to_robots("{}").await, 0);
    assert!(state.robot_summaries().await.is_empty());
}

#[tokio::test]
async fn full_viewer_queue_is_skipped() {
    let state = AppState::new();
    let (slow_tx, _slow_rx) = mpsc::channel(1);
    let (fast_tx, mut fast_rx) = mpsc::channel(8);
    state.add_viewer(Uuid::new_v4(), slow_tx).await;
    state.add_viewer(Uuid::new_v4(), fast_tx).await;

    assert_eq!(state.relay_to_viewers(Relay::Text("one".into())).await, 2);
    assert_eq!(state.relay_to_viewers(Relay::Binary(Bytes::from_static(&[1, 2]))).await, 1);

    assert_eq!(fast_rx.recv().await, Some(Relay::Text("one".into())));
    assert_eq!(fast_rx.recv().await, Some(Relay::Binary(Bytes::from_static(&[1, 2]))));
}

#[tokio::test]
async fn summaries_carry_info_and_frame_counts() {
    let state = AppState::new();
    let robot_id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(4);
    state.add_robot(robot_id, tx).await;

    let mut info = Payload::new();
    info.insert("name".into(), serde_json::json!("Pepper"));
    state.set_robot_info(robot_id, info).await;
    state.count_frame(robot_id).await;
    state.count_frame(robot_id).await;

    let summaries = state.robot_summaries().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, robot_id);
    assert_eq!(summaries[0].frames_relayed, 2);
    assert_eq!(summaries[0].info.as_ref().and_then(|i| i.get("name")), Some(&serde_json::json!("Pepper")));
}
