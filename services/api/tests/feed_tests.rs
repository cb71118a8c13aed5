use api_lib::adapters::{FeedHub, MemorySessionStore};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use twin_capture_core::{
    ChangeFeed, DeviceId, PortError, Session, SessionCommands, SessionCoordinator, SessionStatus,
    Subscription,
};

fn setup() -> (Arc<FeedHub>, SessionCoordinator) {
    let hub = Arc::new(FeedHub::new(16));
    let store = Arc::new(MemorySessionStore::new(hub.clone()));
    (hub, SessionCoordinator::new(store))
}

async fn next_record(subscription: &mut Subscription) -> Session {
    tokio::time::timeout(Duration::from_secs(1), subscription.updates.next())
        .await
        .expect("timed out waiting for a feed record")
        .expect("feed ended unexpectedly")
        .expect("feed reported an error")
}

#[tokio::test]
async fn every_subscriber_sees_the_join_with_the_recorder_id() {
    let (hub, coordinator) = setup();
    let created = coordinator
        .create_session(&DeviceId::new("dev-A"))
        .await
        .unwrap();

    let mut first = hub.subscribe(created.id).await.unwrap();
    let mut second = hub.subscribe(created.id).await.unwrap();
    assert_eq!(hub.subscriber_count(created.id), 2);

    coordinator
        .join_session(created.join_code.as_str(), &DeviceId::new("dev-B"))
        .await
        .unwrap();

    for subscription in [&mut first, &mut second] {
        let record = next_record(subscription).await;
        assert_eq!(record.id, created.id);
        assert_eq!(record.status, SessionStatus::Connected);
        assert_eq!(record.recorder_device_id, Some(DeviceId::new("dev-B")));
    }
}

#[tokio::test]
async fn records_arrive_in_commit_order() {
    let (hub, coordinator) = setup();
    let created = coordinator
        .create_session(&DeviceId::new("dev-A"))
        .await
        .unwrap();
    let mut subscription = hub.subscribe(created.id).await.unwrap();

    coordinator
        .join_session(created.join_code.as_str(), &DeviceId::new("dev-B"))
        .await
        .unwrap();
    coordinator.start_recording(created.id).await.unwrap();
    coordinator.stop_recording(created.id).await.unwrap();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        statuses.push(next_record(&mut subscription).await.status);
    }
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Connected,
            SessionStatus::Recording,
            SessionStatus::Finished
        ]
    );
}

#[tokio::test]
async fn rejected_transitions_publish_nothing() {
    let (hub, coordinator) = setup();
    let created = coordinator
        .create_session(&DeviceId::new("dev-A"))
        .await
        .unwrap();
    let mut subscription = hub.subscribe(created.id).await.unwrap();

    assert!(coordinator.start_recording(created.id).await.is_err());
    assert!(coordinator.stop_recording(created.id).await.is_err());

    let pending =
        tokio::time::timeout(Duration::from_millis(100), subscription.updates.next()).await;
    assert!(pending.is_err(), "no record should have been published");
}

#[tokio::test]
async fn subscribers_only_see_their_own_session() {
    let (hub, coordinator) = setup();
    let watched = coordinator
        .create_session(&DeviceId::new("dev-A"))
        .await
        .unwrap();
    let other = coordinator
        .create_session(&DeviceId::new("dev-C"))
        .await
        .unwrap();
    let mut subscription = hub.subscribe(watched.id).await.unwrap();

    coordinator
        .join_session(other.join_code.as_str(), &DeviceId::new("dev-D"))
        .await
        .unwrap();
    coordinator
        .join_session(watched.join_code.as_str(), &DeviceId::new("dev-B"))
        .await
        .unwrap();

    assert_eq!(next_record(&mut subscription).await.id, watched.id);
}

#[tokio::test]
async fn unsubscribing_one_client_leaves_the_other_attached() {
    let (hub, coordinator) = setup();
    let created = coordinator
        .create_session(&DeviceId::new("dev-A"))
        .await
        .unwrap();
    let mut leaving = hub.subscribe(created.id).await.unwrap();
    let mut staying = hub.subscribe(created.id).await.unwrap();

    hub.unsubscribe(leaving.id).await;
    assert!(leaving.updates.next().await.is_none());

    coordinator
        .join_session(created.join_code.as_str(), &DeviceId::new("dev-B"))
        .await
        .unwrap();
    assert_eq!(
        next_record(&mut staying).await.status,
        SessionStatus::Connected
    );
}

#[tokio::test]
async fn invalidation_is_reported_to_every_subscriber() {
    let (hub, coordinator) = setup();
    let created = coordinator
        .create_session(&DeviceId::new("dev-A"))
        .await
        .unwrap();
    let mut subscription = hub.subscribe(created.id).await.unwrap();

    hub.invalidate_all();

    let item = subscription.updates.next().await.unwrap();
    assert!(matches!(item, Err(PortError::SubscriptionLost(_))));
}
