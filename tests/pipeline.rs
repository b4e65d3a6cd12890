//! End-to-end tests: admission, channel, recorder and durable rows.

use campaign_admission::{
    channel, AdmissionService, ApplicationRecorder, ApplyOutcome, ApplyResponse, Campaign,
    CampaignId, CampaignRepository, CampaignStatus, ChannelConfig, CloseReport,
    InMemoryRepository, SystemClock, UserId, APPLY_TOPIC,
};
use chrono::Utc;
use std::sync::Arc;

struct Pipeline {
    service: AdmissionService,
    repository: InMemoryRepository,
    recorder: campaign_admission::RecorderHandle,
}

async fn pipeline(capacity: u64) -> Pipeline {
    let repository = InMemoryRepository::new();
    let campaign = Campaign::open(1, capacity, Utc::now() + chrono::Duration::hours(1)).unwrap();
    repository.save_campaign(&campaign).await.unwrap();

    let (publisher, consumer) = channel(ChannelConfig::default()).unwrap();
    let recorder = ApplicationRecorder::new(
        Arc::new(repository.clone()),
        Arc::new(SystemClock::new()),
        APPLY_TOPIC,
    )
    .start(consumer);

    let service = AdmissionService::builder()
        .with_publisher(Arc::new(publisher))
        .with_repository(Arc::new(repository.clone()))
        .build()
        .unwrap();

    Pipeline {
        service,
        repository,
        recorder,
    }
}

#[tokio::test]
async fn test_five_users_three_slots() {
    let p = pipeline(3).await;

    let handles: Vec<_> = (1..=5)
        .map(|user| {
            let service = p.service.clone();
            tokio::spawn(async move { service.apply(CampaignId(1), UserId(user)).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    let admitted: Vec<_> = outcomes.iter().filter_map(ApplyOutcome::admission).collect();
    assert_eq!(admitted.len(), 3);
    assert_eq!(
        admitted
            .iter()
            .filter(|a| a.close == CloseReport::Closed)
            .count(),
        1
    );

    let rejected: Vec<_> = outcomes.iter().filter(|o| o.is_rejected()).collect();
    assert_eq!(rejected.len(), 2);
    for outcome in rejected {
        let response = ApplyResponse::from(outcome);
        assert!(!response.admitted);
        assert_eq!(response.message, "capacity reached");
    }

    let stored = p.repository.find_campaign(CampaignId(1)).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Closed);

    let stats = p.recorder.shutdown().await.unwrap();
    assert_eq!(stats.inserted, 5);

    assert_eq!(p.repository.count_applications(CampaignId(1)).await.unwrap(), 5);
    assert_eq!(p.repository.count_selected(CampaignId(1)).await.unwrap(), 3);
    let rows = p.repository.applications(CampaignId(1));
    assert_eq!(rows.iter().filter(|r| !r.selected).count(), 2);
}

#[tokio::test]
async fn test_reapplication_adds_no_rows() {
    let p = pipeline(3).await;

    for _ in 0..4 {
        let outcome = p.service.apply(CampaignId(1), UserId(11)).await.unwrap();
        assert!(outcome.is_admitted());
    }

    let stats = p.recorder.shutdown().await.unwrap();
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.updated, 0);
    assert_eq!(p.repository.count_applications(CampaignId(1)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_rows_match_gate_after_drain() {
    let p = pipeline(4).await;

    for user in 1..=4 {
        p.service.apply(CampaignId(1), UserId(user)).await.unwrap();
    }
    p.recorder.shutdown().await.unwrap();

    let admitted = p
        .service
        .gate()
        .admitted_count(CampaignId(1), 4)
        .await
        .unwrap();
    assert_eq!(
        p.repository.count_selected(CampaignId(1)).await.unwrap(),
        admitted
    );
}
