//! tests/dispatcher_tests.rs
//! Corridas con reloj pausado de tokio: el pacing se mide sin esperar de verdad.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::dispatch_config::DispatchConfig;
    use crate::models::campaign_model::{CampaignProgress, CampaignStatus, Recipient};
    use crate::services::dispatcher::DispatchOutcome;
    use crate::tests::support::{
        campaign_with, dispatcher, instant_config, recipients, InMemoryCampaignStore,
        RecordingTransport,
    };

    #[tokio::test(start_paused = true)]
    async fn test_twenty_five_recipients_in_three_batches() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::default());
        let campaign = campaign_with(CampaignStatus::Sending, recipients(25));
        store.put(&campaign);

        let started = tokio::time::Instant::now();
        let outcome = dispatcher(&store, &transport, DispatchConfig::default())
            .execute(campaign.clone())
            .await;
        let elapsed = started.elapsed();

        assert_eq!(transport.calls(), 25);
        assert_eq!(
            outcome,
            DispatchOutcome::Completed(CampaignProgress {
                success_count: 25,
                fail_count: 0,
                total_processed: 25,
                total_recipients: 25,
            })
        );

        // 24 pausas entre mensajes + 2 pausas entre lotes
        assert!(elapsed >= Duration::from_secs(144), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(145), "{:?}", elapsed);

        // Lotes 10/10/5: las pausas largas caen antes del envío 11 y del 21
        let long_gaps: Vec<usize> = transport
            .gaps()
            .iter()
            .enumerate()
            .filter(|(_, gap)| **gap > Duration::from_secs(30))
            .map(|(idx, _)| idx + 1)
            .collect();
        assert_eq!(long_gaps, vec![10, 20]);

        let stored = store.campaign(&campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.progress.total_processed, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_persisted_after_every_attempt() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::failing_for(&["user2@example.com"]));
        let campaign = campaign_with(CampaignStatus::Sending, recipients(4));
        store.put(&campaign);

        dispatcher(&store, &transport, instant_config())
            .execute(campaign)
            .await;

        let history = store.progress_history();
        // inicial + uno por intento
        assert_eq!(history.len(), 5);
        assert!(history.iter().all(|p| p.is_consistent()));
        assert!(history
            .windows(2)
            .all(|w| w[1].total_processed == w[0].total_processed + 1));
        assert_eq!(history[0], CampaignProgress::start(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recipient_failures_do_not_abort_run() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::failing_for(&[
            "user1@example.com",
            "user4@example.com",
        ]));
        let campaign = campaign_with(CampaignStatus::Sending, recipients(5));
        store.put(&campaign);

        let outcome = dispatcher(&store, &transport, instant_config())
            .execute(campaign.clone())
            .await;

        assert_eq!(transport.calls(), 5);
        let DispatchOutcome::Completed(progress) = outcome else {
            panic!("esperaba Completed, llegó {:?}", outcome);
        };
        assert_eq!(progress.success_count, 3);
        assert_eq!(progress.fail_count, 2);

        let stored = store.campaign(&campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert_eq!(stored.progress, progress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_marks_failed_and_keeps_partial_progress() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::default());
        let campaign = campaign_with(CampaignStatus::Sending, recipients(10));
        store.put(&campaign);
        // inicial + 2 intentos, el tercero ya no se puede persistir
        store.fail_progress_after(3);

        let outcome = dispatcher(&store, &transport, instant_config())
            .execute(campaign.clone())
            .await;

        assert!(matches!(&outcome, DispatchOutcome::Failed(msg) if msg.contains("store unreachable")));
        assert_eq!(transport.calls(), 3);

        let stored = store.campaign(&campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Failed);
        assert!(stored.error_message.unwrap().contains("store unreachable"));
        assert_eq!(stored.progress.total_processed, 2);
        assert!(stored.progress.is_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_template_is_fatal() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::default());
        let mut campaign = campaign_with(CampaignStatus::Sending, recipients(3));
        campaign.template_id = Some("no-existe".to_string());
        store.put(&campaign);

        let outcome = dispatcher(&store, &transport, instant_config())
            .execute(campaign.clone())
            .await;

        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        assert_eq!(transport.calls(), 0);
        let stored = store.campaign(&campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Failed);
        assert!(stored.error_message.unwrap().contains("no-existe"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_recipients_is_fatal() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::default());
        let campaign = campaign_with(CampaignStatus::Sending, Vec::new());
        store.put(&campaign);

        let outcome = dispatcher(&store, &transport, instant_config())
            .execute(campaign.clone())
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Failed("No recipients found for campaign".to_string())
        );
        assert_eq!(
            store.campaign(&campaign.id).unwrap().status,
            CampaignStatus::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_sent_once() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::default());
        let mut list = recipients(2);
        list.push(Recipient {
            email: "USER1@example.com".to_string(),
            name: "Dup".to_string(),
            id: "r-dup".to_string(),
        });
        let campaign = campaign_with(CampaignStatus::Sending, list);
        store.put(&campaign);

        let outcome = dispatcher(&store, &transport, instant_config())
            .execute(campaign)
            .await;

        assert_eq!(transport.calls(), 2);
        let DispatchOutcome::Completed(progress) = outcome else {
            panic!("esperaba Completed");
        };
        assert_eq!(progress.total_recipients, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_resets_counters() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::default());
        let mut campaign = campaign_with(CampaignStatus::Sending, recipients(3));
        campaign.progress = CampaignProgress {
            success_count: 5,
            fail_count: 5,
            total_processed: 10,
            total_recipients: 10,
        };
        store.put(&campaign);

        dispatcher(&store, &transport, instant_config())
            .execute(campaign.clone())
            .await;

        let stored = store.campaign(&campaign.id).unwrap();
        assert_eq!(
            stored.progress,
            CampaignProgress {
                success_count: 3,
                fail_count: 0,
                total_processed: 3,
                total_recipients: 3,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_rendered_per_recipient() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::default());
        let campaign = campaign_with(CampaignStatus::Sending, recipients(2));
        store.put(&campaign);

        dispatcher(&store, &transport, instant_config())
            .execute(campaign.clone())
            .await;

        let body = transport.body_for("user2@example.com").unwrap();
        assert!(body.contains("Hola User 2"));
        assert!(body.contains(&format!("/track/{}/r-2", campaign.id)));
        assert!(body.contains(&format!("/track/click/{}/r-2/link-1", campaign.id)));
        assert!(!body.contains("r-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_campaign_left_sending() {
        let store = InMemoryCampaignStore::seeded();
        let transport = Arc::new(RecordingTransport::default());
        let campaign = campaign_with(CampaignStatus::Sending, recipients(3));
        // Otra escritura la cerró antes de que la corrida arranque
        let mut stored = campaign.clone();
        stored.status = CampaignStatus::Completed;
        store.put(&stored);

        let outcome = dispatcher(&store, &transport, instant_config())
            .execute(campaign.clone())
            .await;

        assert!(matches!(&outcome, DispatchOutcome::Failed(msg) if msg.contains("no longer sending")));
        assert_eq!(transport.calls(), 0);
        let stored = store.campaign(&campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Completed);
        assert_eq!(stored.error_message, None);
    }
}
