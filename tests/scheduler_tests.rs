//! Scheduler selection pipeline: presence, targeting, fan-out cap, and
//! the reaper loop.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use taskplane::broker::memory::MemoryBroker;
use taskplane::broker::{agent_channel, AgentMessage, MessageSource, Publisher};
use taskplane::presence::{MemoryPresence, PresenceStore};
use taskplane::scheduler::{reaper, Scheduler, Target};
use taskplane::store::memory::MemoryStore;
use taskplane::store::{AgentRecord, Job, JobState, LeaseOutcome, Scope, Store};

struct Fixture {
    store: Arc<MemoryStore>,
    presence: Arc<MemoryPresence>,
    broker: Arc<MemoryBroker>,
    scheduler: Scheduler,
    scope: Scope,
}

fn fixture(fanout_cap: usize) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let presence = Arc::new(MemoryPresence::new());
    let broker = MemoryBroker::new();
    let publisher: Arc<dyn Publisher> = broker.clone();
    let scheduler = Scheduler::new(store.clone(), presence.clone(), publisher)
        .with_fanout_cap(fanout_cap);
    Fixture {
        store,
        presence,
        broker,
        scheduler,
        scope: Scope::new("t1", vec!["p1".to_string()]),
    }
}

impl Fixture {
    async fn present(&self, agent_id: &str) {
        self.presence
            .announce("t1", "p1", agent_id, Duration::from_secs(60))
            .await
            .unwrap();
    }

    async fn registered(&self, agent_id: &str, labels: &[(&str, &str)]) {
        let labels: BTreeMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let now = Utc::now();
        self.store
            .upsert_agent(
                &self.scope,
                AgentRecord {
                    agent_id: agent_id.to_string(),
                    tenant_id: "t1".to_string(),
                    project_id: "p1".to_string(),
                    os: Some("linux".to_string()),
                    labels,
                    created_at: now,
                    updated_at: now,
                },
            )
            .await
            .unwrap();
    }

    async fn job(&self) -> Job {
        let job = Job::new("t1", "p1", serde_json::json!({"name": "wf", "tasks": []}));
        self.store
            .create_job(&self.scope, job.clone())
            .await
            .unwrap();
        job
    }
}

#[tokio::test]
async fn any_target_notifies_all_present_agents() {
    let fx = fixture(10);
    fx.present("a1").await;
    fx.present("a2").await;
    let mut sub1 = fx.broker.subscribe(&agent_channel("t1", "a1"));
    let mut sub2 = fx.broker.subscribe(&agent_channel("t1", "a2"));

    let job = fx.job().await;
    let notified = fx
        .scheduler
        .schedule(&fx.scope, &job, &Target::Any)
        .await
        .unwrap();
    assert_eq!(notified, 2);

    assert_eq!(
        sub1.next().await,
        Some(AgentMessage::JobAvailable { job_id: job.job_id })
    );
    assert_eq!(
        sub2.next().await,
        Some(AgentMessage::JobAvailable { job_id: job.job_id })
    );
}

#[tokio::test]
async fn agent_target_hits_only_that_agent() {
    let fx = fixture(10);
    fx.present("a1").await;
    fx.present("a2").await;
    let mut sub2 = fx.broker.subscribe(&agent_channel("t1", "a2"));

    let job = fx.job().await;
    let notified = fx
        .scheduler
        .schedule(
            &fx.scope,
            &job,
            &Target::Agent {
                value: "a2".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(notified, 1);
    assert_eq!(
        sub2.next().await,
        Some(AgentMessage::JobAvailable { job_id: job.job_id })
    );
}

#[tokio::test]
async fn absent_agent_target_notifies_nobody() {
    let fx = fixture(10);
    fx.present("a1").await;

    let job = fx.job().await;
    let notified = fx
        .scheduler
        .schedule(
            &fx.scope,
            &job,
            &Target::Agent {
                value: "ghost".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(notified, 0);
}

#[tokio::test]
async fn label_target_matches_superset_and_requires_presence() {
    let fx = fixture(10);
    // a1: present, labels match. a2: present, labels miss. a3: matching
    // labels but not present.
    fx.present("a1").await;
    fx.present("a2").await;
    fx.registered("a1", &[("region", "eu"), ("gpu", "yes")]).await;
    fx.registered("a2", &[("region", "us")]).await;
    fx.registered("a3", &[("region", "eu"), ("gpu", "yes")]).await;

    let mut sub1 = fx.broker.subscribe(&agent_channel("t1", "a1"));

    let job = fx.job().await;
    let labels: BTreeMap<String, String> =
        [("region".to_string(), "eu".to_string())].into_iter().collect();
    let notified = fx
        .scheduler
        .schedule(&fx.scope, &job, &Target::Label { labels })
        .await
        .unwrap();
    assert_eq!(notified, 1);
    assert_eq!(
        sub1.next().await,
        Some(AgentMessage::JobAvailable { job_id: job.job_id })
    );
}

#[tokio::test]
async fn fanout_cap_truncates_selection() {
    let fx = fixture(2);
    for i in 0..5 {
        fx.present(&format!("a{i}")).await;
    }

    let job = fx.job().await;
    let notified = fx
        .scheduler
        .schedule(&fx.scope, &job, &Target::Any)
        .await
        .unwrap();
    assert_eq!(notified, 2);
}

#[tokio::test]
async fn no_presence_means_no_notification_and_job_stays_pending() {
    let fx = fixture(10);
    let job = fx.job().await;
    let notified = fx
        .scheduler
        .schedule(&fx.scope, &job, &Target::Any)
        .await
        .unwrap();
    assert_eq!(notified, 0);

    let stored = fx.store.get_job(&fx.scope, job.job_id).await.unwrap();
    assert_eq!(stored.state, JobState::Pending);
}

#[tokio::test]
async fn reaper_loop_recovers_leases() {
    let fx = fixture(10);
    let job = fx.job().await;

    // Lease with an already-tiny duration, then let the loop run.
    let outcome = fx
        .store
        .lease_job(
            &fx.scope,
            job.job_id,
            "agent-1",
            Duration::from_millis(50),
            Utc::now(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, LeaseOutcome::Leased(_)));

    let shutdown = CancellationToken::new();
    let store: Arc<dyn Store> = fx.store.clone();
    let handle = tokio::spawn(reaper::run(
        store,
        Duration::from_millis(100),
        shutdown.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown.cancel();
    let _ = handle.await;

    let stored = fx.store.get_job(&fx.scope, job.job_id).await.unwrap();
    assert_eq!(stored.state, JobState::Pending);
    assert!(stored.lease_owner.is_none());
}
