//! HTTP API tests: auth, tenant isolation, the lease protocol over the
//! wire, and audit.


use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::json;
use uuid::Uuid;

use taskplane::auth::Role;
use taskplane::store::{JobState, Scope};
use test_harness::{command_workflow, TestPlane};

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn create_job(
    plane: &TestPlane,
    token: &str,
    project_id: &str,
    agent_id: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut body = json!({
        "project_id": project_id,
        "workflow": command_workflow("wf", "true"),
    });
    if let Some(agent_id) = agent_id {
        body["agent_id"] = json!(agent_id);
    }
    let response = client()
        .post(plane.url("/api/jobs"))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    let value = response.json().await.unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_is_open() {
    let plane = TestPlane::start().await;
    let response = client().get(plane.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn missing_or_garbage_bearer_is_unauthorized() {
    let plane = TestPlane::start().await;

    let response = client().get(plane.url("/api/jobs")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client()
        .get(plane.url("/api/jobs"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn operator_creates_job_viewer_cannot() {
    let plane = TestPlane::start().await;
    plane.seed_project("t1", "p1").await;
    plane.grant("t1", "op", "p1", Role::Operator).await;
    plane.grant("t1", "eyes", "p1", Role::Viewer).await;

    let (status, body) = create_job(&plane, &plane.user_token("op", "t1"), "p1", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["state"], "pending");
    assert_eq!(body["project_id"], "p1");
    assert!(body["job_id"].as_str().unwrap().parse::<Uuid>().is_ok());

    let (status, _) = create_job(&plane, &plane.user_token("eyes", "t1"), "p1", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_workflow_is_bad_request() {
    let plane = TestPlane::start().await;
    plane.seed_project("t1", "p1").await;
    plane.grant("t1", "op", "p1", Role::Operator).await;

    let response = client()
        .post(plane.url("/api/jobs"))
        .bearer_auth(plane.user_token("op", "t1"))
        .json(&json!({ "project_id": "p1", "workflow": { "tasks": "nope" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Scenario 5: a tenant-T1 user aiming at a T2 project gets 403 and no
/// row is inserted.
#[tokio::test]
async fn cross_tenant_create_is_rejected_without_a_row() {
    let plane = TestPlane::start().await;
    plane.seed_project("t2", "p2").await;
    plane.grant("t2", "owner", "p2", Role::Admin).await;

    let (status, _) = create_job(&plane, &plane.user_token("intruder", "t1"), "p2", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let t2_scope = Scope::new("t2", vec!["p2".to_string()]);
    let jobs = plane.store.list_jobs(&t2_scope, 10, None).await.unwrap();
    assert!(jobs.items.is_empty(), "cross-tenant insert went through");
}

/// Scenario 2: two agents race the lease; one gets the job body, the
/// other a conflict.
#[tokio::test]
async fn lease_race_has_one_winner() {
    let plane = TestPlane::start().await;
    plane.seed_project("t1", "p1").await;
    plane.grant("t1", "op", "p1", Role::Operator).await;

    let (status, body) = create_job(&plane, &plane.user_token("op", "t1"), "p1", None).await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let lease_url = plane.url(&format!("/api/jobs/{job_id}/lease"));
    let t1 = plane.agent_token("a1", "t1", "p1");
    let t2 = plane.agent_token("a2", "t1", "p1");

    let (r1, r2) = tokio::join!(
        client().post(&lease_url).bearer_auth(&t1).send(),
        client().post(&lease_url).bearer_auth(&t2).send(),
    );
    let (s1, s2) = (r1.unwrap().status(), r2.unwrap().status());

    let statuses = [s1, s2];
    assert!(
        statuses.contains(&StatusCode::OK) && statuses.contains(&StatusCode::CONFLICT),
        "expected one 200 and one 409, got {s1} and {s2}"
    );

    let scope = Scope::new("t1", vec!["p1".to_string()]);
    let job = plane
        .store
        .get_job(&scope, job_id.parse().unwrap())
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Leased);
    let winner = if s1 == StatusCode::OK { "a1" } else { "a2" };
    assert_eq!(job.lease_owner.as_deref(), Some(winner));
}

/// Users cannot lease; agents of another project cannot see the job.
#[tokio::test]
async fn lease_is_agent_only_and_scoped() {
    let plane = TestPlane::start().await;
    plane.seed_project("t1", "p1").await;
    plane.grant("t1", "op", "p1", Role::Operator).await;

    let (_, body) = create_job(&plane, &plane.user_token("op", "t1"), "p1", None).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    let lease_url = plane.url(&format!("/api/jobs/{job_id}/lease"));

    let response = client()
        .post(&lease_url)
        .bearer_auth(plane.user_token("op", "t1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // An agent bound to another project sees 204: the row is invisible.
    let response = client()
        .post(&lease_url)
        .bearer_auth(plane.agent_token("ax", "t1", "other"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

/// Scenario 3 over HTTP: expired lease is reaped, re-leased, and the
/// original lessee's late completion is rejected.
#[tokio::test]
async fn orphaned_lease_recovery() {
    let plane = TestPlane::start_with(Duration::from_millis(100), 50).await;
    plane.seed_project("t1", "p1").await;
    plane.grant("t1", "op", "p1", Role::Operator).await;

    let (_, body) = create_job(&plane, &plane.user_token("op", "t1"), "p1", None).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    let lease_url = plane.url(&format!("/api/jobs/{job_id}/lease"));
    let complete_url = plane.url(&format!("/api/jobs/{job_id}/complete"));

    let t1 = plane.agent_token("a1", "t1", "p1");
    let response = client().post(&lease_url).bearer_auth(&t1).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Agent a1 "crashes". After the deadline a reaper pass runs.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let reaped = plane.store.reap_expired_leases(Utc::now()).await.unwrap();
    assert_eq!(reaped.len(), 1);

    let t2 = plane.agent_token("a2", "t1", "p1");
    let response = client().post(&lease_url).bearer_auth(&t2).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Late completion from the expired lessee.
    let response = client()
        .post(&complete_url)
        .bearer_auth(&t1)
        .json(&json!({ "success": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The live lessee completes normally.
    let response = client()
        .post(&complete_url)
        .bearer_auth(&t2)
        .json(&json!({ "success": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn register_and_heartbeat_maintain_presence() {
    let plane = TestPlane::start().await;
    plane.seed_project("t1", "p1").await;

    let token = plane.agent_token("a1", "t1", "p1");
    let response = client()
        .post(plane.url("/api/agents/register"))
        .bearer_auth(&token)
        .json(&json!({
            "agent_id": "a1",
            "project_id": "p1",
            "os": "linux",
            "labels": { "region": "eu" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    use taskplane::presence::PresenceStore;
    assert!(plane.presence.is_present("t1", "p1", "a1").await.unwrap());

    let response = client()
        .post(plane.url("/api/agents/heartbeat"))
        .bearer_auth(&token)
        .json(&json!({ "state": "idle", "active_jobs": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Registration for a project the token is not bound to is refused.
    let response = client()
        .post(plane.url("/api/agents/register"))
        .bearer_auth(&token)
        .json(&json!({ "agent_id": "a1", "project_id": "p9", "os": "linux", "labels": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn audit_trail_is_written_and_guarded() {
    let plane = TestPlane::start().await;
    plane.seed_project("t1", "p1").await;
    plane.grant("t1", "boss", "p1", Role::Admin).await;
    plane.grant("t1", "op", "p1", Role::Operator).await;

    let (_, body) = create_job(&plane, &plane.user_token("op", "t1"), "p1", None).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let agent = plane.agent_token("a1", "t1", "p1");
    client()
        .post(plane.url(&format!("/api/jobs/{job_id}/lease")))
        .bearer_auth(&agent)
        .send()
        .await
        .unwrap();
    client()
        .post(plane.url(&format!("/api/jobs/{job_id}/complete")))
        .bearer_auth(&agent)
        .json(&json!({ "success": true }))
        .send()
        .await
        .unwrap();

    let response = client()
        .get(plane.url("/api/audit/logs"))
        .bearer_auth(plane.user_token("boss", "t1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    let actions: Vec<&str> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"job.create"));
    assert!(actions.contains(&"job.lease"));
    assert!(actions.contains(&"job.complete"));

    // Operators do not hold audit:read.
    let response = client()
        .get(plane.url("/api/audit/logs"))
        .bearer_auth(plane.user_token("op", "t1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn job_listing_paginates_with_cursor() {
    let plane = TestPlane::start_with(Duration::from_secs(60), 2).await;
    plane.seed_project("t1", "p1").await;
    plane.grant("t1", "op", "p1", Role::Operator).await;
    let token = plane.user_token("op", "t1");

    for _ in 0..5 {
        let (status, _) = create_job(&plane, &token, "p1", None).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let mut seen = 0;
    let mut cursor: Option<String> = None;
    loop {
        let mut url = plane.url("/api/jobs");
        if let Some(c) = &cursor {
            url = format!("{url}?cursor={c}");
        }
        let body: serde_json::Value = client()
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let jobs = body["jobs"].as_array().unwrap();
        assert!(jobs.len() <= 2);
        seen += jobs.len();
        match body.get("next_cursor").and_then(|c| c.as_str()) {
            Some(next) => cursor = Some(next.to_string()),
            None => break,
        }
    }
    assert_eq!(seen, 5);
}

#[tokio::test]
async fn upgrade_requires_permission_and_is_accepted() {
    let plane = TestPlane::start().await;
    plane.seed_project("t1", "p1").await;
    plane.grant("t1", "boss", "p1", Role::Admin).await;
    plane.grant("t1", "op", "p1", Role::Operator).await;

    // Register the agent so the endpoint can find its project.
    let agent = plane.agent_token("a1", "t1", "p1");
    client()
        .post(plane.url("/api/agents/register"))
        .bearer_auth(&agent)
        .json(&json!({ "agent_id": "a1", "project_id": "p1", "os": "linux", "labels": {} }))
        .send()
        .await
        .unwrap();

    let response = client()
        .post(plane.url("/api/agents/a1/upgrade"))
        .bearer_auth(plane.user_token("boss", "t1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // agent:upgrade is admin-only among the built-in roles.
    let response = client()
        .post(plane.url("/api/agents/a1/upgrade"))
        .bearer_auth(plane.user_token("op", "t1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
