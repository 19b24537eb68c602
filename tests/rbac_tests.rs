//! Guard behavior with store-resolved roles.

use std::sync::Arc;

use taskplane::auth::{Claims, Guard, Permission, Principal, Role, TokenValidator};
use taskplane::store::memory::MemoryStore;
use taskplane::store::Store;

async fn guard_with_roles(bindings: &[(&str, &str, &str, Role)]) -> Guard {
    let store = Arc::new(MemoryStore::new());
    for (tenant, user, project, role) in bindings {
        store.bind_role(tenant, user, project, *role).await.unwrap();
    }
    Guard::new(store)
}

fn user(user_id: &str, tenant_id: &str) -> Principal {
    Principal::from_claims(&Claims::for_user(user_id, tenant_id, 3600)).unwrap()
}

fn agent(agent_id: &str, tenant_id: &str, project_id: &str) -> Principal {
    Principal::from_claims(&Claims::for_agent(agent_id, tenant_id, project_id, 3600)).unwrap()
}

#[tokio::test]
async fn user_permissions_follow_roles() {
    let guard = guard_with_roles(&[
        ("t1", "op", "p1", Role::Operator),
        ("t1", "op", "p2", Role::Viewer),
    ])
    .await;
    let op = user("op", "t1");

    guard.authorize(&op, "p1", Permission::JobRun).await.unwrap();
    guard.authorize(&op, "p1", Permission::JobRead).await.unwrap();
    assert!(guard.authorize(&op, "p1", Permission::AuditRead).await.is_err());

    // Viewer on p2: read only.
    guard.authorize(&op, "p2", Permission::JobRead).await.unwrap();
    assert!(guard.authorize(&op, "p2", Permission::JobRun).await.is_err());

    // No binding at all.
    assert!(guard.authorize(&op, "p3", Permission::JobRead).await.is_err());
}

#[tokio::test]
async fn admin_holds_the_full_set() {
    let guard = guard_with_roles(&[("t1", "boss", "p1", Role::Admin)]).await;
    let boss = user("boss", "t1");
    for permission in [
        Permission::JobRun,
        Permission::JobRead,
        Permission::JobCancel,
        Permission::AgentRead,
        Permission::AgentUpgrade,
        Permission::ProjectAdmin,
        Permission::ArtifactWrite,
        Permission::AuditRead,
    ] {
        guard.authorize(&boss, "p1", permission).await.unwrap();
    }
}

#[tokio::test]
async fn agent_is_bound_to_its_project() {
    let guard = guard_with_roles(&[]).await;
    let a = agent("a1", "t1", "p1");

    guard.authorize(&a, "p1", Permission::JobRead).await.unwrap();
    assert!(guard.authorize(&a, "p2", Permission::JobRead).await.is_err());
    // Role-backed write permissions are user territory.
    assert!(guard.authorize(&a, "p1", Permission::JobRun).await.is_err());

    assert_eq!(guard.accessible_projects(&a).await.unwrap(), vec!["p1"]);
    let scope = guard.scope_for(&a).await.unwrap();
    assert_eq!(scope.tenant_id, "t1");
    assert_eq!(scope.project_ids, vec!["p1"]);

    assert!(guard.require_agent(&a).is_ok());
    assert!(guard.require_agent(&user("u", "t1")).is_err());
}

#[tokio::test]
async fn accessible_projects_enumerates_bindings() {
    let guard = guard_with_roles(&[
        ("t1", "op", "p1", Role::Operator),
        ("t1", "op", "p2", Role::Viewer),
        ("t2", "op", "p9", Role::Admin),
    ])
    .await;

    // Same user id under another tenant does not leak across.
    let projects = guard.accessible_projects(&user("op", "t1")).await.unwrap();
    assert_eq!(projects, vec!["p1", "p2"]);

    let projects = guard.accessible_projects(&user("op", "t2")).await.unwrap();
    assert_eq!(projects, vec!["p9"]);

    assert!(guard
        .accessible_projects(&user("nobody", "t1"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn claims_must_identify_a_principal() {
    let validator = TokenValidator::new("secret");
    let mut claims = Claims::for_user("u", "t1", 3600);
    claims.user_id = None;
    assert!(Principal::from_claims(&claims).is_err());

    let mut claims = Claims::for_agent("a", "t1", "p1", 3600);
    claims.project_id = None;
    assert!(Principal::from_claims(&claims).is_err());

    // Round-trip through the validator keeps the identity.
    let token = validator.mint(&Claims::for_agent("a", "t1", "p1", 3600)).unwrap();
    let claims = validator.validate(&token).unwrap();
    assert_eq!(claims.agent_id.as_deref(), Some("a"));

    // Expired tokens are rejected.
    let token = validator.mint(&Claims::for_user("u", "t1", -3600)).unwrap();
    assert!(validator.validate(&token).is_err());
}
