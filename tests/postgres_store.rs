use std::sync::Arc;

use chrono::{Duration, Utc};
use rbac_api::api_routes;
use rbac_api::auth::codes::digest_code;
use rbac_api::auth::lockout::LockoutState;
use rbac_api::models::{RoleChanges, StoredCode};
use rbac_api::seed_data::{DEFAULT_PERMISSIONS, DEFAULT_ROLES, SeedReport, seed_defaults};
use rbac_api::store::{PgStore, RbacStore, SharedStore, UserQuery};
use rbac_api::test_support::{TestDatabase, TestDatabaseError, TestFixtures, TestRocketBuilder};
use rocket::http::{ContentType, Status};
use serde_json::{Value, json};

async fn provision() -> Option<(TestDatabase, PgStore)> {
    match TestDatabase::new_from_env().await {
        Ok(db) => {
            let store = PgStore::new(db.pool());
            seed_defaults(&store).await.expect("seed defaults");
            Some((db, store))
        }
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping postgres store test: TEST_DATABASE_URL not set");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

#[tokio::test]
async fn seeding_is_idempotent() {
    let Some((db, store)) = provision().await else {
        return;
    };

    let report = seed_defaults(&store).await.expect("second seed");
    assert_eq!(report, SeedReport::default());

    let roles = store
        .list_roles(&Default::default())
        .await
        .expect("list roles");
    assert_eq!(roles.total as usize, DEFAULT_ROLES.len());

    let super_admin = store
        .find_role_by_name("Super Admin")
        .await
        .expect("lookup")
        .expect("seeded");
    let super_admin = store
        .find_role(super_admin.id)
        .await
        .expect("lookup")
        .expect("seeded");
    assert_eq!(super_admin.permissions.len(), DEFAULT_PERMISSIONS.len());

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn lockout_state_round_trips() {
    let Some((db, store)) = provision().await else {
        return;
    };
    let user = TestFixtures::new(&store)
        .insert_user("lock@example.com", "Abc12345!", &["User"])
        .await
        .expect("fixture user");

    let until = Utc::now() + Duration::hours(2);
    store
        .record_login_failure(
            user.user.id,
            LockoutState {
                failed_attempts: 5,
                locked_until: Some(until),
            },
        )
        .await
        .expect("record failure");

    let record = store
        .find_user_by_email("lock@example.com")
        .await
        .expect("lookup")
        .expect("user exists");
    assert_eq!(record.lockout.failed_attempts, 5);
    assert!(record.lockout.locked_until.is_some());

    store
        .record_login_success(user.user.id, Utc::now())
        .await
        .expect("record success");
    let record = store
        .find_user_record(user.user.id)
        .await
        .expect("lookup")
        .expect("user exists");
    assert_eq!(record.lockout, LockoutState::cleared());
    assert!(record.user.last_login.is_some());

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn verification_code_is_consumed_once() {
    let Some((db, store)) = provision().await else {
        return;
    };
    let user = TestFixtures::new(&store)
        .insert_user("code@example.com", "Abc12345!", &["User"])
        .await
        .expect("fixture user");

    let now = Utc::now();
    let digest = digest_code("123456");
    store
        .set_verification_code(
            user.user.id,
            &StoredCode {
                digest: digest.clone(),
                expires_at: now + Duration::minutes(15),
            },
        )
        .await
        .expect("store code");

    let expired = store
        .consume_verification_code(&digest, now + Duration::minutes(16))
        .await
        .expect("consume");
    assert!(expired.is_none());

    let consumed = store
        .consume_verification_code(&digest, now)
        .await
        .expect("consume");
    assert_eq!(consumed.map(|u| u.email_verified), Some(true));

    let again = store
        .consume_verification_code(&digest, now)
        .await
        .expect("consume");
    assert!(again.is_none());

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn user_listing_filters_by_role_and_search() {
    let Some((db, store)) = provision().await else {
        return;
    };
    let fixtures = TestFixtures::new(&store);
    fixtures
        .insert_user("ann@example.com", "Abc12345!", &["Admin"])
        .await
        .expect("fixture user");
    fixtures
        .insert_user("bob@example.com", "Abc12345!", &["User"])
        .await
        .expect("fixture user");

    let admins = store
        .list_users(&UserQuery {
            role: Some("Admin".into()),
            ..Default::default()
        })
        .await
        .expect("list users");
    assert_eq!(admins.total, 1);
    assert_eq!(admins.items[0].user.email, "ann@example.com");

    let search = store
        .list_users(&UserQuery {
            search: Some("BOB".into()),
            ..Default::default()
        })
        .await
        .expect("list users");
    assert_eq!(search.total, 1);

    let unknown_role = store
        .list_users(&UserQuery {
            role: Some("Nope".into()),
            ..Default::default()
        })
        .await
        .expect("list users");
    assert_eq!(unknown_role.total, 0);

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn deleting_a_permission_detaches_it_from_roles() {
    let Some((db, store)) = provision().await else {
        return;
    };
    let role = store
        .find_role_by_name("Manager")
        .await
        .expect("lookup")
        .expect("seeded");
    let audit = store
        .find_permissions_by_names(&["audit.view".to_string()])
        .await
        .expect("lookup")
        .remove(0);

    store
        .update_role(
            role.id,
            RoleChanges {
                permission_ids: Some(vec![audit.id]),
                ..Default::default()
            },
        )
        .await
        .expect("update role");

    store.delete_permission(audit.id).await.expect("delete");
    let role = store
        .find_role(role.id)
        .await
        .expect("lookup")
        .expect("role exists");
    assert!(role.permissions.is_empty());

    db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn login_over_postgres_store() {
    let Some((db, store)) = provision().await else {
        return;
    };
    TestFixtures::new(&store)
        .insert_user("pg@example.com", "Abc12345!", &["Super Admin"])
        .await
        .expect("fixture user");

    let client = TestRocketBuilder::new()
        .mount_api_routes(api_routes())
        .with_store(Arc::new(store) as SharedStore)
        .async_client()
        .await;

    let response = client
        .post("/api/auth/login")
        .header(ContentType::JSON)
        .body(json!({ "email": "pg@example.com", "password": "Abc12345!" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    let permissions = body["data"]["user"]["permissions"]
        .as_array()
        .expect("permissions");
    assert_eq!(permissions.len(), DEFAULT_PERMISSIONS.len());

    // The tracked client now carries the access cookie.
    let status = client.get("/api/users").dispatch().await.status();
    assert_eq!(status, Status::Ok);

    drop(client);
    db.close().await.expect("failed to drop test database");
}
