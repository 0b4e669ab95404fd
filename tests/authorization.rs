use std::sync::Arc;

use rbac_api::api_routes;
use rbac_api::store::{MemoryStore, SharedStore};
use rbac_api::test_support::{TestFixtures, TestRocketBuilder, seeded_memory_store};
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::Client;
use serde_json::{Value, json};
use uuid::Uuid;

const PASSWORD: &str = "Abc12345!";

struct Harness {
    client: Client,
    store: Arc<MemoryStore>,
}

impl Harness {
    async fn new() -> Self {
        let store = seeded_memory_store().await;
        let rocket = TestRocketBuilder::new()
            .mount_api_routes(api_routes())
            .with_store(store.clone() as SharedStore)
            .build();
        let client = Client::untracked(rocket)
            .await
            .expect("valid Rocket instance");
        Self { client, store }
    }

    async fn user(&self, email: &str, roles: &[&str]) -> Uuid {
        TestFixtures::new(self.store.as_ref())
            .insert_user(email, PASSWORD, roles)
            .await
            .expect("insert fixture user")
            .user
            .id
    }

    async fn role_id(&self, name: &str) -> Uuid {
        TestFixtures::new(self.store.as_ref())
            .role_id(name)
            .await
            .expect("seeded role")
    }

    async fn token(&self, email: &str) -> String {
        let response = self
            .client
            .post("/api/auth/login")
            .header(ContentType::JSON)
            .body(json!({ "email": email, "password": PASSWORD }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.expect("json body");
        body["data"]["tokens"]["accessToken"]
            .as_str()
            .expect("access token")
            .to_string()
    }

    async fn send(
        &self,
        method: rocket::http::Method,
        uri: &str,
        token: &str,
        body: Option<Value>,
    ) -> (Status, Value) {
        let mut request = self
            .client
            .req(method, uri.to_string())
            .header(Header::new("Authorization", format!("Bearer {token}")));
        if let Some(body) = body {
            request = request.header(ContentType::JSON).body(body.to_string());
        }
        let response = request.dispatch().await;
        let status = response.status();
        let body = response.into_json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }
}

use rocket::http::Method::{Delete, Get, Patch, Post, Put};

#[tokio::test]
async fn user_role_is_forbidden_from_listing_users() {
    let harness = Harness::new().await;
    harness.user("plain@example.com", &["User"]).await;
    let token = harness.token("plain@example.com").await;

    let (status, body) = harness.send(Get, "/api/users", &token, None).await;
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body["status"], 403);
    assert_eq!(body["requiredPermissions"], json!(["user.read"]));
}

#[tokio::test]
async fn callers_can_read_their_own_record_only() {
    let harness = Harness::new().await;
    let me = harness.user("self@example.com", &["User"]).await;
    let other = harness.user("other@example.com", &["User"]).await;
    let token = harness.token("self@example.com").await;

    let (status, body) = harness
        .send(Get, &format!("/api/users/{me}"), &token, None)
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["data"]["email"], "self@example.com");

    let (status, _) = harness
        .send(Get, &format!("/api/users/{other}"), &token, None)
        .await;
    assert_eq!(status, Status::Forbidden);
}

#[tokio::test]
async fn super_admin_manages_users_but_not_itself() {
    let harness = Harness::new().await;
    let admin = harness.user("root@example.com", &["Super Admin"]).await;
    let target = harness.user("target@example.com", &["User"]).await;
    let token = harness.token("root@example.com").await;

    let (status, body) = harness
        .send(Get, "/api/users?page=1&limit=1&sortBy=email&sortOrder=asc", &token, None)
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["meta"]["total"], 2);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

    let (status, body) = harness
        .send(Patch, &format!("/api/users/{target}/toggle-status"), &token, None)
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["data"]["isActive"], false);

    let (status, _) = harness
        .send(Patch, &format!("/api/users/{admin}/toggle-status"), &token, None)
        .await;
    assert_eq!(status, Status::BadRequest);

    let (status, _) = harness
        .send(Delete, &format!("/api/users/{admin}"), &token, None)
        .await;
    assert_eq!(status, Status::BadRequest);

    let (status, _) = harness
        .send(Delete, &format!("/api/users/{target}"), &token, None)
        .await;
    assert_eq!(status, Status::Ok);

    let (status, _) = harness
        .send(Get, &format!("/api/users/{target}"), &token, None)
        .await;
    assert_eq!(status, Status::NotFound);
}

#[tokio::test]
async fn admin_created_users_default_to_the_user_role() {
    let harness = Harness::new().await;
    harness.user("admin@example.com", &["Admin"]).await;
    let token = harness.token("admin@example.com").await;

    let (status, body) = harness
        .send(
            Post,
            "/api/users",
            &token,
            Some(json!({
                "email": "New@Example.com",
                "password": PASSWORD,
                "firstName": "New",
                "lastName": "Person",
            })),
        )
        .await;
    assert_eq!(status, Status::Created, "create failed: {body}");
    assert_eq!(body["data"]["email"], "new@example.com");
    assert_eq!(body["data"]["emailVerified"], true);
    assert_eq!(body["data"]["roles"][0]["name"], "User");

    let (status, _) = harness
        .send(
            Post,
            "/api/users",
            &token,
            Some(json!({
                "email": "new@example.com",
                "password": PASSWORD,
                "firstName": "New",
                "lastName": "Person",
            })),
        )
        .await;
    assert_eq!(status, Status::Conflict);
}

#[tokio::test]
async fn assign_roles_replaces_role_set_and_rejects_unknown_ids() {
    let harness = Harness::new().await;
    harness.user("root@example.com", &["Super Admin"]).await;
    let target = harness.user("target@example.com", &["User"]).await;
    let manager = harness.role_id("Manager").await;
    let token = harness.token("root@example.com").await;

    let (status, body) = harness
        .send(
            Post,
            &format!("/api/users/{target}/assign-roles"),
            &token,
            Some(json!({ "roleIds": [manager] })),
        )
        .await;
    assert_eq!(status, Status::Ok, "assign failed: {body}");
    let roles = body["data"]["roles"].as_array().expect("roles");
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0]["name"], "Manager");

    let (status, _) = harness
        .send(
            Post,
            &format!("/api/users/{target}/assign-roles"),
            &token,
            Some(json!({ "roleIds": [Uuid::new_v4()] })),
        )
        .await;
    assert_eq!(status, Status::BadRequest);
}

#[tokio::test]
async fn manager_cannot_create_roles() {
    let harness = Harness::new().await;
    harness.user("manager@example.com", &["Manager"]).await;
    let token = harness.token("manager@example.com").await;

    let (status, body) = harness
        .send(Post, "/api/roles", &token, Some(json!({ "name": "Auditor" })))
        .await;
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body["requiredPermissions"], json!(["role.create"]));
}

#[tokio::test]
async fn role_lifecycle_with_permissions() {
    let harness = Harness::new().await;
    harness.user("root@example.com", &["Super Admin"]).await;
    let token = harness.token("root@example.com").await;

    let (status, body) = harness
        .send(
            Post,
            "/api/roles/permissions",
            &token,
            Some(json!({ "resource": "Invoice", "action": "Export" })),
        )
        .await;
    assert_eq!(status, Status::Created, "permission create failed: {body}");
    assert_eq!(body["data"]["name"], "invoice.export");
    let permission_id = body["data"]["id"].as_str().expect("id").to_string();

    let (status, body) = harness
        .send(
            Post,
            "/api/roles",
            &token,
            Some(json!({ "name": "Billing", "permissions": [permission_id] })),
        )
        .await;
    assert_eq!(status, Status::Created, "role create failed: {body}");
    let role_id = body["data"]["id"].as_str().expect("id").to_string();
    assert_eq!(body["data"]["permissions"][0]["name"], "invoice.export");

    let (status, _) = harness
        .send(Post, "/api/roles", &token, Some(json!({ "name": "Billing" })))
        .await;
    assert_eq!(status, Status::Conflict);

    let (status, body) = harness
        .send(
            Put,
            &format!("/api/roles/{role_id}"),
            &token,
            Some(json!({ "permissions": ["reports.view", "audit.view"] })),
        )
        .await;
    assert_eq!(status, Status::Ok, "role update failed: {body}");
    assert_eq!(body["data"]["permissions"].as_array().map(Vec::len), Some(2));

    let (status, _) = harness
        .send(
            Put,
            &format!("/api/roles/{role_id}"),
            &token,
            Some(json!({ "permissions": ["no.such"] })),
        )
        .await;
    assert_eq!(status, Status::BadRequest);

    let (status, body) = harness
        .send(
            Post,
            &format!("/api/roles/{role_id}/attach-permissions"),
            &token,
            Some(json!({ "permissionIds": [permission_id] })),
        )
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["data"]["permissions"].as_array().map(Vec::len), Some(1));

    let (status, _) = harness
        .send(Delete, &format!("/api/roles/permissions/{permission_id}"), &token, None)
        .await;
    assert_eq!(status, Status::Ok);

    let (status, body) = harness
        .send(Get, &format!("/api/roles/{role_id}"), &token, None)
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["data"]["permissions"], json!([]));

    let (status, _) = harness
        .send(Delete, &format!("/api/roles/{role_id}"), &token, None)
        .await;
    assert_eq!(status, Status::Ok);
}

#[tokio::test]
async fn system_roles_cannot_be_deleted() {
    let harness = Harness::new().await;
    harness.user("root@example.com", &["Super Admin"]).await;
    let user_role = harness.role_id("User").await;
    let token = harness.token("root@example.com").await;

    let (status, body) = harness
        .send(Delete, &format!("/api/roles/{user_role}"), &token, None)
        .await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn permission_list_filters_by_resource() {
    let harness = Harness::new().await;
    harness.user("root@example.com", &["Super Admin"]).await;
    let token = harness.token("root@example.com").await;

    let (status, body) = harness
        .send(Get, "/api/roles/permissions?resource=user&limit=50", &token, None)
        .await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["meta"]["total"], 4);
}

#[tokio::test]
async fn deactivated_caller_is_rejected_on_next_request() {
    let harness = Harness::new().await;
    harness.user("root@example.com", &["Super Admin"]).await;
    let victim = harness.user("victim@example.com", &["Admin"]).await;
    let root_token = harness.token("root@example.com").await;
    let victim_token = harness.token("victim@example.com").await;

    let (status, _) = harness
        .send(Patch, &format!("/api/users/{victim}/toggle-status"), &root_token, None)
        .await;
    assert_eq!(status, Status::Ok);

    let (status, _) = harness.send(Get, "/api/users", &victim_token, None).await;
    assert_eq!(status, Status::Unauthorized);
}

#[tokio::test]
async fn create_role_with_wrong_field_type_is_a_bad_request() {
    let harness = Harness::new().await;
    harness.user("root@example.com", &["Super Admin"]).await;
    let token = harness.token("root@example.com").await;

    let (status, body) = harness
        .send(Post, "/api/roles", &token, Some(json!({ "description": "no name" })))
        .await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["errors"][0]["field"], "name");

    let (status, body) = harness
        .send(Post, "/api/roles", &token, Some(json!({ "name": 42 })))
        .await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["errors"][0]["field"], "body");
}

#[tokio::test]
async fn unknown_sort_field_is_a_bad_request() {
    let harness = Harness::new().await;
    harness.user("root@example.com", &["Super Admin"]).await;
    let token = harness.token("root@example.com").await;

    let (status, body) = harness.send(Get, "/api/users?sortBy=shoeSize", &token, None).await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn admin_cannot_grant_super_admin() {
    let harness = Harness::new().await;
    harness.user("admin@example.com", &["Admin"]).await;
    let target = harness.user("target@example.com", &["User"]).await;
    let super_admin = harness.role_id("Super Admin").await;
    let manager = harness.role_id("Manager").await;
    let token = harness.token("admin@example.com").await;

    let (status, body) = harness
        .send(
            Post,
            &format!("/api/users/{target}/assign-roles"),
            &token,
            Some(json!({ "roleIds": [manager, super_admin] })),
        )
        .await;
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body["message"], "insufficient role");

    let (status, body) = harness
        .send(
            Post,
            &format!("/api/users/{target}/assign-roles"),
            &token,
            Some(json!({ "roleIds": [manager] })),
        )
        .await;
    assert_eq!(status, Status::Ok, "assign failed: {body}");
}

#[tokio::test]
async fn user_updaters_read_roles_but_need_role_read_to_assign() {
    let harness = Harness::new().await;
    harness.user("root@example.com", &["Super Admin"]).await;
    let root_token = harness.token("root@example.com").await;

    let (status, body) = harness
        .send(Post, "/api/roles", &root_token, Some(json!({ "name": "Editor" })))
        .await;
    assert_eq!(status, Status::Created, "role create failed: {body}");
    let editor_role = body["data"]["id"].as_str().expect("id").to_string();
    let (status, body) = harness
        .send(
            Put,
            &format!("/api/roles/{editor_role}"),
            &root_token,
            Some(json!({ "permissions": ["user.update"] })),
        )
        .await;
    assert_eq!(status, Status::Ok, "role update failed: {body}");

    harness.user("editor@example.com", &["Editor"]).await;
    harness.user("plain@example.com", &["User"]).await;
    let target = harness.user("target@example.com", &["User"]).await;
    let manager = harness.role_id("Manager").await;
    let editor_token = harness.token("editor@example.com").await;
    let plain_token = harness.token("plain@example.com").await;

    let (status, body) = harness
        .send(Get, &format!("/api/roles/{manager}"), &editor_token, None)
        .await;
    assert_eq!(status, Status::Ok, "editor role read failed: {body}");
    assert_eq!(body["data"]["name"], "Manager");

    let (status, body) = harness
        .send(Get, &format!("/api/roles/{manager}"), &plain_token, None)
        .await;
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body["requiredPermissions"], json!(["role.read", "user.update"]));

    let (status, body) = harness
        .send(
            Post,
            &format!("/api/users/{target}/assign-roles"),
            &editor_token,
            Some(json!({ "roleIds": [manager] })),
        )
        .await;
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body["requiredPermissions"], json!(["role.read"]));
}
