//! `GitHubClient` against a mock GitHub API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dormancy::{
    username_set, EmailAddress, OrgDirectory, OrganizationName, ProviderError, Sleeper,
    SystemClock, Username,
};
use github::{GitHubClient, Transport};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingSleeper(Mutex<Vec<Duration>>);

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

fn client(server: &MockServer, sleeper: Arc<RecordingSleeper>) -> GitHubClient {
    let transport = Transport::with_base_url("test-token", &server.uri()).unwrap();
    GitHubClient::from_transport(
        OrganizationName::new("test-org").unwrap(),
        transport,
        sleeper,
        Arc::new(SystemClock),
    )
}

fn user(login: &str) -> Username {
    Username::new(login).unwrap()
}

async fn mount_rate_limit(server: &MockServer, reset: i64) {
    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": {
                "core": {"limit": 5000, "remaining": 0, "reset": reset},
                "graphql": {"limit": 5000, "remaining": 0, "reset": reset}
            }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn members_follow_graphql_cursors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({"variables": {"org": "test-org", "after": null}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"organization": {"membersWithRole": {
                "nodes": [{"login": "Alice"}, {"login": "bob"}],
                "pageInfo": {"hasNextPage": true, "endCursor": "c1"}
            }}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"after": "c1"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"organization": {"membersWithRole": {
                "nodes": [{"login": "carol"}],
                "pageInfo": {"hasNextPage": false, "endCursor": "c2"}
            }}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let members = client(&server, Arc::default()).members().await.unwrap();

    assert_eq!(members, username_set(["alice", "bob", "carol"]));
}

#[tokio::test]
async fn outside_collaborators_use_numbered_pages() {
    let server = MockServer::start().await;
    let full_page: Vec<_> = (0..100).map(|i| json!({"login": format!("user{i}")})).collect();
    Mock::given(method("GET"))
        .and(path("/orgs/test-org/outside_collaborators"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(full_page))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/test-org/outside_collaborators"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"login": "Olly"}])))
        .expect(1)
        .mount(&server)
        .await;

    let collaborators = client(&server, Arc::default())
        .outside_collaborators()
        .await
        .unwrap();

    assert_eq!(collaborators.len(), 101);
    assert!(collaborators.contains(&user("olly")));
}

#[tokio::test]
async fn verified_email_takes_first_address_or_missing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"login": "alice"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"user": {"organizationVerifiedDomainEmails": ["Alice@Justice.gov.uk", "a2@justice.gov.uk"]}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"login": "bob"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"user": {"organizationVerifiedDomainEmails": []}}
        })))
        .mount(&server)
        .await;

    let github = client(&server, Arc::default());

    assert_eq!(
        github.verified_email(&user("alice")).await.unwrap(),
        EmailAddress::Verified("alice@justice.gov.uk".to_string())
    );
    assert_eq!(
        github.verified_email(&user("bob")).await.unwrap(),
        EmailAddress::Missing
    );
}

#[tokio::test]
async fn audit_log_returns_newest_entry_or_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/test-org/audit-log"))
        .and(query_param("phrase", "actor:alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"@timestamp": 1_790_000_000_000_i64, "action": "repo.create"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/test-org/audit-log"))
        .and(query_param("phrase", "actor:bob"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let github = client(&server, Arc::default());

    assert_eq!(
        github.latest_audit_activity(&user("alice")).await.unwrap(),
        Some(Utc.timestamp_millis_opt(1_790_000_000_000).unwrap())
    );
    assert_eq!(github.latest_audit_activity(&user("bob")).await.unwrap(), None);
}

#[tokio::test]
async fn audit_log_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/test-org/audit-log"))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .mount(&server)
        .await;

    let err = client(&server, Arc::default())
        .latest_audit_activity(&user("alice"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Request { provider: "github", .. }));
}

#[tokio::test]
async fn removal_treats_missing_member_as_done() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/orgs/test-org/members/alice"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/orgs/test-org/members/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let github = client(&server, Arc::default());

    github.remove_member(&user("alice")).await.unwrap();
    github.remove_member(&user("ghost")).await.unwrap();
}

#[tokio::test]
async fn rest_rate_limit_waits_for_reset_then_retries_once() {
    let server = MockServer::start().await;
    let past_reset = Utc::now().timestamp() - 60;
    mount_rate_limit(&server, past_reset).await;
    Mock::given(method("DELETE"))
        .and(path("/orgs/test-org/members/alice"))
        .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/orgs/test-org/members/alice"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let sleeper = Arc::new(RecordingSleeper::default());
    client(&server, sleeper.clone())
        .remove_member(&user("alice"))
        .await
        .unwrap();

    assert_eq!(*sleeper.0.lock().unwrap(), vec![Duration::from_secs(5)]);
}

#[tokio::test]
async fn repeated_graphql_rate_limit_is_returned_after_one_retry() {
    let server = MockServer::start().await;
    mount_rate_limit(&server, Utc::now().timestamp() - 60).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{"type": "RATE_LIMITED", "message": "API rate limit exceeded"}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let sleeper = Arc::new(RecordingSleeper::default());
    let err = client(&server, sleeper.clone()).members().await.unwrap_err();

    assert!(
        matches!(err, ProviderError::RateLimited { provider: "github", ref resource } if resource == "graphql")
    );
    assert_eq!(sleeper.0.lock().unwrap().len(), 1);
}
