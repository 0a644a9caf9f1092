//! Notify and Slack adapters against mock servers.

use chrono::{TimeZone, Utc};
use dormancy::{
    EmailNotifier, OperatorAlerts, OrganizationName, Personalisation, ProviderError, TemplateId,
};
use notify::{NotifyClient, SlackAlerts};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str =
    "test_key-26785a09-ab16-4eb0-8407-a37497a57506-3d844edf-8d35-48ac-975b-e847b4f122b0";
const REPLY_TO: &str = "6767e190-996f-462c-b7f8-9bafe7b96a01";

fn template(id: &str) -> TemplateId {
    TemplateId::new(id).unwrap()
}

#[tokio::test]
async fn send_email_posts_template_personalisation_and_reply_to() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/notifications/email"))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({
            "email_address": "alice@justice.gov.uk",
            "template_id": "first-template",
            "personalisation": {"login_date": "19/11/2026"},
            "email_reply_to_id": REPLY_TO
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "n1"})))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        NotifyClient::with_base_url(API_KEY, Some(REPLY_TO.to_string()), &server.uri()).unwrap();
    let personalisation =
        Personalisation::from([("login_date".to_string(), "19/11/2026".to_string())]);

    client
        .send_email(&template("first-template"), "alice@justice.gov.uk", &personalisation)
        .await
        .unwrap();
}

#[tokio::test]
async fn send_email_error_status_is_a_request_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/notifications/email"))
        .respond_with(ResponseTemplate::new(400).set_body_string("BadRequestError"))
        .mount(&server)
        .await;

    let client = NotifyClient::with_base_url(API_KEY, None, &server.uri()).unwrap();
    let err = client
        .send_email(&template("t"), "a@b.gov.uk", &Personalisation::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Request { provider: "notify", .. }));
}

#[tokio::test]
async fn failed_notifications_are_filtered_by_template() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/notifications"))
        .and(query_param("status", "failed"))
        .and(query_param("template_type", "email"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "notifications": [
                {
                    "email_address": "alice@justice.gov.uk",
                    "created_at": "2026-10-19T09:02:03.000000Z",
                    "status": "permanent-failure",
                    "template": {"id": "first-template", "version": 1, "uri": "x"}
                },
                {
                    "email_address": "bob@justice.gov.uk",
                    "created_at": "2026-10-19T09:02:03.000000Z",
                    "status": "permanent-failure",
                    "template": {"id": "another-template", "version": 1, "uri": "x"}
                }
            ],
            "links": {"current": "x"}
        })))
        .mount(&server)
        .await;

    let client = NotifyClient::with_base_url(API_KEY, None, &server.uri()).unwrap();
    let failed = client
        .failed_notifications(&template("first-template"))
        .await
        .unwrap();

    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].email_address, "alice@justice.gov.uk");
    assert_eq!(failed[0].status, "permanent-failure");
    assert_eq!(
        failed[0].created_at,
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 2, 3).unwrap()
    );
}

#[test]
fn bad_api_key_is_rejected_before_any_request() {
    assert!(NotifyClient::new("not-a-key", None).is_err());
}

#[tokio::test]
async fn slack_alert_posts_to_channel_with_bot_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .and(header("authorization", "Bearer xoxb-test"))
        .and(body_partial_json(json!({
            "channel": "C123",
            "text": "*Dormant Users Automation*\n\nRemoved 2 users from the test-org GitHub Organisation."
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let slack = SlackAlerts::with_base_url("xoxb-test", "C123", &server.uri()).unwrap();
    slack
        .users_removed(&OrganizationName::new("test-org").unwrap(), 2)
        .await
        .unwrap();
}

#[tokio::test]
async fn slack_not_ok_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"ok": false, "error": "channel_not_found"})),
        )
        .mount(&server)
        .await;

    let slack = SlackAlerts::with_base_url("xoxb-test", "C404", &server.uri()).unwrap();
    let err = slack
        .undelivered_emails(
            &OrganizationName::new("test-org").unwrap(),
            &["a@b.gov.uk".to_string()],
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("channel_not_found"));
}
