// End-to-end tests for the change feed: committed store writes reach
// subscribed mounts as debounced refreshes, both through the dispatcher and
// through the SSE route.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::test_app;
use futures::StreamExt;
use interview_orchestrator::changefeed::{FeedView, MountKey, Refresh};
use interview_orchestrator::create_router;
use interview_orchestrator::report::SaveReportRequest;
use interview_orchestrator::store::NewInvitation;
use interview_orchestrator::transcript::SaveTranscriptRequest;
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

fn report(invitation_id: Uuid, company: &str) -> SaveReportRequest {
    SaveReportRequest {
        invitation_id: Some(invitation_id.to_string()),
        company_id: Some(company.to_string()),
        job_id: Some("job-1".to_string()),
        total_score: Some(70.0),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_writes_in_one_burst_refresh_once() {
    let fixture = test_app().await;
    let mut sub = fixture
        .state
        .feed
        .subscribe(MountKey::new("acme", "analytics-1"), FeedView::Analytics.tables())
        .await
        .unwrap();

    let invitation_id = Uuid::new_v4();
    fixture.state.reports.save(report(invitation_id, "acme")).await.unwrap();
    fixture
        .state
        .transcripts
        .save(SaveTranscriptRequest {
            invitation_id: Some(invitation_id.to_string()),
            company_id: Some("acme".to_string()),
            transcript: Some(json!([{"speaker": "agent", "text": "Hello"}])),
            ..Default::default()
        })
        .await
        .unwrap();

    let refresh = tokio::time::timeout(Duration::from_secs(5), sub.next_refresh())
        .await
        .unwrap();
    assert_eq!(refresh, Some(Refresh::Changes { notifications: 2 }));

    let more = tokio::time::timeout(Duration::from_millis(800), sub.next_refresh()).await;
    assert!(more.is_err());
}

#[tokio::test]
async fn test_views_only_see_their_tables_and_company() {
    let fixture = test_app().await;
    let mut management = fixture
        .state
        .feed
        .subscribe(MountKey::new("acme", "list"), FeedView::InterviewManagement.tables())
        .await
        .unwrap();

    // Report for acme: analytics table only
    fixture.state.reports.save(report(Uuid::new_v4(), "acme")).await.unwrap();
    // Invitation for another company
    fixture
        .db
        .insert_invitation(NewInvitation {
            company_id: "globex".to_string(),
            candidate_email: "bob@example.com".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let refresh = tokio::time::timeout(Duration::from_millis(800), management.next_refresh()).await;
    assert!(refresh.is_err(), "unrelated writes must not refresh");

    fixture
        .db
        .insert_invitation(NewInvitation {
            company_id: "acme".to_string(),
            candidate_email: "ada@example.com".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let refresh = tokio::time::timeout(Duration::from_secs(5), management.next_refresh())
        .await
        .unwrap();
    assert_eq!(refresh, Some(Refresh::Changes { notifications: 1 }));
}

#[tokio::test]
async fn test_sse_stream_delivers_refresh_and_tears_down() {
    let fixture = test_app().await;
    let app = create_router(fixture.state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/changes/acme?mount=dash-1&view=analytics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let mut frames = response.into_body().into_data_stream();
    let opened = frames.next().await.unwrap().unwrap();
    let opened = String::from_utf8_lossy(&opened).into_owned();
    assert!(opened.contains("event: subscribed"));
    assert!(opened.contains("dash-1"));
    assert_eq!(fixture.state.feed.active_mounts(), 1);

    fixture.state.reports.save(report(Uuid::new_v4(), "acme")).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let frame = String::from_utf8_lossy(&frame).into_owned();
    assert!(frame.contains("event: refresh"));
    assert!(frame.contains("\"reason\":\"changes\""));

    // Visibility transitions reach the live mount
    let visibility = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/changes/acme/mounts/dash-1/visibility")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"state": "hidden"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(visibility.status(), StatusCode::OK);

    drop(frames);
    assert_eq!(fixture.state.feed.active_mounts(), 0);
}

#[tokio::test]
async fn test_unknown_view_is_rejected() {
    let app = create_router(test_app().await.state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/changes/acme?view=payroll")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
