//! Integration tests for the iLMS work items against a mock site.

use std::path::Path;
use std::time::Duration;

use ilmsdump_core::engine::META_FILE;
use ilmsdump_core::{
    CourseSelector, Engine, EngineOptions, Item, RetryPolicy, Session, SiteError, SkipRules,
    Transport,
};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SYLLABUS: &str = r#"<html><body>
<div id="hdr"><span class="pointer">Intro to Computing</span></div>
<div id="main"><div class="infoPath"><a href="/home.php">Home</a></div>
<p>Week 1: welcome</p></div>
</body></html>"#;

const NEWS: &str = r#"<html><body><div id="main"><div class="tableBox"><table>
<tr class="header"><td>No</td><td>Title</td></tr>
<tr class="row"><td><a href="/course.php?courseID=74&amp;f=news_show&amp;newsID=2001">1</a></td><td><a href="/course.php?courseID=74&amp;f=news_show&amp;newsID=2001">Midterm</a></td></tr>
</table></div></div></body></html>"#;

const NO_DATA: &str = r#"<html><body><div id="main"><div class="tableBox"><table>
<tr class="header"><td>No</td><td>Title</td></tr>
<tr><td colspan="2">No Data</td></tr>
</table></div></div></body></html>"#;

const SCORE_DISABLED: &str = r#"<html><body><div id="main">
<input type="button" value="Back" onclick="history.back()">
</div></body></html>"#;

const NO_GROUPS: &str = "<html><body><div>No group</div></body></html>";

fn session(server: &MockServer, dir: &Path) -> Session {
    let transport = Transport::with_policy(
        RetryPolicy::new(1, Duration::from_millis(5), 2),
        Duration::from_secs(10),
    )
    .expect("client should build");
    let origin = Url::parse(&server.uri()).expect("valid origin");
    Session::new(transport, origin, dir)
}

async fn mount_course_page(server: &MockServer, list: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path("/course.php"))
        .and(query_param("courseID", "74"))
        .and(query_param("f", list))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_course_74(server: &MockServer) {
    mount_course_page(server, "syllabus", SYLLABUS).await;
    mount_course_page(server, "news", NEWS).await;
    for list in ["doclist", "forumlist", "hwlist"] {
        mount_course_page(server, list, NO_DATA).await;
    }
    mount_course_page(server, "score", SCORE_DISABLED).await;
    mount_course_page(server, "grouplist", NO_GROUPS).await;

    let news = serde_json::json!({
        "news": {
            "note": "Exam on Friday",
            "poster": "Teacher",
            "attach": r#"<a href="/sys/read_attach.php?id=9001" title="notes.pdf">notes.pdf</a>"#,
        }
    });
    Mock::given(method("GET"))
        .and(path("/home/http_event_select.php"))
        .and(query_param("id", "2001"))
        .and(query_param("type", "n"))
        .respond_with(ResponseTemplate::new(200).set_body_string(news.to_string()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sys/read_attach.php"))
        .and(query_param("id", "9001"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PDFDATA".to_vec()))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_course_is_archived_with_its_attachments() {
    let server = MockServer::start().await;
    mount_course_74(&server).await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let session = session(&server, dir.path());

    let courses = session
        .resolve_courses(&[CourseSelector::Id(74)])
        .await
        .expect("course should resolve");
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0].name, "Intro to Computing");
    assert!(!courses[0].is_admin);

    let bytes = session.transport().bytes().clone();
    let engine = Engine::<Item>::new(session, dir.path(), bytes.clone()).with_options(
        EngineOptions {
            report_interval: Duration::from_millis(50),
            show_progress: false,
            listen_for_signals: false,
        },
    );
    let seeds = courses.into_iter().map(Item::Course).collect();
    let outcome = engine
        .run(seeds, SkipRules::new())
        .await
        .expect("run should not fail");

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    let summary = outcome.summary();
    assert_eq!(summary.completed("Course"), 1);
    assert_eq!(summary.completed("Announcement"), 1);
    assert_eq!(summary.completed("Attachment"), 1);
    assert_eq!(summary.completed("Score"), 0);
    assert_eq!(summary.completed("GroupList"), 0);
    assert!(bytes.total() > 0);

    let root = dir.path();
    let syllabus = std::fs::read_to_string(root.join("course/74/index.html")).expect("syllabus");
    assert!(syllabus.contains("Week 1: welcome"));
    assert!(!syllabus.contains("infoPath"));

    let news: serde_json::Value = serde_json::from_slice(
        &std::fs::read(root.join("announcement/2001/index.json")).expect("announcement"),
    )
    .expect("json");
    assert_eq!(news["news"]["poster"], "Teacher");

    let file = std::fs::read(root.join("attachment/9001/notes.pdf")).expect("attachment");
    assert_eq!(file, b"PDFDATA");

    let meta: serde_json::Value = serde_json::from_slice(
        &std::fs::read(root.join("attachment/9001").join(META_FILE)).expect("meta"),
    )
    .expect("json");
    assert_eq!(meta["saved_filename"], "notes.pdf");
    assert_eq!(meta["parent"], "Announcement-2001");

    let meta: serde_json::Value = serde_json::from_slice(
        &std::fs::read(root.join("course/74").join(META_FILE)).expect("meta"),
    )
    .expect("json");
    assert_eq!(meta["children"], serde_json::json!(["Announcement-2001"]));
}

#[tokio::test]
async fn test_inaccessible_course_is_user_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/course.php"))
        .and(query_param("courseID", "5"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "/course_login.php?courseID=5"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/course_login.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let err = session(&server, dir.path())
        .get_course(5)
        .await
        .expect_err("course should be rejected");

    assert!(matches!(err, SiteError::User(ref message) if message.contains("course_id=5")));
}

#[tokio::test]
async fn test_password_login_saves_session_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login_page.php"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "PHPSESSID=abc123; path=/")
                .set_body_string("<html>login</html>"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sys/lib/ajax/login_submit.php"))
        .and(body_string_contains("account=alice"))
        .and(body_string_contains("password=secret"))
        .and(body_string_contains("secCode=na"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"ret":{"status":"true","name":"Alice"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let session = session(&server, dir.path());

    let name = session
        .login_with_password("alice", "secret")
        .await
        .expect("login should succeed");
    assert_eq!(name, "Alice");
    assert_eq!(session.session_id().as_deref(), Some("abc123"));

    let path = session.save_credentials().await.expect("save credentials");
    assert_eq!(std::fs::read_to_string(path).expect("read"), "abc123\n");
    assert_eq!(
        session.load_credentials().await.expect("load").as_deref(),
        Some("abc123")
    );
}

#[tokio::test]
async fn test_rejected_password_is_login_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login_page.php"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sys/lib/ajax/login_submit.php"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"ret":{"status":"false","msg":"wrong password"}}"#),
        )
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");

    let err = session(&server, dir.path())
        .login_with_password("alice", "nope")
        .await
        .expect_err("login should fail");

    assert!(matches!(err, SiteError::LoginFailed(_)));
}

#[tokio::test]
async fn test_failed_item_leaves_checkpoint_listing_it_first() {
    let server = MockServer::start().await;
    mount_course_page(&server, "syllabus", SYLLABUS).await;
    mount_course_page(&server, "news", NEWS).await;
    for list in ["doclist", "forumlist", "hwlist"] {
        mount_course_page(&server, list, NO_DATA).await;
    }
    mount_course_page(&server, "score", SCORE_DISABLED).await;
    mount_course_page(&server, "grouplist", NO_GROUPS).await;
    Mock::given(method("GET"))
        .and(path("/home/http_event_select.php"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let dir = TempDir::new().expect("failed to create temp dir");
    let session = session(&server, dir.path());
    let course = session.get_course(74).await.expect("course");

    let bytes = session.transport().bytes().clone();
    let engine = Engine::<Item>::new(session, dir.path(), bytes).with_options(EngineOptions {
        report_interval: Duration::from_millis(50),
        show_progress: false,
        listen_for_signals: false,
    });
    let outcome = engine
        .run(vec![Item::Course(course)], SkipRules::new())
        .await
        .expect("run should not fail");

    let checkpoint = outcome.checkpoint().expect("checkpoint expected").to_path_buf();
    assert!(!outcome.is_completed());
    let (pending, _) = ilmsdump_core::engine::CheckpointStore::load::<Item>(&checkpoint)
        .await
        .expect("checkpoint should load");
    assert_eq!(pending.len(), 1);
    assert!(matches!(&pending[0], Item::Announcement(a) if a.id == 2001));
}
