#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use rust_xlsxwriter::Workbook as XlsxWorkbook;
use serde_json::{Value, json};
use sheetcharts::app::{AppState, build_router};
use sheetcharts::config::AppConfig;
use sheetcharts::loader::SpreadsheetFormat;
use sheetcharts::mailer::{MailResult, ResetNotifier};
use sheetcharts::metrics::InMemoryMetrics;
use sheetcharts::error::{StoreError, StoreResult};
use sheetcharts::store::{
    ChartDraft, ChartRecord, DeletedUser, FileRecord, FileSummary, JsonStore, RecordStore, Upsert,
    User,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "sheetchartsboundary";

/// Keeps reset codes instead of mailing them.
#[derive(Default)]
struct CapturedCodes(Mutex<Vec<(String, String)>>);

impl ResetNotifier for CapturedCodes {
    fn send_password_reset(&self, to_email: &str, reset_code: &str) -> MailResult {
        self.0
            .lock()
            .unwrap()
            .push((to_email.to_string(), reset_code.to_string()));
        Ok(())
    }
}

/// A mail relay that is always down.
struct UnreachableRelay;

impl ResetNotifier for UnreachableRelay {
    fn send_password_reset(&self, _to_email: &str, _reset_code: &str) -> MailResult {
        Err("connection refused".into())
    }
}

/// Delegates to an in-memory store but refuses to record files.
struct FileInsertFails(JsonStore);

impl RecordStore for FileInsertFails {
    fn get_user(&self, username: &str) -> StoreResult<Option<User>> {
        self.0.get_user(username)
    }
    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.0.find_user_by_email(email)
    }
    fn list_users(&self) -> StoreResult<Vec<User>> {
        self.0.list_users()
    }
    fn insert_user(&self, user: User) -> StoreResult<()> {
        self.0.insert_user(user)
    }
    fn update_user(&self, user: User) -> StoreResult<()> {
        self.0.update_user(user)
    }
    fn delete_user(&self, username: &str) -> StoreResult<Option<DeletedUser>> {
        self.0.delete_user(username)
    }
    fn insert_file(&self, _record: FileRecord) -> StoreResult<()> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }
    fn get_file(&self, id: &str) -> StoreResult<Option<FileRecord>> {
        self.0.get_file(id)
    }
    fn list_files(&self, owner: Option<&str>) -> StoreResult<Vec<FileSummary>> {
        self.0.list_files(owner)
    }
    fn delete_file(&self, id: &str) -> StoreResult<Option<FileRecord>> {
        self.0.delete_file(id)
    }
    fn upsert_chart(&self, draft: ChartDraft) -> StoreResult<(ChartRecord, Upsert)> {
        self.0.upsert_chart(draft)
    }
    fn get_chart(&self, id: &str) -> StoreResult<Option<ChartRecord>> {
        self.0.get_chart(id)
    }
    fn list_charts(&self, owner: &str, file_id: Option<&str>) -> StoreResult<Vec<ChartRecord>> {
        self.0.list_charts(owner, file_id)
    }
    fn delete_chart(&self, id: &str) -> StoreResult<Option<ChartRecord>> {
        self.0.delete_chart(id)
    }
}

struct TestApp {
    router: Router,
    codes: Arc<CapturedCodes>,
    data: TempDir,
}

fn test_app() -> TestApp {
    let codes = Arc::new(CapturedCodes::default());
    app_with(Arc::new(JsonStore::in_memory()), codes.clone(), codes)
}

fn app_with(
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn ResetNotifier>,
    codes: Arc<CapturedCodes>,
) -> TestApp {
    let data = tempfile::tempdir().unwrap();
    let config = AppConfig {
        data_dir: data.path().to_path_buf(),
        admin_users: vec!["admin".to_string()],
        ..AppConfig::default()
    };
    let state = AppState::new(config, store, Arc::new(InMemoryMetrics::default()), notifier);

    TestApp {
        router: build_router(Arc::new(state)),
        codes,
        data,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, cookie, body.to_vec())
}

async fn json_request(
    app: &TestApp,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let (status, _, bytes) = send(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Registers and logs in `username`, returning the session cookie.
async fn sign_in(app: &TestApp, username: &str) -> String {
    let credentials = json!({
        "username": username,
        "email": format!("{}@example.com", username),
        "password": "correct horse",
    });
    let (status, _) = json_request(app, "POST", "/api/auth/register", None, Some(credentials.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(credentials.to_string()))
        .unwrap();
    let (status, cookie, _) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    cookie.expect("login sets a session cookie")
}

fn sales_xlsx() -> Vec<u8> {
    let mut workbook = XlsxWorkbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Region").unwrap();
    sheet.write_string(0, 1, "Sales").unwrap();
    for (i, (region, sales)) in [("East", 10.0), ("West", 20.0), ("East", 5.0)].iter().enumerate() {
        sheet.write_string((i + 1) as u32, 0, *region).unwrap();
        sheet.write_number((i + 1) as u32, 1, *sales).unwrap();
    }
    sheet.write_string(4, 0, "North").unwrap();
    workbook.save_to_buffer().unwrap()
}

async fn upload(app: &TestApp, cookie: &str, name: &str, mime: &str, bytes: &[u8]) -> (StatusCode, Value) {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{n}\"\r\nContent-Type: {m}\r\n\r\n",
            b = BOUNDARY,
            n = name,
            m = mime
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/api/files")
        .header(header::COOKIE, cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, _, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn health_is_public_and_files_are_not() {
    let app = test_app();

    let (status, body) = json_request(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = json_request(&app, "GET", "/api/files", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = json_request(&app, "GET", "/api/files", Some("session=bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registration_rejects_duplicates_and_weak_passwords() {
    let app = test_app();
    sign_in(&app, "alice").await;

    let again = json!({ "username": "alice", "email": "other@example.com", "password": "long enough" });
    let (status, _) = json_request(&app, "POST", "/api/auth/register", None, Some(again)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let weak = json!({ "username": "bob", "email": "bob@example.com", "password": "short" });
    let (status, _) = json_request(&app, "POST", "/api/auth/register", None, Some(weak)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let wrong = json!({ "username": "alice", "password": "not the password" });
    let (status, _) = json_request(&app, "POST", "/api/auth/login", None, Some(wrong)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_build_save_and_export_a_chart() {
    let app = test_app();
    let cookie = sign_in(&app, "alice").await;

    let (status, file) = upload(&app, &cookie, "sales.xlsx", SpreadsheetFormat::XLSX_MIME, &sales_xlsx()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(file["processed"], true);
    assert_eq!(file["totalRowCount"], 4);
    assert_eq!(file["columns"], json!(["Region", "Sales"]));
    assert_eq!(file["preview"].as_array().unwrap().len(), 4);
    let file_id = file["id"].as_str().unwrap().to_string();

    let request = json!({ "xColumn": "Region", "yColumn": "Sales", "chartType": "bar" });
    let (status, series) = json_request(
        &app,
        "POST",
        &format!("/api/files/{}/series", file_id),
        Some(&cookie),
        Some(request.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(series["categories"], json!(["East", "West"]));
    assert_eq!(series["values"], json!([15.0, 20.0]));
    assert_eq!(series["coverage"]["eligibleRows"], 3);

    let (status, analysis) = json_request(
        &app,
        "POST",
        &format!("/api/files/{}/analysis", file_id),
        Some(&cookie),
        Some(json!({ "xColumn": "Region", "yColumn": "Sales", "chartType": "pie" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(analysis["analysis"]["confidence"], "medium");

    let save = json!({
        "fileId": file_id,
        "xColumn": "Region",
        "yColumn": "Sales",
        "chartType": "bar",
        "title": "Sales by region",
    });
    let (status, chart) = json_request(&app, "POST", "/api/charts", Some(&cookie), Some(save.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let chart_id = chart["id"].as_str().unwrap().to_string();

    let (status, again) = json_request(&app, "POST", "/api/charts", Some(&cookie), Some(save)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], chart_id.as_str());

    let (status, view) = json_request(&app, "GET", &format!("/api/charts/{}", chart_id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["chart"]["title"], "Sales by region");
    assert_eq!(view["series"]["values"], json!([15.0, 20.0]));

    let request = Request::builder()
        .uri(format!("/api/charts/{}/export?format=csv", chart_id))
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "Region,Sales\nEast,15\nWest,20\n");

    let (status, _) = json_request(
        &app,
        "GET",
        &format!("/api/charts/{}/export?format=pdf", chart_id),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, charts) = json_request(
        &app,
        "GET",
        &format!("/api/charts?fileId={}", file_id),
        Some(&cookie),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(charts.as_array().unwrap().len(), 1);

    let (status, _) = json_request(&app, "DELETE", &format!("/api/files/{}", file_id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = json_request(&app, "GET", &format!("/api/charts/{}", chart_id), Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unreadable_uploads_are_recorded_as_unprocessed() {
    let app = test_app();
    let cookie = sign_in(&app, "alice").await;

    let (status, file) = upload(
        &app,
        &cookie,
        "notes.xlsx",
        SpreadsheetFormat::XLSX_MIME,
        b"this is a text file with a spreadsheet name",
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(file["processed"], false);
    assert!(!file["processingError"].as_str().unwrap().is_empty());

    let (status, files) = json_request(&app, "GET", "/api/files", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(files.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn non_spreadsheet_types_are_rejected_before_parsing() {
    let app = test_app();
    let cookie = sign_in(&app, "alice").await;

    let (status, body) = upload(&app, &cookie, "notes.txt", "text/plain", b"hello").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("text/plain"));

    let (_, files) = json_request(&app, "GET", "/api/files", Some(&cookie), None).await;
    assert!(files.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn other_users_files_read_as_missing() {
    let app = test_app();
    let alice = sign_in(&app, "alice").await;
    let bob = sign_in(&app, "bob").await;

    let (_, file) = upload(&app, &alice, "sales.xlsx", SpreadsheetFormat::XLSX_MIME, &sales_xlsx()).await;
    let file_id = file["id"].as_str().unwrap();

    let (status, _) = json_request(&app, "GET", &format!("/api/files/{}", file_id), Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = json_request(&app, "DELETE", &format!("/api/files/{}", file_id), Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = json_request(&app, "GET", &format!("/api/files/{}", file_id), Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_need_the_admin_role() {
    let app = test_app();
    let alice = sign_in(&app, "alice").await;
    let admin = sign_in(&app, "admin").await;

    let (status, _) = json_request(&app, "GET", "/api/admin/users", Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    upload(&app, &alice, "sales.xlsx", SpreadsheetFormat::XLSX_MIME, &sales_xlsx()).await;

    let (status, users) = json_request(&app, "GET", "/api/admin/users", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 2);

    let (status, stats) = json_request(&app, "GET", "/api/admin/stats", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["users"], 2);
    assert_eq!(stats["files"], 1);
    assert_eq!(stats["usage"]["byKind"]["upload"], 1);

    let (status, stats) =
        json_request(&app, "GET", "/api/admin/stats?windowHours=1", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["usage"]["windowSecs"], 3600);

    let (status, _) = json_request(
        &app,
        "GET",
        "/api/admin/stats?windowHours=18446744073709551615",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json_request(&app, "DELETE", "/api/admin/users/alice", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // The deleted user's session ends with the account.
    let (status, _) = json_request(&app, "GET", "/api/files", Some(&alice), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, files) = json_request(&app, "GET", "/api/admin/files", Some(&admin), None).await;
    assert!(files.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn password_reset_round_trip() {
    let app = test_app();
    sign_in(&app, "alice").await;

    let (status, _) = json_request(
        &app,
        "POST",
        "/api/auth/forgot-password",
        None,
        Some(json!({ "email": "nobody@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.codes.0.lock().unwrap().is_empty());

    let (status, _) = json_request(
        &app,
        "POST",
        "/api/auth/forgot-password",
        None,
        Some(json!({ "email": "alice@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = app.codes.0.lock().unwrap()[0].1.clone();

    let (status, _) = json_request(
        &app,
        "POST",
        "/api/auth/reset-password",
        None,
        Some(json!({ "email": "alice@example.com", "resetCode": "WRONG123", "newPassword": "brand new pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = json_request(
        &app,
        "POST",
        "/api/auth/reset-password",
        None,
        Some(json!({ "email": "alice@example.com", "resetCode": code, "newPassword": "brand new pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let login = json!({ "username": "alice", "password": "brand new pass" });
    let (status, account) = json_request(&app, "POST", "/api/auth/login", None, Some(login)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(account["username"], "alice");
    assert_eq!(account["isAdmin"], false);
}

#[tokio::test]
async fn forgot_password_hides_mail_failures() {
    let app = app_with(
        Arc::new(JsonStore::in_memory()),
        Arc::new(UnreachableRelay),
        Arc::new(CapturedCodes::default()),
    );
    sign_in(&app, "alice").await;

    let (known, known_body) = json_request(
        &app,
        "POST",
        "/api/auth/forgot-password",
        None,
        Some(json!({ "email": "alice@example.com" })),
    )
    .await;
    let (unknown, unknown_body) = json_request(
        &app,
        "POST",
        "/api/auth/forgot-password",
        None,
        Some(json!({ "email": "nobody@example.com" })),
    )
    .await;

    assert_eq!(known, StatusCode::OK);
    assert_eq!(unknown, StatusCode::OK);
    assert_eq!(known_body, unknown_body);
}

#[tokio::test]
async fn unrecorded_uploads_do_not_leave_bytes_behind() {
    let codes = Arc::new(CapturedCodes::default());
    let app = app_with(Arc::new(FileInsertFails(JsonStore::in_memory())), codes.clone(), codes);
    let alice = sign_in(&app, "alice").await;

    let (status, body) = upload(&app, &alice, "sales.xlsx", SpreadsheetFormat::XLSX_MIME, &sales_xlsx()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());

    let owner_dir = app.data.path().join("uploads").join("alice");
    let leftovers = std::fs::read_dir(&owner_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = test_app();
    let cookie = sign_in(&app, "alice").await;

    let (status, me) = json_request(&app, "GET", "/api/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "alice@example.com");

    let (status, _) = json_request(&app, "POST", "/api/auth/logout", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = json_request(&app, "GET", "/api/me", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
