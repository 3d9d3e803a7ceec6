//! RegistryClient and the state machines against the in-process mock API.

mod common;

use chemreg::client::RegistryClient;
use chemreg::config::{Config, UnauthorizedPolicy};
use chemreg::error::ApiError;
use chemreg::import::{ImportPhase, ImportPoller, PollSettings};
use chemreg::models::{
    Credentials, DocType, FilterValue, ProfileUpdate, SupportTicket, TokenPair, UploadFile,
};
use chemreg::query::{QueryComposer, RowQuery, SearchSession, SearchSettings};
use chemreg::record::{flatten, SubstanceRecord};
use chemreg::session::{AppContext, TokenStore};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn config_for(base_url: &str) -> Config {
    let mut config = Config::minimal();
    config.api.base_url = base_url.to_string();
    config
}

fn logged_in_store() -> Arc<TokenStore> {
    let store = TokenStore::in_memory();
    store
        .save(TokenPair {
            access: common::ACCESS_TOKEN.into(),
            refresh: "refresh-token".into(),
        })
        .unwrap();
    Arc::new(store)
}

async fn client() -> (RegistryClient, Arc<common::Mock>) {
    let (url, mock) = common::spawn().await;
    let client = RegistryClient::new(&config_for(&url), logged_in_store()).unwrap();
    (client, mock)
}

#[tokio::test]
async fn login_then_profile_carries_bearer() {
    let (url, mock) = common::spawn().await;
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = config_for(&url);
    config.auth.session_path = dir.path().join("session.json");
    let ctx = AppContext::new(config).unwrap();

    let err = ctx.client().profile().await.unwrap_err();
    assert!(err.is_unauthorized());

    ctx.login("operator", "secret").await.unwrap();
    assert!(dir.path().join("session.json").exists());

    let profile = ctx.profile().await.unwrap();
    assert_eq!(profile.username, "operator");
    let company = profile.company.unwrap();
    assert_eq!(company.roles(), vec!["manufacturer", "exporter"]);

    let last = mock.auth_headers.lock().unwrap().last().cloned().flatten();
    assert_eq!(last, Some(format!("Bearer {}", common::ACCESS_TOKEN)));

    ctx.logout().unwrap();
    assert!(!ctx.tokens().is_authenticated());
}

#[tokio::test]
async fn bad_credentials_are_unauthorized() {
    let (client, _mock) = client().await;
    let err = client
        .login(&Credentials {
            username: "operator".into(),
            password: "wrong".into(),
        })
        .await
        .unwrap_err();
    match err {
        ApiError::Unauthorized { detail } => assert!(detail.contains("not valid")),
        other => panic!("expected Unauthorized, got {:?}", other),
    }
}

#[tokio::test]
async fn unauthorized_policy_decides_logout() {
    let (url, _mock) = common::spawn().await;
    let stale = || {
        let store = TokenStore::in_memory();
        store
            .save(TokenPair {
                access: "expired".into(),
                refresh: "r".into(),
            })
            .unwrap();
        Arc::new(store)
    };

    let tokens = stale();
    let client = RegistryClient::new(&config_for(&url), tokens.clone()).unwrap();
    assert!(client.profile().await.unwrap_err().is_unauthorized());
    assert!(tokens.is_authenticated(), "ignore policy keeps the session");

    let mut config = config_for(&url);
    config.auth.on_unauthorized = UnauthorizedPolicy::Logout;
    let tokens = stale();
    let client = RegistryClient::new(&config, tokens.clone()).unwrap();
    assert!(client.profile().await.unwrap_err().is_unauthorized());
    assert!(!tokens.is_authenticated(), "logout policy clears the session");
}

#[tokio::test]
async fn list_sends_composed_params() {
    let (client, mock) = client().await;
    let mut filters = BTreeMap::new();
    filters.insert("sanpin_class".to_string(), FilterValue::from("1"));
    filters.insert("is_pops".to_string(), FilterValue::from(true));

    let page = client
        .list_elements(&RowQuery::compose(" acetone ", &filters, "-updated_at"))
        .await
        .unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.results[0].primary_name_ru, "Ацетон");

    let page = client
        .list_elements(&RowQuery::compose("", &BTreeMap::new(), "-updated_at"))
        .await
        .unwrap();
    assert_eq!(page.results.len(), 1);

    let queries = mock.element_queries.lock().unwrap().clone();
    let pair = |k: &str, v: &str| (k.to_string(), v.to_string());
    assert_eq!(
        queries[0],
        vec![
            pair("search", "acetone"),
            pair("is_pops", "true"),
            pair("sanpin_class", "1"),
        ]
    );
    assert_eq!(queries[1], vec![pair("ordering", "-updated_at")]);
}

#[tokio::test]
async fn facets_keep_server_order_and_keys() {
    let (client, mock) = client().await;
    let composer = QueryComposer::new(SearchSettings::default());
    composer.toggle_filter("sanpin_class", "4");
    composer.set_text("acet");
    composer.flush_text();

    let groups = client.facets(&composer.facet_query()).await.unwrap();
    let keys: Vec<&str> = groups.iter().map(|g| g.key.as_str()).collect();
    assert_eq!(keys, vec!["sanpin_class", "is_pops"]);
    assert_eq!(groups[1].options[0].value, FilterValue::Text("true".into()));

    // Filters never reach the facet request.
    let sent = mock.facet_queries.lock().unwrap().clone();
    assert_eq!(sent, vec![vec![("search".to_string(), "acet".to_string())]]);
}

#[tokio::test]
async fn columns_lead_with_primary_name() {
    let (client, _mock) = client().await;
    let columns = client.registry_columns().await.unwrap();
    assert_eq!(columns[0].field, "primary_name_ru");
    assert_eq!(columns[0].header_name, "Name");
    assert_eq!(columns[2].min_width, 150);
}

#[tokio::test]
async fn suggest_queries_long_enough_text() {
    let (client, _mock) = client().await;
    let items = client.suggest("ац").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].primary_name_ru, "ац (match)");
}

#[tokio::test]
async fn element_read_and_missing() {
    let (client, _mock) = client().await;
    let record = client.element(7).await.unwrap();
    let flat = flatten(&record);
    assert_eq!(flat.display("appearance"), "Liquid");
    assert_eq!(flat.display("sanpin_class"), "4");

    match client.element(999).await.unwrap_err() {
        ApiError::NotFound { path } => assert_eq!(path, "/registry/elements/999/"),
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn create_sends_sectioned_payload_with_null_cas() {
    let (client, mock) = client().await;
    let record: SubstanceRecord = serde_json::from_value(json!({
        "primary_name_ru": "Вода",
        "cas_number": "   ",
        "sec1_identification": {"notes": "a"},
        "sec23_extra": {"notes": "b"}
    }))
    .unwrap();

    let saved = client.create_element(&record).await.unwrap();
    assert_eq!(saved.id, Some(12));

    let body = mock.bodies.lock().unwrap().last().cloned().unwrap();
    assert_eq!(body["cas_number"], Value::Null);
    assert_eq!(body["sec1_identification"]["notes"], json!("a"));
    assert_eq!(body["sec23_extra"]["notes"], json!("b"));
    assert!(body.get("notes").is_none());
}

#[tokio::test]
async fn validation_errors_map_to_fields() {
    let (client, _mock) = client().await;
    let record = SubstanceRecord {
        primary_name_ru: " ".into(),
        ..Default::default()
    };
    match client.update_element(7, &record).await.unwrap_err() {
        ApiError::Validation(fields) => {
            assert_eq!(fields.len(), 2);
            assert_eq!(
                fields.get("sec2_physical.ph"),
                Some(&["A valid number is required.".to_string()][..])
            );
            assert!(fields.summary().contains("primary_name_ru: This field may not be blank."));
        }
        other => panic!("expected Validation, got {:?}", other),
    }
}

#[tokio::test]
async fn import_polls_real_client_to_done() {
    let (client, mock) = client().await;
    let poller = ImportPoller::new(
        Arc::new(client),
        PollSettings {
            interval: Duration::from_millis(20),
            max_duration: Some(Duration::from_secs(10)),
        },
    );
    poller.select_file(UploadFile::new("file.xlsx", b"PK\x03\x04".to_vec()));
    assert!(poller.start());

    let state = poller.wait_terminal().await;
    assert_eq!(state.phase, ImportPhase::Succeeded);
    assert_eq!(state.polls, 2);
    assert_eq!(state.summary().unwrap().to_string(), "12 imported, 0 errors");

    let part = mock.part("file").unwrap();
    assert_eq!(part.file_name.as_deref(), Some("file.xlsx"));
    assert_eq!(part.bytes, b"PK\x03\x04".to_vec());
}

#[tokio::test]
async fn search_session_against_real_client() {
    let (client, mock) = client().await;
    let composer = QueryComposer::new(SearchSettings {
        debounce: Duration::from_millis(30),
        default_ordering: "-updated_at".into(),
    });
    let session = SearchSession::start(Arc::new(client), &composer);

    composer.set_text("ацетон");
    composer.toggle_filter("sanpin_class", "4");
    let wanted = RowQuery::compose(
        "ацетон",
        &composer.active_filters(),
        "-updated_at",
    );

    let mut rx = session.subscribe();
    let results = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|r| !r.loading && r.query == wanted),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(results.total, 1);
    assert_eq!(results.facets.len(), 2);
    assert!(results.error.is_none());

    let facet_searches: Vec<_> = mock.facet_queries.lock().unwrap().clone();
    assert_eq!(facet_searches.len(), 2, "initial and after text settled");
    session.dispose();
}

#[tokio::test]
async fn downloads_carry_bytes_and_names() {
    let (client, _mock) = client().await;
    let template = client.download_template().await.unwrap();
    assert_eq!(template.file_name.as_deref(), Some("registry_template.xlsx"));
    assert!(template.bytes.starts_with(b"PK"));

    let pdf = client.download_passport(7).await.unwrap();
    assert_eq!(pdf.file_name, None);
    assert_eq!(pdf.bytes, b"%PDF-1.4 passport 7".to_vec());
}

#[tokio::test]
async fn attachments_structure_and_tickets() {
    let (client, mock) = client().await;
    let file = UploadFile::new("cert.pdf", b"%PDF".to_vec());
    let attachment = client
        .upload_attachment(7, &file, "certificate", DocType::Certificate)
        .await
        .unwrap();
    assert_eq!(attachment.id, 47);
    assert_eq!(attachment.doc_type, DocType::Certificate);
    assert_eq!(mock.part("description").unwrap().bytes, b"certificate".to_vec());

    client.delete_attachment(7, 47).await.unwrap();
    assert_eq!(*mock.deleted.lock().unwrap(), vec![(7, 47)]);

    client
        .upload_structure(7, &UploadFile::new("s.png", vec![0x89, b'P']))
        .await
        .unwrap();
    assert_eq!(mock.part("image").unwrap().file_name.as_deref(), Some("s.png"));

    client
        .submit_ticket(&SupportTicket {
            subject: "Import".into(),
            message: "Row 4 fails".into(),
            contact_email: None,
            file: None,
        })
        .await
        .unwrap();
    assert!(mock.part("subject").is_some());
    assert!(mock.part("contact_email").is_none());
}

#[tokio::test]
async fn profile_update_json_and_multipart() {
    let (client, mock) = client().await;
    let mut update = ProfileUpdate {
        email: Some("new@example.com".into()),
        ..Default::default()
    };
    update.company.insert("phone".into(), json!("+998 71 000"));

    client.update_profile(&update, None).await.unwrap();
    let body = mock.bodies.lock().unwrap().last().cloned().unwrap();
    assert_eq!(body["company"]["phone"], json!("+998 71 000"));

    let logo = UploadFile::new("logo.png", vec![1, 2, 3]);
    client.update_profile(&update, Some(&logo)).await.unwrap();
    assert_eq!(mock.part("logo").unwrap().bytes, vec![1, 2, 3]);
    let company = mock.part("company").unwrap();
    let company: Value = serde_json::from_slice(&company.bytes).unwrap();
    assert_eq!(company["phone"], json!("+998 71 000"));
}

#[tokio::test]
async fn stats_parse_distribution() {
    let (client, _mock) = client().await;
    let stats = client.statistics().await.unwrap();
    assert_eq!(stats.total_elements, 20);
    let rows = chemreg::stats::hazard_rows(&stats);
    assert_eq!(rows[0].class, "1");
    assert_eq!(rows[0].percent, 10.0);
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let client = RegistryClient::new(
        &config_for("http://127.0.0.1:9/api"),
        Arc::new(TokenStore::in_memory()),
    )
    .unwrap();
    let err = client.statistics().await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
    assert!(err.user_message().contains("Could not reach"));
}
