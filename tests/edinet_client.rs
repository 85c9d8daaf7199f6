mod common;

use common::{edinet_config, read_fixture};
use kaijikit::{AgentError, DocumentListResponse, DownloadType, EdinetClient};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn parse_document_list_fixture() {
    let content = read_fixture("documents/list_response.json");
    let response: DocumentListResponse = serde_json::from_str(&content).unwrap();

    assert_eq!(response.metadata.status, "200");
    assert_eq!(response.metadata.resultset.count, 2);

    let results = response.results.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].doc_id, "S100TOYT");
    assert_eq!(results[0].sec_code.as_deref(), Some("72030"));
    // Wire flags "1"/"0" land as booleans.
    assert!(results[0].pdf_flag);
    assert!(!results[0].english_doc_flag);
    assert!(results[1].english_doc_flag);
}

#[tokio::test]
async fn nested_internal_status_maps_to_not_found_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(read_fixture("documents/error_nested_status.json"))
                .insert_header("content-type", "application/json"),
        )
        .mount(&server)
        .await;

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let err = client.document_list(date, true).await.unwrap_err();

    match err {
        AgentError::NotFound { status_code, endpoint, .. } => {
            assert_eq!(status_code, 404);
            assert!(endpoint.contains("/documents.json"));
        }
        other => panic!("expected NotFound, got {other:?}"),
    }

    // Not-found is terminal: exactly one request, no retry.
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn top_level_status_code_maps_to_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"statusCode": 401, "message": "Invalid API key"}"#)
                .insert_header("content-type", "application/json"),
        )
        .mount(&server)
        .await;

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    let err = client.document_list(date, true).await.unwrap_err();
    assert!(matches!(err, AgentError::Authentication { status_code: 401, .. }));
}

#[tokio::test]
async fn api_key_travels_as_query_parameter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .and(query_param("Subscription-Key", "test-key"))
        .and(query_param("type", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(read_fixture("documents/list_response.json"))
                .insert_header("content-type", "application/json"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let date = chrono::NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
    let response = client.document_list(date, true).await.unwrap();
    assert_eq!(response.results.unwrap().len(), 2);
}

#[tokio::test]
async fn download_writes_binary_to_disk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents/S100TOYT"))
        .and(query_param("type", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"%PDF-1.7 fake body".to_vec())
                .insert_header("content-type", "application/pdf"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let save_path = dir.path().join("nested/dirs/S100TOYT.pdf");

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let written = client
        .download_document("S100TOYT", DownloadType::Pdf, &save_path)
        .await
        .unwrap();

    assert_eq!(written, save_path);
    assert_eq!(std::fs::read(&save_path).unwrap(), b"%PDF-1.7 fake body");
}

#[tokio::test]
async fn json_download_response_is_an_error_even_without_error_shape() {
    // A 200 with a JSON body and no recognizable error shape still must not be
    // treated as a successful download.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents/S100TOYT"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .insert_header("content-type", "application/json"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let save_path = dir.path().join("S100TOYT.pdf");

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let err = client
        .download_document("S100TOYT", DownloadType::Pdf, &save_path)
        .await
        .unwrap_err();

    match err {
        AgentError::Api { status_code, message, .. } => {
            assert_eq!(status_code, 0);
            assert!(message.contains("Unexpected JSON response"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert!(!save_path.exists());
}

#[tokio::test]
async fn json_download_response_with_error_shape_maps_through_taxonomy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents/S100GONE"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"metadata": {"status": "404", "message": "Document not found"}}"#)
                .insert_header("content-type", "application/json"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let err = client
        .download_document("S100GONE", DownloadType::Pdf, &dir.path().join("x.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NotFound { status_code: 404, .. }));
}
