mod common;

use chrono::NaiveDate;
use common::edinet_config;
use kaijikit::{DocumentFilter, DocumentSearchService, EdinetClient, SearchOrder};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn empty_day(date: &str) -> String {
    format!(
        r#"{{
            "metadata": {{
                "title": "提出された書類を把握するためのAPI",
                "parameter": {{ "date": "{date}", "type": "2" }},
                "resultset": {{ "count": 0 }},
                "processDateTime": "{date} 00:01",
                "status": "200",
                "message": "OK"
            }},
            "results": []
        }}"#
    )
}

fn day_with_annual_report(date: &str, doc_id: &str) -> String {
    format!(
        r#"{{
            "metadata": {{
                "title": "提出された書類を把握するためのAPI",
                "parameter": {{ "date": "{date}", "type": "2" }},
                "resultset": {{ "count": 1 }},
                "processDateTime": "{date} 00:01",
                "status": "200",
                "message": "OK"
            }},
            "results": [{{
                "seqNumber": 1,
                "docID": "{doc_id}",
                "edinetCode": "E02144",
                "secCode": "72030",
                "filerName": "トヨタ自動車株式会社",
                "docTypeCode": "120",
                "periodStart": "2023-04-01",
                "periodEnd": "2024-03-31",
                "submitDateTime": "{date} 09:02",
                "docDescription": "有価証券報告書",
                "withdrawalStatus": "0",
                "xbrlFlag": "1",
                "pdfFlag": "1",
                "attachDocFlag": "0",
                "englishDocFlag": "0",
                "csvFlag": "1",
                "legalStatus": "1"
            }}]
        }}"#
    )
}

/// Newest-first search with a cap of one: the iteration walks back from the end
/// date and stops on the first hit, issuing exactly one call per visited day.
#[tokio::test]
async fn newest_first_cap_one_terminates_on_first_hit() {
    let server = MockServer::start().await;
    let hit_date = "2024-06-20";

    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .and(query_param("date", hit_date))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(day_with_annual_report(hit_date, "S100TOYT"))
                .insert_header("content-type", "application/json"),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(empty_day("any"))
                .insert_header("content-type", "application/json"),
        )
        .with_priority(5)
        .mount(&server)
        .await;

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let service = DocumentSearchService::new(client);

    let filter = DocumentFilter::new()
        .with_edinet_code("E02144")
        .with_doc_type_codes(vec!["120".to_string()])
        .with_date_range(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
        .with_search_order(SearchOrder::NewestFirst)
        .with_max_documents(1);

    let results = service.search(&filter).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].doc_id, "S100TOYT");

    // One request per day from 2024-12-31 down through 2024-06-20, inclusive.
    let hit = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    let expected_calls = (end - hit).num_days() + 1;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len() as i64, expected_calls);

    // The iteration never went past the hit date.
    let earliest = requests
        .iter()
        .filter_map(|r| {
            r.url.query_pairs().find_map(|(k, v)| (k == "date").then(|| v.into_owned()))
        })
        .min()
        .unwrap();
    assert_eq!(earliest, hit_date);
}

/// A raw 4-digit code never matches the 5-digit codes on the wire: normalization
/// is the company directory's job, not the search filter's.
#[tokio::test]
async fn four_digit_sec_code_matches_nothing_in_search() {
    let server = MockServer::start().await;
    let date = "2024-06-20";
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(day_with_annual_report(date, "S100TOYT"))
                .insert_header("content-type", "application/json"),
        )
        .mount(&server)
        .await;

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let service = DocumentSearchService::new(client);

    let day = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
    let filter = DocumentFilter::new()
        .with_sec_code("7203")
        .with_date_range(day, day);
    assert!(service.search(&filter).await.unwrap().is_empty());

    let filter = DocumentFilter::new()
        .with_sec_code("72030")
        .with_date_range(day, day);
    assert_eq!(service.search(&filter).await.unwrap().len(), 1);
}

/// A failing day is logged and skipped; the rest of the range still contributes.
#[tokio::test]
async fn per_date_failures_never_abort_the_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .and(query_param("date", "2024-06-19"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"message": "bad request"}"#))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .and(query_param("date", "2024-06-18"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(day_with_annual_report("2024-06-18", "S100OLDR"))
                .insert_header("content-type", "application/json"),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(empty_day("any"))
                .insert_header("content-type", "application/json"),
        )
        .with_priority(5)
        .mount(&server)
        .await;

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let service = DocumentSearchService::new(client);

    let filter = DocumentFilter::new()
        .with_edinet_code("E02144")
        .with_date_range(
            NaiveDate::from_ymd_opt(2024, 6, 18).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 20).unwrap(),
        );

    let results = service.search(&filter).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].doc_id, "S100OLDR");
}

/// Results come back newest-first even when the iteration ran oldest-first.
#[tokio::test]
async fn oldest_first_iteration_still_returns_newest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .and(query_param("date", "2024-06-18"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(day_with_annual_report("2024-06-18", "S100OLDR"))
                .insert_header("content-type", "application/json"),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .and(query_param("date", "2024-06-20"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(day_with_annual_report("2024-06-20", "S100NEWR"))
                .insert_header("content-type", "application/json"),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(empty_day("any"))
                .insert_header("content-type", "application/json"),
        )
        .with_priority(5)
        .mount(&server)
        .await;

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let service = DocumentSearchService::new(client);

    let filter = DocumentFilter::new()
        .with_edinet_code("E02144")
        .with_date_range(
            NaiveDate::from_ymd_opt(2024, 6, 18).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 20).unwrap(),
        )
        .with_search_order(SearchOrder::OldestFirst);

    let results = service.search(&filter).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|d| d.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["S100NEWR", "S100OLDR"]);
}

/// A filter that matches nothing returns an empty list without raising.
#[tokio::test]
async fn no_matches_returns_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/documents.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(day_with_annual_report("2024-06-20", "S100TOYT"))
                .insert_header("content-type", "application/json"),
        )
        .mount(&server)
        .await;

    let client = EdinetClient::new(edinet_config(&server.uri())).unwrap();
    let service = DocumentSearchService::new(client);

    let day = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
    let filter = DocumentFilter::new()
        .with_edinet_code("E99999")
        .with_company_name("存在しない会社")
        .with_date_range(day, day);

    assert!(service.search(&filter).await.unwrap().is_empty());
}
