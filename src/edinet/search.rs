//! Filtered document search over the date-keyed list endpoint.
//!
//! EDINET only exposes filings per submission date, so a filtered search iterates the
//! requested range day by day, applying every filter inline and terminating as soon
//! as the requested document cap is reached. With newest-first iteration and
//! `max_documents = 1`, "the latest annual report" typically costs one HTTP call
//! instead of walking five years of dates.

use chrono::{Local, NaiveDate};

use super::client::EdinetClient;
use super::schemas::FilingMetadata;
use crate::error::Result;

/// Default lookback when no start date is given. Annual reports are filed once a
/// year, so the window must be generous.
const DEFAULT_SEARCH_PERIOD_DAYS: i64 = 365 * 5;

/// Which end of the date range to search first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchOrder {
    /// Iterate from the end date backwards; the first hits are the newest.
    #[default]
    NewestFirst,
    /// Iterate from the start date forwards; the first hits are the oldest.
    OldestFirst,
}

/// Filter criteria for a document search.
///
/// Identity filters (`sec_code`, `edinet_code`, `company_name`) combine with AND
/// logic; `doc_type_codes` is OR within the list. All fields are optional.
///
/// Note that `sec_code` is an exact match on the 5-digit form — normalizing a
/// 4-digit user input is the directory's job, not the filter's.
///
/// # Example
///
/// ```
/// use kaijikit::{DocumentFilter, SearchOrder};
/// use chrono::NaiveDate;
///
/// let filter = DocumentFilter::new()
///     .with_edinet_code("E02144")
///     .with_doc_type_codes(vec!["120".to_string()])
///     .with_date_range(
///         NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
///         NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
///     )
///     .with_search_order(SearchOrder::NewestFirst)
///     .with_max_documents(1);
/// # let _ = filter;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    /// Exact 5-digit securities code.
    pub sec_code: Option<String>,

    /// Exact EDINET code (one letter + five digits).
    pub edinet_code: Option<String>,

    /// Substring match over the Japanese filer name.
    pub company_name: Option<String>,

    /// Document type codes, OR logic within the list.
    pub doc_type_codes: Option<Vec<String>>,

    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    pub search_order: SearchOrder,

    /// Hard cap on returned documents; reaching it stops the date iteration.
    pub max_documents: Option<usize>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sec_code(mut self, sec_code: impl Into<String>) -> Self {
        self.sec_code = Some(sec_code.into());
        self
    }

    pub fn with_edinet_code(mut self, edinet_code: impl Into<String>) -> Self {
        self.edinet_code = Some(edinet_code.into());
        self
    }

    pub fn with_company_name(mut self, company_name: impl Into<String>) -> Self {
        self.company_name = Some(company_name.into());
        self
    }

    pub fn with_doc_type_codes(mut self, codes: Vec<String>) -> Self {
        self.doc_type_codes = Some(codes);
        self
    }

    pub fn with_date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_search_order(mut self, order: SearchOrder) -> Self {
        self.search_order = order;
        self
    }

    pub fn with_max_documents(mut self, max: usize) -> Self {
        self.max_documents = Some(max);
        self
    }
}

/// Search service combining the list endpoint with client-side filtering.
///
/// The service is stateless; the filings API is the only source of truth.
#[derive(Debug, Clone)]
pub struct DocumentSearchService {
    client: EdinetClient,
}

impl DocumentSearchService {
    pub fn new(client: EdinetClient) -> Self {
        Self { client }
    }

    /// Runs a filtered search over the date range.
    ///
    /// Transient failures on individual dates are logged and skipped — a missing day
    /// never aborts the range. The result is always sorted newest-first by
    /// submission timestamp (missing timestamps sort last), regardless of the
    /// iteration direction, and truncated to `max_documents` when set.
    pub async fn search(&self, filter: &DocumentFilter) -> Result<Vec<FilingMetadata>> {
        let end_date = filter.end_date.unwrap_or_else(|| Local::now().date_naive());
        let start_date = filter
            .start_date
            .unwrap_or(end_date - chrono::Duration::days(DEFAULT_SEARCH_PERIOD_DAYS));

        let mut documents: Vec<FilingMetadata> = Vec::new();

        let mut current = match filter.search_order {
            SearchOrder::NewestFirst => end_date,
            SearchOrder::OldestFirst => start_date,
        };

        loop {
            let in_range = match filter.search_order {
                SearchOrder::NewestFirst => current >= start_date,
                SearchOrder::OldestFirst => current <= end_date,
            };
            if !in_range {
                break;
            }

            match self.client.document_list(current, true).await {
                Ok(response) => {
                    if let Some(results) = response.results {
                        documents.extend(apply_filters(results, filter));

                        if let Some(max) = filter.max_documents {
                            if documents.len() >= max {
                                tracing::info!(max, "early termination: document cap reached");
                                documents.truncate(max);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(date = %current, error = %e, "skipping date after fetch failure");
                }
            }

            current = match filter.search_order {
                SearchOrder::NewestFirst => current - chrono::Duration::days(1),
                SearchOrder::OldestFirst => current + chrono::Duration::days(1),
            };
        }

        sort_newest_first(&mut documents);
        Ok(documents)
    }
}

/// Applies the filter criteria in order, each step narrowing the remaining set.
pub(crate) fn apply_filters(
    documents: Vec<FilingMetadata>,
    filter: &DocumentFilter,
) -> Vec<FilingMetadata> {
    let mut result = documents;

    if let Some(sec_code) = &filter.sec_code {
        result.retain(|doc| doc.sec_code.as_deref() == Some(sec_code.as_str()));
    }
    if let Some(edinet_code) = &filter.edinet_code {
        result.retain(|doc| doc.edinet_code.as_deref() == Some(edinet_code.as_str()));
    }
    if let Some(name) = &filter.company_name {
        result.retain(|doc| doc.filer_name.as_deref().is_some_and(|n| n.contains(name.as_str())));
    }
    if let Some(codes) = &filter.doc_type_codes {
        result.retain(|doc| {
            doc.doc_type_code
                .as_deref()
                .is_some_and(|c| codes.iter().any(|wanted| wanted == c))
        });
    }

    result
}

/// Sorts by submission timestamp descending, treating missing timestamps as the
/// empty string (which sorts last).
pub(crate) fn sort_newest_first(documents: &mut [FilingMetadata]) {
    documents.sort_by(|a, b| {
        let a_key = a.submit_date_time.as_deref().unwrap_or("");
        let b_key = b.submit_date_time.as_deref().unwrap_or("");
        b_key.cmp(a_key)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(
        doc_id: &str,
        edinet_code: &str,
        sec_code: Option<&str>,
        doc_type: &str,
        submitted: Option<&str>,
    ) -> FilingMetadata {
        serde_json::from_value(serde_json::json!({
            "seqNumber": 1,
            "docID": doc_id,
            "edinetCode": edinet_code,
            "secCode": sec_code,
            "filerName": "トヨタ自動車株式会社",
            "docTypeCode": doc_type,
            "submitDateTime": submitted,
            "withdrawalStatus": "0",
            "xbrlFlag": "1",
            "pdfFlag": "1",
            "attachDocFlag": "0",
            "englishDocFlag": "0",
            "csvFlag": "0",
            "legalStatus": "1"
        }))
        .unwrap()
    }

    #[test]
    fn filters_narrow_in_order() {
        let docs = vec![
            doc("S100AAAA", "E02144", Some("72030"), "120", Some("2024-06-20 09:00")),
            doc("S100BBBB", "E02144", Some("72030"), "140", Some("2024-06-20 10:00")),
            doc("S100CCCC", "E99999", Some("67580"), "120", Some("2024-06-20 11:00")),
        ];

        let filter = DocumentFilter::new()
            .with_edinet_code("E02144")
            .with_doc_type_codes(vec!["120".into()]);
        let result = apply_filters(docs, &filter);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].doc_id, "S100AAAA");
    }

    #[test]
    fn company_name_filter_is_substring() {
        let docs = vec![doc("S100AAAA", "E02144", Some("72030"), "120", None)];
        let hit = apply_filters(docs.clone(), &DocumentFilter::new().with_company_name("トヨタ"));
        assert_eq!(hit.len(), 1);
        let miss = apply_filters(docs, &DocumentFilter::new().with_company_name("ホンダ"));
        assert!(miss.is_empty());
    }

    #[test]
    fn raw_four_digit_code_matches_nothing() {
        // Exact-match semantics: normalizing "7203" to "72030" belongs to the
        // company directory, not the filings filter.
        let docs = vec![doc("S100AAAA", "E02144", Some("72030"), "120", None)];
        let result = apply_filters(docs, &DocumentFilter::new().with_sec_code("7203"));
        assert!(result.is_empty());
    }

    #[test]
    fn sort_treats_missing_timestamps_as_oldest() {
        let mut docs = vec![
            doc("S100AAAA", "E1", None, "120", None),
            doc("S100BBBB", "E1", None, "120", Some("2024-06-20 10:00")),
            doc("S100CCCC", "E1", None, "120", Some("2025-01-05 09:00")),
        ];
        sort_newest_first(&mut docs);
        let ids: Vec<&str> = docs.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["S100CCCC", "S100BBBB", "S100AAAA"]);
    }

    #[test]
    fn filter_builder_collects_fields() {
        let filter = DocumentFilter::new()
            .with_sec_code("72030")
            .with_doc_type_codes(vec!["120".into(), "140".into()])
            .with_search_order(SearchOrder::OldestFirst)
            .with_max_documents(5);

        assert_eq!(filter.sec_code.as_deref(), Some("72030"));
        assert_eq!(filter.doc_type_codes.as_ref().unwrap().len(), 2);
        assert_eq!(filter.search_order, SearchOrder::OldestFirst);
        assert_eq!(filter.max_documents, Some(5));
    }
}
