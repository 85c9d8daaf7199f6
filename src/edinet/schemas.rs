//! Serde models for the EDINET document-list and download endpoints.
//!
//! The list endpoint wraps results in a metadata envelope that doubles as an error
//! channel: the portal can return HTTP 200 with `metadata.status` set to an error
//! code. Availability flags arrive as the strings `"0"`/`"1"` and are normalized to
//! booleans on ingest so downstream code never sees the wire encoding.

use serde::{de, Deserialize, Deserializer, Serialize};

/// Request parameters echoed back by the list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestParameter {
    /// Requested date (YYYY-MM-DD).
    pub date: String,

    /// Request type: `"1"` = count only, `"2"` = full details.
    #[serde(rename = "type")]
    pub type_: String,
}

/// Result-set counts from the list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub count: i64,
}

/// Envelope metadata on every list response.
///
/// `status` is the portal's internal status code as a numeric string (`"200"`,
/// `"404"`, ...). It must be inspected even on HTTP 200 — see
/// [`EdinetClient`](super::EdinetClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub title: String,
    pub parameter: RequestParameter,
    pub resultset: ResultSet,
    #[serde(rename = "processDateTime")]
    pub process_date_time: String,
    pub status: String,
    pub message: String,
}

/// Metadata for a single filed document.
///
/// `doc_id` is the stable 8-character primary key across the filings side. Ordering
/// between documents is defined only by `submit_date_time` (lexicographic descending
/// = newest first; missing timestamps sort last).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingMetadata {
    #[serde(rename = "seqNumber")]
    pub seq_number: i64,

    /// Document management number (8 characters).
    #[serde(rename = "docID")]
    pub doc_id: String,

    /// Filer's EDINET code: one letter followed by five digits.
    #[serde(rename = "edinetCode")]
    pub edinet_code: Option<String>,

    /// Filer's listed-securities code (5 digits), absent for unlisted filers.
    #[serde(rename = "secCode")]
    pub sec_code: Option<String>,

    #[serde(rename = "JCN")]
    pub jcn: Option<String>,

    #[serde(rename = "filerName")]
    pub filer_name: Option<String>,

    #[serde(rename = "fundCode")]
    pub fund_code: Option<String>,

    #[serde(rename = "ordinanceCode")]
    pub ordinance_code: Option<String>,

    #[serde(rename = "formCode")]
    pub form_code: Option<String>,

    /// Document type code (3 digits, e.g. 120 = annual report).
    #[serde(rename = "docTypeCode")]
    pub doc_type_code: Option<String>,

    #[serde(rename = "periodStart")]
    pub period_start: Option<String>,

    #[serde(rename = "periodEnd")]
    pub period_end: Option<String>,

    /// Submission timestamp (`YYYY-MM-DD hh:mm`).
    #[serde(rename = "submitDateTime")]
    pub submit_date_time: Option<String>,

    #[serde(rename = "docDescription")]
    pub doc_description: Option<String>,

    #[serde(rename = "issuerEdinetCode")]
    pub issuer_edinet_code: Option<String>,

    #[serde(rename = "subjectEdinetCode")]
    pub subject_edinet_code: Option<String>,

    #[serde(rename = "subsidiaryEdinetCode")]
    pub subsidiary_edinet_code: Option<String>,

    #[serde(rename = "currentReportReason")]
    pub current_report_reason: Option<String>,

    #[serde(rename = "parentDocID")]
    pub parent_doc_id: Option<String>,

    #[serde(rename = "opeDateTime")]
    pub ope_date_time: Option<String>,

    /// 0 = normal, 1 = withdrawal filing, 2 = withdrawn.
    #[serde(rename = "withdrawalStatus")]
    pub withdrawal_status: String,

    #[serde(rename = "docInfoEditStatus")]
    pub doc_info_edit_status: Option<String>,

    #[serde(rename = "disclosureStatus")]
    pub disclosure_status: Option<String>,

    #[serde(rename = "xbrlFlag", deserialize_with = "deserialize_flag")]
    pub xbrl_flag: bool,

    #[serde(rename = "pdfFlag", deserialize_with = "deserialize_flag")]
    pub pdf_flag: bool,

    #[serde(rename = "attachDocFlag", deserialize_with = "deserialize_flag")]
    pub attach_doc_flag: bool,

    #[serde(rename = "englishDocFlag", deserialize_with = "deserialize_flag")]
    pub english_doc_flag: bool,

    #[serde(rename = "csvFlag", deserialize_with = "deserialize_flag")]
    pub csv_flag: bool,

    /// 0 = viewing period expired, 1 = viewable, 2 = extended.
    #[serde(rename = "legalStatus")]
    pub legal_status: String,
}

/// Complete response from the document-list endpoint.
///
/// `results` is `None` for type=1 (count-only) requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub metadata: ResponseMetadata,
    #[serde(default)]
    pub results: Option<Vec<FilingMetadata>>,
}

/// Binary formats offered by the download endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadType {
    /// Structured-data (XBRL) ZIP.
    Xbrl = 1,
    Pdf = 2,
    /// Attachment documents ZIP.
    Attachments = 3,
    /// English translations ZIP.
    English = 4,
    /// CSV ZIP.
    Csv = 5,
}

impl DownloadType {
    /// Wire value for the `type` query parameter.
    pub fn as_query_value(self) -> &'static str {
        match self {
            DownloadType::Xbrl => "1",
            DownloadType::Pdf => "2",
            DownloadType::Attachments => "3",
            DownloadType::English => "4",
            DownloadType::Csv => "5",
        }
    }
}

/// Deserializes EDINET's `"0"`/`"1"` flags (also tolerating genuine booleans and
/// nulls) into `bool`.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlagVisitor;

    impl<'de> de::Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("\"0\", \"1\", a boolean, or null")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<bool, E> {
            Ok(value == "1")
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<bool, E> {
            Ok(value)
        }

        fn visit_none<E: de::Error>(self) -> std::result::Result<bool, E> {
            Ok(false)
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<bool, E> {
            Ok(false)
        }

        fn visit_some<D2: Deserializer<'de>>(
            self,
            deserializer: D2,
        ) -> std::result::Result<bool, D2::Error> {
            deserializer.deserialize_any(FlagVisitor)
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result_json(flags: &str) -> String {
        format!(
            r#"{{
                "seqNumber": 1,
                "docID": "S100ABCD",
                "edinetCode": "E02144",
                "secCode": "72030",
                "JCN": null,
                "filerName": "トヨタ自動車株式会社",
                "fundCode": null,
                "ordinanceCode": "010",
                "formCode": "030000",
                "docTypeCode": "120",
                "periodStart": "2024-04-01",
                "periodEnd": "2025-03-31",
                "submitDateTime": "2025-06-20 09:00",
                "docDescription": "有価証券報告書",
                "issuerEdinetCode": null,
                "subjectEdinetCode": null,
                "subsidiaryEdinetCode": null,
                "currentReportReason": null,
                "parentDocID": null,
                "opeDateTime": null,
                "withdrawalStatus": "0",
                "docInfoEditStatus": "0",
                "disclosureStatus": "0",
                {flags}
                "legalStatus": "1"
            }}"#
        )
    }

    #[test]
    fn flags_normalize_to_bool() {
        let json = sample_result_json(
            r#""xbrlFlag": "1", "pdfFlag": "1", "attachDocFlag": "0", "englishDocFlag": "0", "csvFlag": "1","#,
        );
        let doc: FilingMetadata = serde_json::from_str(&json).unwrap();
        assert!(doc.xbrl_flag);
        assert!(doc.pdf_flag);
        assert!(!doc.attach_doc_flag);
        assert!(!doc.english_doc_flag);
        assert!(doc.csv_flag);
    }

    #[test]
    fn null_flags_are_false() {
        let json = sample_result_json(
            r#""xbrlFlag": null, "pdfFlag": "0", "attachDocFlag": null, "englishDocFlag": null, "csvFlag": null,"#,
        );
        let doc: FilingMetadata = serde_json::from_str(&json).unwrap();
        assert!(!doc.xbrl_flag);
        assert!(!doc.pdf_flag);
    }

    #[test]
    fn download_type_query_values() {
        assert_eq!(DownloadType::Pdf.as_query_value(), "2");
        assert_eq!(DownloadType::Csv.as_query_value(), "5");
    }
}
