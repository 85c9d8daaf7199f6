//! Company directory backed by the downloadable EDINET code list.
//!
//! The portal publishes its registry as a ZIP archive containing one CSV, encoded in
//! the legacy cp932 (Shift_JIS superset) codepage, with a human-readable preamble
//! line before the real header. The directory downloads it on demand, caches it with
//! a sidecar timestamp, and builds two O(1) indexes (by EDINET code and by
//! securities code) plus a full-scan fuzzy search.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::sleep;

use crate::config::{DownloadConfig, CODE_LIST_URL};
use crate::error::{AgentError, Result};

const CSV_FILENAME: &str = "EdinetcodeDlInfo.csv";
const TIMESTAMP_FILENAME: &str = ".timestamp";
const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Similarity floor for fuzzy candidates (0..100 scale).
const FUZZY_THRESHOLD: f64 = 50.0;

/// Heavy-industry hints that bump major companies in ties.
const MAJOR_INDUSTRY_KEYWORDS: [&str; 8] = [
    "自動車", "電機", "電器", "製薬", "銀行", "証券", "保険", "製作所",
];

/// The four common legal-entity prefixes stripped before prefix matching.
const LEGAL_PREFIXES: [&str; 5] = ["株式会社", "有限会社", "合同会社", "合資会社", "合名会社"];

/// One row of the code list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyRecord {
    /// EDINET code: one letter + five digits.
    pub edinet_code: String,

    /// Listed-securities code, canonical 5-digit form. Absent for unlisted filers.
    pub sec_code: Option<String>,

    pub company_name: String,
    pub company_name_kana: Option<String>,
    pub company_name_en: Option<String>,

    /// Listing classification from the code list.
    pub listing_code: Option<String>,

    pub industry: Option<String>,
}

/// A fuzzy-search hit with its score and the field that produced it.
#[derive(Debug, Clone)]
pub struct CompanyCandidate {
    pub company: CompanyRecord,
    /// Partial-ratio similarity, 0..100. Exact code matches report 100.
    pub similarity: f64,
    /// `"edinet_code"`, `"sec_code"`, `"company_name"`, `"company_name_kana"`,
    /// or `"company_name_en"`.
    pub match_field: &'static str,
}

/// Right-pads a 4-digit user input to the portal's canonical 5-digit form.
pub fn normalize_sec_code(code: &str) -> String {
    if code.len() == 4 {
        format!("{code}0")
    } else {
        code.to_string()
    }
}

/// Resolves user-entered identifiers to canonical company records.
///
/// The cached list is refreshed when older than the configured validity window
/// (default 7 days). Concurrent refreshes are not coordinated; the file is
/// effectively immutable so last-writer-wins is acceptable.
///
/// # Example
///
/// ```no_run
/// # use kaijikit::{CompanyDirectory, DownloadConfig};
/// # async fn example() -> Result<(), kaijikit::AgentError> {
/// let mut directory = CompanyDirectory::new(DownloadConfig::default());
/// let candidates = directory.search("トヨタ", 10).await?;
/// for c in &candidates {
///     println!("{} ({:.0})", c.company.company_name, c.similarity);
/// }
/// # Ok(())
/// # }
/// ```
pub struct CompanyDirectory {
    cache_dir: PathBuf,
    validity_days: i64,
    code_list_url: String,
    client: reqwest::Client,

    companies: Option<Vec<CompanyRecord>>,
    by_edinet_code: HashMap<String, usize>,
    by_sec_code: HashMap<String, usize>,
}

impl CompanyDirectory {
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            cache_dir: config.code_list_cache_dir,
            validity_days: config.code_list_validity_days,
            code_list_url: CODE_LIST_URL.to_string(),
            client: reqwest::Client::new(),
            companies: None,
            by_edinet_code: HashMap::new(),
            by_sec_code: HashMap::new(),
        }
    }

    /// Overrides the code-list URL; used by tests against a mock server.
    pub fn with_code_list_url(mut self, url: impl Into<String>) -> Self {
        self.code_list_url = url.into();
        self
    }

    fn csv_path(&self) -> PathBuf {
        self.cache_dir.join(CSV_FILENAME)
    }

    fn timestamp_path(&self) -> PathBuf {
        self.cache_dir.join(TIMESTAMP_FILENAME)
    }

    fn is_cache_valid(&self) -> bool {
        if !self.csv_path().exists() {
            return false;
        }
        let Ok(raw) = std::fs::read_to_string(self.timestamp_path()) else {
            return false;
        };
        let Ok(timestamp) = raw.trim().parse::<DateTime<Local>>() else {
            tracing::warn!("unreadable code list timestamp, treating cache as stale");
            return false;
        };
        Local::now() < timestamp + chrono::Duration::days(self.validity_days)
    }

    async fn download_and_extract(&self) -> Result<()> {
        tracing::info!(url = %self.code_list_url, "downloading EDINET code list");

        let mut attempt = 0;
        let bytes = loop {
            let result = async {
                let response = self
                    .client
                    .get(&self.code_list_url)
                    .timeout(Duration::from_secs(60))
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(AgentError::CodeListDownload {
                        message: format!("HTTP error {status}"),
                        url: Some(self.code_list_url.clone()),
                    });
                }
                Ok(response.bytes().await?)
            }
            .await;

            match result {
                Ok(bytes) => break bytes,
                Err(e) if attempt + 1 < DOWNLOAD_ATTEMPTS => {
                    let wait = Duration::from_secs(4 * 2_u64.pow(attempt));
                    tracing::warn!(error = %e, attempt = attempt + 1, "code list download failed, retrying in {wait:?}");
                    sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        std::fs::create_dir_all(&self.cache_dir)?;

        let reader = std::io::Cursor::new(bytes.as_ref());
        let mut archive = zip::ZipArchive::new(reader).map_err(|e| AgentError::CodeListDownload {
            message: format!("invalid ZIP file: {e}"),
            url: Some(self.code_list_url.clone()),
        })?;

        let csv_name = (0..archive.len())
            .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
            .find(|name| name.ends_with(".csv"))
            .ok_or_else(|| AgentError::CodeListDownload {
                message: "no CSV file found in ZIP".to_string(),
                url: Some(self.code_list_url.clone()),
            })?;

        let mut csv_bytes = Vec::new();
        archive
            .by_name(&csv_name)
            .map_err(|e| AgentError::CodeListDownload {
                message: format!("failed to read {csv_name}: {e}"),
                url: Some(self.code_list_url.clone()),
            })?
            .read_to_end(&mut csv_bytes)?;

        std::fs::write(self.csv_path(), &csv_bytes)?;
        std::fs::write(self.timestamp_path(), Local::now().to_rfc3339())?;

        tracing::info!(path = %self.csv_path().display(), "EDINET code list cached");
        Ok(())
    }

    fn load_from_cache(&mut self) -> Result<()> {
        if self.companies.is_some() {
            return Ok(());
        }

        let raw = std::fs::read(self.csv_path())?;
        let (decoded, _, _) = encoding_rs::SHIFT_JIS.decode(&raw);

        // The first line is a human-readable preamble; the real header follows.
        let body = match decoded.split_once('\n') {
            Some((_, rest)) => rest.to_string(),
            None => decoded.into_owned(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(body.as_bytes());

        let headers = reader.headers().map_err(csv_error)?.clone();
        let column = |name: &str| headers.iter().position(|h| h.trim() == name);

        let idx_edinet = column("ＥＤＩＮＥＴコード");
        let idx_sec = column("証券コード");
        let idx_name = column("提出者名");
        let idx_kana = column("提出者名（カナ）");
        let idx_en = column("提出者名（英字）");
        let idx_listing = column("上場区分");
        let idx_industry = column("提出者業種");

        let mut companies = Vec::new();
        let mut by_edinet_code = HashMap::new();
        let mut by_sec_code = HashMap::new();

        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            let field = |idx: Option<usize>| -> Option<String> {
                idx.and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_owned)
            };

            // Rows without an EDINET code are unusable and skipped.
            let Some(edinet_code) = field(idx_edinet) else {
                continue;
            };

            let company = CompanyRecord {
                edinet_code: edinet_code.clone(),
                sec_code: field(idx_sec),
                company_name: field(idx_name).unwrap_or_default(),
                company_name_kana: field(idx_kana),
                company_name_en: field(idx_en),
                listing_code: field(idx_listing),
                industry: field(idx_industry),
            };

            let index = companies.len();
            by_edinet_code.insert(edinet_code, index);
            if let Some(sec_code) = &company.sec_code {
                by_sec_code.insert(sec_code.clone(), index);
            }
            companies.push(company);
        }

        tracing::info!(count = companies.len(), "loaded EDINET code list");
        self.companies = Some(companies);
        self.by_edinet_code = by_edinet_code;
        self.by_sec_code = by_sec_code;
        Ok(())
    }

    /// Ensures the code list is present and loaded, refreshing it when stale.
    ///
    /// # Errors
    ///
    /// `CodeListDownload` after the retries are exhausted; non-retryable for callers.
    pub async fn ensure_code_list(&mut self, force_refresh: bool) -> Result<()> {
        if force_refresh || !self.is_cache_valid() {
            self.download_and_extract().await?;
            self.companies = None;
        } else {
            tracing::debug!("using cached EDINET code list");
        }
        self.load_from_cache()
    }

    /// Looks up a company by its EDINET code (case-insensitive on the letter).
    pub async fn get_by_edinet_code(&mut self, code: &str) -> Result<Option<CompanyRecord>> {
        self.ensure_code_list(false).await?;
        let companies = self.companies.as_ref().expect("loaded above");
        Ok(self
            .by_edinet_code
            .get(&code.to_uppercase())
            .map(|&i| companies[i].clone()))
    }

    /// Looks up a company by securities code, right-padding 4-digit inputs.
    pub async fn get_by_sec_code(&mut self, code: &str) -> Result<Option<CompanyRecord>> {
        self.ensure_code_list(false).await?;
        let normalized = normalize_sec_code(code);
        let companies = self.companies.as_ref().expect("loaded above");
        Ok(self.by_sec_code.get(&normalized).map(|&i| companies[i].clone()))
    }

    /// Multi-stage company search.
    ///
    /// EDINET-code and securities-code syntaxes short-circuit to exact matches at
    /// similarity 100. Everything else fuzzy-scans all records with partial-ratio
    /// similarity over the Japanese, kana, and upper-cased English names, keeps
    /// scores ≥ 50, and sorts by `(similarity, prefix match, listed, heavy-industry
    /// keyword)` all descending before truncating to `limit`.
    pub async fn search(&mut self, query: &str, limit: usize) -> Result<Vec<CompanyCandidate>> {
        self.ensure_code_list(false).await?;

        // EDINET code syntax: one letter followed by five digits.
        if query.len() == 6
            && query.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && query.chars().skip(1).all(|c| c.is_ascii_digit())
        {
            if let Some(company) = self.get_by_edinet_code(query).await? {
                return Ok(vec![CompanyCandidate {
                    company,
                    similarity: 100.0,
                    match_field: "edinet_code",
                }]);
            }
        }

        // Securities code syntax: 4 or 5 digits.
        if (query.len() == 4 || query.len() == 5) && query.chars().all(|c| c.is_ascii_digit()) {
            if let Some(company) = self.get_by_sec_code(query).await? {
                return Ok(vec![CompanyCandidate {
                    company,
                    similarity: 100.0,
                    match_field: "sec_code",
                }]);
            }
        }

        let companies = self.companies.as_ref().expect("loaded above");
        let mut candidates: Vec<CompanyCandidate> = companies
            .iter()
            .filter_map(|company| score_company(query, company))
            .collect();

        candidates.sort_by(|a, b| {
            sort_key(query, b)
                .partial_cmp(&sort_key(query, a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

fn csv_error(e: csv::Error) -> AgentError {
    AgentError::CodeListDownload {
        message: format!("CSV parse error: {e}"),
        url: None,
    }
}

/// Scores one record against the query, keeping the best field.
fn score_company(query: &str, company: &CompanyRecord) -> Option<CompanyCandidate> {
    let mut best_score = partial_ratio(query, &company.company_name);
    let mut best_field = "company_name";

    if let Some(kana) = &company.company_name_kana {
        let score = partial_ratio(query, kana);
        if score > best_score {
            best_score = score;
            best_field = "company_name_kana";
        }
    }

    if let Some(en) = &company.company_name_en {
        let score = partial_ratio(&query.to_uppercase(), &en.to_uppercase());
        if score > best_score {
            best_score = score;
            best_field = "company_name_en";
        }
    }

    (best_score >= FUZZY_THRESHOLD).then(|| CompanyCandidate {
        company: company.clone(),
        similarity: best_score,
        match_field: best_field,
    })
}

fn partial_ratio(a: &str, b: &str) -> f64 {
    rapidfuzz::fuzz::partial_ratio(a.chars(), b.chars())
}

/// Strips a leading legal-entity prefix for prefix-match checks.
fn strip_legal_prefix(name: &str) -> &str {
    for prefix in LEGAL_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest;
        }
    }
    name
}

/// Four-component ordering key, all descending: similarity, prefix match (raw name
/// or with the legal prefix removed), listed, heavy-industry keyword.
fn sort_key(query: &str, candidate: &CompanyCandidate) -> (f64, u8, u8, u8) {
    let name = &candidate.company.company_name;
    let is_prefix = name.starts_with(query) || strip_legal_prefix(name).starts_with(query);
    let is_listed = candidate.company.sec_code.is_some();
    let has_keyword = MAJOR_INDUSTRY_KEYWORDS.iter().any(|kw| name.contains(kw));
    (
        candidate.similarity,
        is_prefix as u8,
        is_listed as u8,
        has_keyword as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, sec_code: Option<&str>) -> CompanyRecord {
        CompanyRecord {
            edinet_code: "E00001".into(),
            sec_code: sec_code.map(str::to_owned),
            company_name: name.into(),
            company_name_kana: None,
            company_name_en: None,
            listing_code: None,
            industry: None,
        }
    }

    #[test]
    fn sec_code_normalization_pads_four_digits() {
        assert_eq!(normalize_sec_code("7203"), "72030");
        assert_eq!(normalize_sec_code("72030"), "72030");
        assert_eq!(normalize_sec_code("123"), "123");
    }

    #[test]
    fn legal_prefix_stripping() {
        assert_eq!(strip_legal_prefix("株式会社サンプル"), "サンプル");
        assert_eq!(strip_legal_prefix("合同会社テスト"), "テスト");
        assert_eq!(strip_legal_prefix("サンプル株式会社"), "サンプル株式会社");
    }

    #[test]
    fn sort_key_prefers_prefix_listed_and_industry() {
        let a = CompanyCandidate {
            company: record("株式会社トヨタ商事", None),
            similarity: 80.0,
            match_field: "company_name",
        };
        let b = CompanyCandidate {
            company: record("トヨタ自動車株式会社", Some("72030")),
            similarity: 80.0,
            match_field: "company_name",
        };
        // Same similarity and both prefix matches (after legal-prefix strip), but b
        // is listed and carries an industry keyword.
        assert!(sort_key("トヨタ", &b) > sort_key("トヨタ", &a));
    }

    #[test]
    fn score_company_applies_threshold() {
        let near = record("トヨタ自動車株式会社", None);
        assert!(score_company("トヨタ自動車", &near).is_some());

        let far = record("全く別の会社", None);
        let hit = score_company("トヨタ自動車", &far);
        assert!(hit.is_none() || hit.unwrap().similarity >= FUZZY_THRESHOLD);
    }

    #[test]
    fn english_name_matches_case_insensitively() {
        let mut company = record("ソニーグループ株式会社", Some("67580"));
        company.company_name_en = Some("Sony Group Corporation".into());

        let candidate = score_company("sony", &company).expect("should match");
        assert_eq!(candidate.match_field, "company_name_en");
        assert!(candidate.similarity >= 99.0);
    }
}
