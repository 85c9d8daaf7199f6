mod common;

use common::seed_code_list;
use kaijikit::{CompanyDirectory, DownloadConfig};

fn directory(cache_dir: &std::path::Path) -> CompanyDirectory {
    CompanyDirectory::new(DownloadConfig {
        download_dir: cache_dir.join("downloads"),
        code_list_cache_dir: cache_dir.to_path_buf(),
        code_list_validity_days: 7,
    })
}

fn seed_standard_rows(cache_dir: &std::path::Path) {
    // Column order matches the published header:
    // code,kind,listing,consolidated,capital,closing,name,name_en,name_kana,address,industry,sec_code,jcn
    seed_code_list(
        cache_dir,
        &[
            "E02144,内国法人・組合,上場,有,635401,3月31日,トヨタ自動車株式会社,TOYOTA MOTOR CORPORATION,トヨタジドウシャ,愛知県豊田市,輸送用機器,72030,1180301018771",
            "E01777,内国法人・組合,上場,有,880214,3月31日,ソニーグループ株式会社,Sony Group Corporation,ソニーグループ,東京都港区,電気機器,67580,5010401067252",
            "E99901,内国法人・組合,非上場,無,100,3月31日,株式会社トヨタテスト商事,,トヨタテストショウジ,東京都,卸売業,,1234567890123",
        ],
    );
}

#[tokio::test]
async fn four_digit_lookup_equals_five_digit_lookup() {
    let dir = tempfile::tempdir().unwrap();
    seed_standard_rows(dir.path());
    let mut directory = directory(dir.path());

    let padded = directory.get_by_sec_code("7203").await.unwrap().unwrap();
    let exact = directory.get_by_sec_code("72030").await.unwrap().unwrap();
    assert_eq!(padded, exact);
    assert_eq!(padded.edinet_code, "E02144");
}

#[tokio::test]
async fn edinet_code_lookup_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    seed_standard_rows(dir.path());
    let mut directory = directory(dir.path());

    let record = directory.get_by_edinet_code("e02144").await.unwrap().unwrap();
    assert_eq!(record.company_name, "トヨタ自動車株式会社");
    assert!(directory.get_by_edinet_code("E00000").await.unwrap().is_none());
}

#[tokio::test]
async fn code_queries_short_circuit_to_exact_matches() {
    let dir = tempfile::tempdir().unwrap();
    seed_standard_rows(dir.path());
    let mut directory = directory(dir.path());

    let by_edinet = directory.search("E02144", 10).await.unwrap();
    assert_eq!(by_edinet.len(), 1);
    assert_eq!(by_edinet[0].similarity, 100.0);
    assert_eq!(by_edinet[0].match_field, "edinet_code");

    let by_sec = directory.search("7203", 10).await.unwrap();
    assert_eq!(by_sec.len(), 1);
    assert_eq!(by_sec[0].similarity, 100.0);
    assert_eq!(by_sec[0].match_field, "sec_code");
    assert_eq!(by_sec[0].company.sec_code.as_deref(), Some("72030"));
}

#[tokio::test]
async fn fuzzy_search_ranks_listed_industry_companies_first() {
    let dir = tempfile::tempdir().unwrap();
    seed_standard_rows(dir.path());
    let mut directory = directory(dir.path());

    let candidates = directory.search("トヨタ", 10).await.unwrap();
    assert!(candidates.len() >= 2);
    // Everything returned clears the similarity floor.
    assert!(candidates.iter().all(|c| c.similarity >= 50.0));
    // The listed automaker outranks the unlisted trading company at equal
    // similarity.
    assert_eq!(candidates[0].company.edinet_code, "E02144");

    let limited = directory.search("トヨタ", 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn english_names_match_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    seed_standard_rows(dir.path());
    let mut directory = directory(dir.path());

    let candidates = directory.search("sony group", 10).await.unwrap();
    assert!(!candidates.is_empty());
    assert_eq!(candidates[0].company.edinet_code, "E01777");
    assert_eq!(candidates[0].match_field, "company_name_en");
}

#[tokio::test]
async fn rows_without_edinet_code_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    seed_code_list(
        dir.path(),
        &[
            ",内国法人・組合,上場,有,1,3月31日,欠損行株式会社,,ケッソン,東京都,その他,99990,1",
            "E11111,内国法人・組合,上場,有,1,3月31日,有効行株式会社,,ユウコウ,東京都,その他,88880,1",
        ],
    );
    let mut directory = directory(dir.path());

    assert!(directory.get_by_sec_code("99990").await.unwrap().is_none());
    assert!(directory.get_by_sec_code("88880").await.unwrap().is_some());
}
