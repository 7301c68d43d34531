//! Property tests over randomly generated Works and identifier inputs.

use proptest::prelude::*;
use scholar_enrich_core::identifiers::{doi_path, host_of, normalize_doi};
use scholar_enrich_core::{
    FetchContext, NO_SOURCE, RunStats, Waterfall, Work, extract_arxiv_id, extract_doi,
    extract_pmid, extract_ssrn_id,
};

/// Empty, short, or abstract-length text.
fn field() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("   ".to_string()),
        "[a-z ]{1,40}",
        "[A-Za-z ,.]{100,180}",
    ]
}

fn tags() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{0,8}", 0..3)
}

fn run_waterfall(works: &[(String, String, Vec<String>)], keywords: bool) -> (RunStats, Vec<Work>) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let ctx = FetchContext::new(reqwest::Client::new()).without_delays();
        let waterfall = Waterfall::new(vec![], ctx).with_keywords(keywords);
        let mut stats = RunStats::new();
        let mut out = Vec::new();
        for (summary, full_text, tags) in works {
            let mut work = Work {
                summary: summary.clone(),
                full_text: full_text.clone(),
                tags: tags.iter().cloned().collect(),
                ..Work::new("Generated Work")
            };
            waterfall.enrich(&mut work, &mut stats).await;
            out.push(work);
        }
        (stats, out)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn completeness_buckets_cover_every_work(
        works in prop::collection::vec((field(), field(), tags()), 0..30),
        keywords in any::<bool>(),
    ) {
        let (stats, _) = run_waterfall(&works, keywords);
        prop_assert_eq!(stats.total, works.len());
        prop_assert_eq!(stats.buckets_sum(), stats.total);
        prop_assert_eq!(
            stats.openalex_existing + stats.enriched() + stats.no_abstract,
            stats.total
        );
    }

    #[test]
    fn every_work_leaves_with_provenance(
        works in prop::collection::vec((field(), field(), tags()), 1..10),
    ) {
        let (_, enriched) = run_waterfall(&works, false);
        for work in &enriched {
            prop_assert!(!work.summary_source.is_empty());
            if work.summary.is_empty() {
                prop_assert_eq!(work.summary_source.as_str(), NO_SOURCE);
            }
        }
    }

    #[test]
    fn extractors_never_panic(input in "\\PC{0,80}") {
        let _ = extract_doi(&input);
        let _ = extract_arxiv_id(&input);
        let _ = extract_pmid(&input);
        let _ = extract_ssrn_id(&input);
        let _ = normalize_doi(&input);
        let _ = host_of(&input);
    }

    #[test]
    fn extractors_never_panic_on_url_shapes(
        input in "https?://(www\\.)?(doi\\.org|arxiv\\.org/(abs|pdf)|pubmed\\.ncbi\\.nlm\\.nih\\.gov|papers\\.ssrn\\.com)/[ -~]{0,60}",
    ) {
        let _ = extract_doi(&input);
        let _ = extract_arxiv_id(&input);
        let _ = extract_pmid(&input);
        let _ = extract_ssrn_id(&input);
    }

    #[test]
    fn doi_path_has_no_query_or_fragment(doi in "10\\.[0-9]{4}/[ -~]{1,40}") {
        let path = doi_path(&doi);
        prop_assert!(!path.contains('?'));
        prop_assert!(!path.contains('#'));
        prop_assert_eq!(path.matches('/').count(), doi.matches('/').count());
    }
}
