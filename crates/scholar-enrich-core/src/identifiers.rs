//! Identifier extraction for the four ID schemes the waterfall keys on.
//!
//! Every function here is pure: malformed input yields `None`, never a panic.

use once_cell::sync::Lazy;
use regex::Regex;

/// Trim trailing punctuation that routinely sticks to identifiers pasted
/// from prose or query strings.
fn trim_identifier(id: &str) -> &str {
    id.trim_end_matches(['.', ',', ';', ':', '/', ')', ']'])
}

/// Extract a DOI from a `doi.org/<suffix>` URL.
///
/// The suffix is URL-decoded, so `https://doi.org/10.1000%2Fabc` yields
/// `10.1000/abc`. Query strings and fragments are not part of the DOI.
pub fn extract_doi(url: &str) -> Option<String> {
    static URL_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(?:^|[/.])doi\.org/([^\s?#]+)").unwrap()
    });

    let raw = URL_RE.captures(url)?.get(1)?.as_str();
    let decoded = urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    let doi = trim_identifier(decoded.trim());

    if doi.starts_with("10.") && doi.contains('/') {
        Some(doi.to_string())
    } else {
        None
    }
}

/// Normalize a DOI that may arrive as a bare DOI, a `doi:` string, or a
/// resolver URL.
pub fn normalize_doi(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(doi) = extract_doi(value) {
        return Some(doi);
    }
    let bare = value
        .strip_prefix("doi:")
        .or_else(|| value.strip_prefix("DOI:"))
        .unwrap_or(value)
        .trim();
    if bare.starts_with("10.") && bare.contains('/') {
        Some(trim_identifier(bare).to_string())
    } else {
        None
    }
}

/// Extract an arXiv identifier from an `arxiv.org/abs/<id>` or
/// `arxiv.org/pdf/<id>` URL.
///
/// Both the modern `YYMM.NNNNN` form and the legacy `archive/NNNNNNN` form
/// are recognised. A trailing `.pdf` is dropped; version suffixes are kept.
pub fn extract_arxiv_id(url: &str) -> Option<String> {
    static ARXIV_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?i)arxiv\.org/(?:abs|pdf)/(\d{4}\.\d{4,5}(?:v\d+)?|[a-z][a-z\-]*(?:\.[a-z]{2})?/\d{7}(?:v\d+)?)",
        )
        .unwrap()
    });

    let id = ARXIV_RE.captures(url)?.get(1)?.as_str();
    let id = id.strip_suffix(".pdf").unwrap_or(id);
    Some(id.to_string())
}

/// Extract an arXiv identifier from an arXiv-minted DOI (`10.48550/arXiv.<id>`).
pub fn arxiv_id_from_doi(doi: &str) -> Option<String> {
    static DOI_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)10\.48550/arxiv\.(\d{4}\.\d{4,5}(?:v\d+)?)").unwrap());
    Some(DOI_RE.captures(doi)?.get(1)?.as_str().to_string())
}

/// Extract a PubMed ID from a `pubmed.ncbi.nlm.nih.gov/<id>` URL
/// (the legacy `ncbi.nlm.nih.gov/pubmed/<id>` form is accepted as well).
pub fn extract_pmid(url: &str) -> Option<String> {
    static PMID_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(?:pubmed\.ncbi\.nlm\.nih\.gov|ncbi\.nlm\.nih\.gov/pubmed)/(\d+)")
            .unwrap()
    });
    Some(PMID_RE.captures(url)?.get(1)?.as_str().to_string())
}

/// Extract the numeric SSRN identifier from a DOI-like string or SSRN URL.
///
/// Handles `10.2139/ssrn.NNNN`, `10.2139/ssrn-NNNN`,
/// `papers.ssrn.com/...?abstract_id=NNNN` and `ssrn.com/abstract=NNNN`.
pub fn extract_ssrn_id(url_or_doi: &str) -> Option<String> {
    static SSRN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ssrn[.\-](\d+)").unwrap());
    static ABSTRACT_ID_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)abstract(?:_?id)?=(\d+)").unwrap());

    if let Some(caps) = SSRN_RE.captures(url_or_doi) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }
    if url_or_doi.to_ascii_lowercase().contains("ssrn") {
        return ABSTRACT_ID_RE
            .captures(url_or_doi)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
    }
    None
}

/// A DOI made safe for a URL path: every segment percent-encoded, the `/`
/// separators kept, so `?` and `#` in a suffix cannot start a query or
/// fragment.
pub fn doi_path(doi: &str) -> String {
    doi.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Host of a URL, lower-cased, without the `www.` prefix.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}
