use std::io::Write;

use owo_colors::OwoColorize;
use scholar_enrich_core::{Config, RunStats, SourceKind, Work, identifiers};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Truncate a title for one-line display.
pub fn short_title(title: &str, max_chars: usize) -> String {
    if title.chars().count() > max_chars {
        let cut: String = title.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        title.to_string()
    }
}

/// Print the end-of-run report, highlighting the lines an operator acts on.
pub fn print_report(w: &mut dyn Write, stats: &RunStats, color: ColorMode) -> std::io::Result<()> {
    writeln!(w)?;
    if !color.enabled() {
        return writeln!(w, "{}", stats);
    }

    let report = stats.to_string();
    for (i, line) in report.lines().enumerate() {
        if i == 0 {
            writeln!(w, "{}", line.bold())?;
        } else if line.trim_start().starts_with("Abstracts recovered") {
            writeln!(w, "{}", line.green())?;
        } else if line.trim_start().starts_with("No abstract found") && stats.no_abstract > 0 {
            writeln!(w, "{}", line.red())?;
        } else if line.trim_start().starts_with("Works with no summary") && stats.missing_all > 0 {
            writeln!(w, "{}", line.yellow())?;
        } else {
            writeln!(w, "{}", line)?;
        }
    }
    Ok(())
}

/// Print the waterfall order and which sources run under `config`.
pub fn print_sources(w: &mut dyn Write, config: &Config, color: ColorMode) -> std::io::Result<()> {
    for (i, kind) in SourceKind::WATERFALL.iter().enumerate() {
        let mut enabled = config.source_enabled(*kind);
        let mut note = "";
        if *kind == SourceKind::Core && config.core_api_key.is_none() {
            enabled = false;
            note = " (CORE_API_KEY not set)";
        }
        let state = if enabled { "enabled" } else { "disabled" };
        if color.enabled() {
            if enabled {
                writeln!(w, "{:>2}. {:<18} {}{}", i + 1, kind.label(), state.green(), note)?;
            } else {
                writeln!(w, "{:>2}. {:<18} {}{}", i + 1, kind.label(), state.dimmed(), note)?;
            }
        } else {
            writeln!(w, "{:>2}. {:<18} {}{}", i + 1, kind.label(), state, note)?;
        }
    }
    Ok(())
}

/// Print every identifier recoverable from a URL or DOI string.
pub fn print_identifiers(w: &mut dyn Write, input: &str, color: ColorMode) -> std::io::Result<()> {
    let input = input.trim();
    let work = if input.starts_with("http://") || input.starts_with("https://") {
        Work {
            url: Some(input.to_string()),
            ..Work::new(input)
        }
    } else {
        Work {
            doi: Some(input.to_string()),
            ..Work::new(input)
        }
    };

    let rows = [
        ("DOI", work.doi()),
        ("arXiv", work.arxiv_id()),
        ("PMID", work.pmid()),
        ("SSRN", work.ssrn_id()),
        ("Host", work.url.as_deref().and_then(identifiers::host_of)),
    ];
    for (label, value) in rows {
        match value {
            Some(v) => writeln!(w, "{:<6} {}", label, v)?,
            None if color.enabled() => writeln!(w, "{:<6} {}", label, "-".dimmed())?,
            None => writeln!(w, "{:<6} -", label)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_without_color() {
        let mut stats = RunStats::new();
        stats.total = 3;
        stats.per_source.insert(SourceKind::Arxiv, 2);
        stats.no_abstract = 1;
        stats.missing_one = 2;
        stats.missing_all = 1;

        let mut buf = Vec::new();
        print_report(&mut buf, &stats, ColorMode(false)).unwrap();
        let out = String::from_utf8(buf).unwrap();

        assert!(out.contains("Abstracts recovered:    2"));
        assert!(out.contains("arXiv"));
        assert!(out.contains("missingAllThree"));
        assert!(out.contains("no summary, full text or tags: 1"));
        assert!(!out.contains("\u{1b}["));
    }

    #[test]
    fn colored_report_keeps_every_line() {
        let mut stats = RunStats::new();
        stats.total = 1;
        stats.no_abstract = 1;
        stats.missing_all = 1;

        let mut plain = Vec::new();
        print_report(&mut plain, &stats, ColorMode(false)).unwrap();
        let mut colored = Vec::new();
        print_report(&mut colored, &stats, ColorMode(true)).unwrap();

        let plain = String::from_utf8(plain).unwrap();
        let colored = String::from_utf8(colored).unwrap();
        assert!(colored.contains("\u{1b}["));
        assert_eq!(plain.lines().count(), colored.lines().count());
    }

    #[test]
    fn sources_list_marks_gated_ones() {
        let mut buf = Vec::new();
        print_sources(&mut buf, &Config::default(), ColorMode(false)).unwrap();
        let out = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = out.lines().collect();

        assert_eq!(lines.len(), 9);
        assert!(lines[0].contains("SSRN HTML") && lines[0].ends_with("enabled"));
        assert!(lines[1].contains("ACS HTML") && lines[1].ends_with("disabled"));
        assert!(lines[7].contains("CORE_API_KEY not set"));
    }

    #[test]
    fn identifiers_for_ssrn_doi_url() {
        let mut buf = Vec::new();
        print_identifiers(&mut buf, "https://doi.org/10.2139/ssrn.5801322", ColorMode(false))
            .unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.contains("DOI    10.2139/ssrn.5801322"));
        assert!(out.contains("SSRN   5801322"));
        assert!(out.contains("arXiv  -"));
    }

    #[test]
    fn short_title_counts_chars() {
        assert_eq!(short_title("ääääää", 3), "äää...");
        assert_eq!(short_title("abc", 3), "abc");
    }
}
