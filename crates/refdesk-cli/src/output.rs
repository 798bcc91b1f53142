use std::io::Write;
use std::time::Duration;

use owo_colors::OwoColorize;
use refdesk_core::{CacheStats, PaperDetail, ScoredRecord, SearchPage, ServiceCacheStats};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print one timed run line (used with --repeat to make cache hits visible).
pub fn print_run_timing(
    w: &mut dyn Write,
    run: u32,
    elapsed: Duration,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "run {}: {}", run, format!("{:.0?}", elapsed).cyan())?;
    } else {
        writeln!(w, "run {}: {:.0?}", run, elapsed)?;
    }
    Ok(())
}

/// Print a ranked result page as an indexed list.
pub fn print_search_page(
    w: &mut dyn Write,
    page: &SearchPage,
    color: ColorMode,
) -> std::io::Result<()> {
    if page.records.is_empty() {
        writeln!(w, "No results.")?;
        return Ok(());
    }

    writeln!(
        w,
        "Found {} results (page {} of {})",
        page.total,
        page.page,
        page.total_pages()
    )?;
    writeln!(w)?;

    let offset = (page.page as usize - 1) * page.per_page as usize;
    for (i, scored) in page.records.iter().enumerate() {
        print_record_line(w, offset + i + 1, scored, color)?;
    }
    Ok(())
}

fn print_record_line(
    w: &mut dyn Write,
    position: usize,
    scored: &ScoredRecord,
    color: ColorMode,
) -> std::io::Result<()> {
    let record = &scored.record;
    let marker = format!("{:>3}.", position);
    let signals = format!(
        "score {} | rating {:.1} | {} downloads | {}",
        scored.relevance_score, scored.average_rating, record.download_count, record.field_name
    );

    if color.enabled() {
        writeln!(
            w,
            "{} {} {}",
            marker.bold().yellow(),
            record.title.bold(),
            format!("({})", record.published_on).dimmed()
        )?;
        writeln!(w, "     {}", signals.dimmed())?;
        writeln!(w, "     {}", author_list(record.authors.as_slice()))?;
    } else {
        writeln!(w, "{} {} ({})", marker, record.title, record.published_on)?;
        writeln!(w, "     {}", signals)?;
        writeln!(w, "     {}", author_list(record.authors.as_slice()))?;
    }
    writeln!(w)?;
    Ok(())
}

/// Print one paper's aggregate detail view.
pub fn print_detail(
    w: &mut dyn Write,
    detail: &PaperDetail,
    color: ColorMode,
) -> std::io::Result<()> {
    let record = &detail.record;
    let sep = "=".repeat(60);
    if color.enabled() {
        writeln!(w, "{}", sep.bold())?;
        writeln!(w, "{}", record.title.bold().cyan())?;
        writeln!(w, "{}", sep.bold())?;
    } else {
        writeln!(w, "{}", sep)?;
        writeln!(w, "{}", record.title)?;
        writeln!(w, "{}", sep)?;
    }
    writeln!(w)?;

    writeln!(w, "Field:      {} (id {})", record.field_name, record.field_id)?;
    writeln!(w, "Authors:    {}", author_list(record.authors.as_slice()))?;
    writeln!(w, "Published:  {}", record.published_on)?;
    if !record.keywords.is_empty() {
        writeln!(w, "Keywords:   {}", record.keywords)?;
    }
    writeln!(w, "Downloads:  {}", record.download_count)?;
    if record.review_count > 0 {
        writeln!(
            w,
            "Rating:     {:.1} ({} reviews)",
            record.average_rating(),
            record.review_count
        )?;
    } else {
        writeln!(w, "Rating:     (no reviews)")?;
    }
    writeln!(w, "Submitted:  user {}", detail.submitted_by)?;

    if !record.abstract_text.is_empty() {
        writeln!(w)?;
        if color.enabled() {
            writeln!(w, "{}", record.abstract_text.dimmed())?;
        } else {
            writeln!(w, "{}", record.abstract_text)?;
        }
    }
    Ok(())
}

/// Print the per-family cache counters.
pub fn print_cache_stats(
    w: &mut dyn Write,
    stats: &ServiceCacheStats,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "Cache counters:".bold())?;
    } else {
        writeln!(w, "Cache counters:")?;
    }
    print_family(w, "search", &stats.search, color)?;
    print_family(w, "detail", &stats.detail, color)?;
    print_family(w, "history", &stats.history, color)?;
    Ok(())
}

fn print_family(
    w: &mut dyn Write,
    name: &str,
    stats: &CacheStats,
    color: ColorMode,
) -> std::io::Result<()> {
    let label = format!("{:<8}", format!("{}:", name));
    let line = format!(
        "{} hits, {} misses, {} evictions, {} invalidations, {} entries",
        stats.hits, stats.misses, stats.evictions, stats.invalidations, stats.entries
    );
    if color.enabled() {
        writeln!(w, "  {} {}", label.bold(), line)?;
    } else {
        writeln!(w, "  {} {}", label, line)?;
    }
    Ok(())
}

fn author_list(authors: &[refdesk_core::AuthorName]) -> String {
    if authors.is_empty() {
        "(no authors)".to_string()
    } else {
        authors
            .iter()
            .map(|a| format!("{} {}", a.first_name, a.last_name))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
