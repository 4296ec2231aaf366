//! `disco search`: ranked hybrid retrieval from the command line.

use anyhow::Result;

use crate::engine::Engine;
use crate::index::{SearchFilters, SearchHit};

/// Parse `--filter key=v1,v2` arguments into search filters.
///
/// Repeating a key merges its values. `key=` yields an empty value set, which
/// applies no penalty.
pub fn parse_filters(raw: &[String]) -> Result<SearchFilters> {
    let mut filters = SearchFilters::new();
    for item in raw {
        let (key, values) = item
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid filter '{}': expected key=value[,value]", item))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("invalid filter '{}': empty key", item);
        }
        filters.entry(key.to_string()).or_default().extend(
            values
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        );
    }
    Ok(filters)
}

pub fn run_search(
    engine: &Engine,
    query: &str,
    filters: &SearchFilters,
    limit: Option<usize>,
    explain: bool,
    json: bool,
) -> Result<()> {
    let hits = engine.search(query, filters, limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit, explain);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit, explain: bool) {
    println!("{}. [{:.3}] {}", rank, hit.score, hit.document_id);
    println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
    for (kind, values) in &hit.highlights {
        println!("    {}: {}", kind, values.join(", "));
    }
    if explain {
        let e = &hit.explain;
        println!(
            "    explain: semantic={:.3} alpha={:.2} structural={:.3} filter=x{}",
            e.semantic_score, e.alpha, e.structural_bonus, e.filter_multiplier
        );
    }
    println!("    trace: {}", hit.trace_id);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_parse_and_merge() {
        let raw = vec![
            "entities=Alice Corp, Bob Industries".to_string(),
            "entities=Carol Ltd".to_string(),
            "emails=".to_string(),
        ];
        let filters = parse_filters(&raw).unwrap();
        assert_eq!(
            filters["entities"],
            vec!["Alice Corp", "Bob Industries", "Carol Ltd"]
        );
        assert!(filters["emails"].is_empty());
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert!(parse_filters(&["entities".to_string()]).is_err());
        assert!(parse_filters(&["=x".to_string()]).is_err());
    }
}
