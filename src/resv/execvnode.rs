//! Codec for the compact encoding of a standing reservation's
//! per-occurrence node assignments, plus node-spec string helpers.
//!
//! The condensed form is `<N>#<segment>[<range>]<segment>[<range>]...` where
//! `N` is the occurrence count, each segment is an execution-vnode string
//! such as `(v1:ncpus=1)+(v2:ncpus=1)`, and each bracketed range names the
//! 0-based occurrence indices the preceding segment covers (`[2]` or
//! `[0-3]`). Segment contents are opaque to the codec; only the leading `#`
//! and the range brackets are structural.

use crate::error::{ResvError, Result};

/// Parse the occurrence count from the leading `<N>#` prefix.
pub fn count(text: &str) -> Result<u32> {
    let (prefix, _) = text
        .split_once('#')
        .ok_or_else(|| ResvError::ProtocolMismatch("occurrence sequence lacks '#' separator".to_string()))?;
    let n: u32 = prefix
        .parse()
        .map_err(|_| ResvError::ProtocolMismatch(format!("non-numeric occurrence count '{prefix}'")))?;
    if n == 0 {
        return Err(ResvError::ProtocolMismatch("occurrence count must be positive".to_string()));
    }
    Ok(n)
}

/// Unroll a condensed sequence into one assignment string per occurrence,
/// in occurrence order. Every declared occurrence must be covered exactly
/// once by the bracketed ranges.
pub fn decode(text: &str) -> Result<Vec<String>> {
    let n = count(text)? as usize;
    let body = match text.split_once('#') {
        Some((_, body)) => body,
        None => return Err(ResvError::ProtocolMismatch("occurrence sequence lacks '#' separator".to_string())),
    };

    let mut slots: Vec<Option<String>> = vec![None; n];
    let mut rest = body;
    while !rest.is_empty() {
        let open = rest
            .find('[')
            .ok_or_else(|| ResvError::ProtocolMismatch("segment without occurrence range".to_string()))?;
        let close = rest[open..]
            .find(']')
            .map(|i| i + open)
            .ok_or_else(|| ResvError::ProtocolMismatch("unterminated occurrence range".to_string()))?;

        let segment = &rest[..open];
        let (lo, hi) = parse_range(&rest[open + 1..close])?;
        if hi >= n {
            return Err(ResvError::ProtocolMismatch(format!(
                "occurrence range {lo}-{hi} exceeds declared count {n}"
            )));
        }
        for slot in &mut slots[lo..=hi] {
            if slot.is_some() {
                return Err(ResvError::ProtocolMismatch(format!(
                    "occurrence covered twice by range {lo}-{hi}"
                )));
            }
            *slot = Some(segment.to_string());
        }
        rest = &rest[close + 1..];
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| ResvError::ProtocolMismatch(format!("no assignment for occurrence {i}")))
        })
        .collect()
}

fn parse_range(range: &str) -> Result<(usize, usize)> {
    let bad = || ResvError::ProtocolMismatch(format!("invalid occurrence range '{range}'"));
    match range.split_once('-') {
        Some((lo, hi)) => {
            let lo = lo.trim().parse().map_err(|_| bad())?;
            let hi = hi.trim().parse().map_err(|_| bad())?;
            if lo > hi {
                return Err(bad());
            }
            Ok((lo, hi))
        }
        None => {
            let i = range.trim().parse().map_err(|_| bad())?;
            Ok((i, i))
        }
    }
}

/// Extract the node names out of a canonical node-spec string, in order,
/// deduplicated. `(v1:ncpus=1+v2:ncpus=1)+(v3:mem=1gb)` yields v1, v2, v3.
pub fn parse_nodes(spec: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for part in spec.split('+') {
        let part = part.trim().trim_start_matches('(').trim_end_matches(')');
        if part.is_empty() {
            continue;
        }
        let name = part.split(':').next().unwrap_or(part).trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Remove the parenthesized chunk containing `node` from a node-spec string.
/// Returns the removed chunk and the remaining spec (separators untouched;
/// see [`normalize_spec`]), or None when the node does not appear.
pub fn strip_node_chunk(spec: &str, node: &str) -> Option<(String, String)> {
    let needle = format!("{node}:");
    let mut search_from = 0;
    while let Some(rel) = spec[search_from..].find(&needle) {
        let pos = search_from + rel;
        // a node name match must sit at a chunk boundary, not inside a
        // longer name
        let boundary = pos == 0 || matches!(spec.as_bytes()[pos - 1], b'(' | b'+');
        if !boundary {
            search_from = pos + 1;
            continue;
        }
        let begin = spec[..pos].rfind('(').unwrap_or(pos);
        let end = match spec[pos..].find(')') {
            Some(i) => pos + i + 1,
            None => spec.len(),
        };
        let chunk = spec[begin..end].to_string();
        let remaining = format!("{}{}", &spec[..begin], &spec[end..]);
        return Some((chunk, remaining));
    }
    None
}

/// Clean up separators after chunk removal: drop a leading or trailing `+`
/// and collapse doubled `++` left by splicing a middle chunk out.
pub fn normalize_spec(spec: &str) -> String {
    let mut s = spec.trim_start_matches('+').trim_end_matches('+').to_string();
    while let Some(pos) = s.find("++") {
        s.remove(pos);
    }
    s
}
