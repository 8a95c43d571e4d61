use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Current Unix epoch in milliseconds, the unit every stored message uses.
pub fn now_epoch_millis() -> Result<i64> {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    Ok(i64::try_from(millis)?)
}

/// Collapse whitespace runs (newlines included) into single spaces, drop
/// other control characters, then cut to `max_chars` Unicode characters and
/// append `…` when anything was removed.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean = input
        .split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_with_ellipsis;

    #[test]
    fn short_input_is_kept() {
        assert_eq!(truncate_with_ellipsis("bom dia", 120), "bom dia");
    }

    #[test]
    fn long_input_is_cut_on_char_boundary() {
        let got = truncate_with_ellipsis(&"ç".repeat(10), 4);
        assert_eq!(got, "çççç…");
    }

    #[test]
    fn newlines_collapse_to_spaces() {
        assert_eq!(truncate_with_ellipsis("a\n\nb\tc", 10), "a b c");
    }
}
