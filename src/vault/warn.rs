fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

/// One-line machine-grepable warning for non-fatal anomalies (corrupt
/// sidecar, skipped cleanup target). Values are collapsed to single
/// tokens so the line stays parseable.
pub fn emit(code: &str, stage: &str, target: &str, reason: &str, err: &str) {
    eprintln!(
        "CONVAULT_WARN code={} stage={} target={} reason={} err={}",
        sanitize_value(code),
        sanitize_value(stage),
        sanitize_value(target),
        sanitize_value(reason),
        sanitize_value(err),
    );
}

#[cfg(test)]
mod tests {
    use super::sanitize_value;

    #[test]
    fn sanitize_value_rewrites_whitespace() {
        assert_eq!(sanitize_value("disk full: /tmp"), "disk_full:_/tmp");
    }

    #[test]
    fn sanitize_value_falls_back_for_empty() {
        assert_eq!(sanitize_value("  \t "), "na");
    }
}
