use crate::muzzik::util::truncate_with_ellipsis;

const MAX_FIELD_CHARS: usize = 160;

/// One `MUZZIK_WARN` line. Unset fields render as `na`.
#[derive(Debug, Clone, Default)]
pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub action: &'a str,
    pub resource: &'a str,
    pub volume: &'a str,
    pub retry: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

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
        truncate_with_ellipsis(trimmed, MAX_FIELD_CHARS)
    }
}

pub fn format_line(event: &WarnEvent<'_>) -> String {
    format!(
        "MUZZIK_WARN code={} stage={} action={} resource={} volume={} retry={} reason={} err={}",
        sanitize_value(event.code),
        sanitize_value(event.stage),
        sanitize_value(event.action),
        sanitize_value(event.resource),
        sanitize_value(event.volume),
        sanitize_value(event.retry),
        sanitize_value(event.reason),
        sanitize_value(event.err),
    )
}

pub fn emit(event: WarnEvent<'_>) {
    eprintln!("{}", format_line(&event));
}
