use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use ts_rs::TS;

// Document-progress grammar over processing-log messages. The Chinese
// patterns carry production data written before the log messages were
// translated; both alphabets must keep parsing.
lazy_static! {
    static ref FOUND_RE: Regex = Regex::new(r"Found\s+(\d+)\s+documents").unwrap();
    static ref FOUND_ZH_RE: Regex = Regex::new(r"发现\s*(\d+)\s*个文档").unwrap();
    static ref COMPLETED_RE: Regex =
        Regex::new(r"(?:Document completed|文档完成)\s*\((\d+)/(\d+)\)").unwrap();
    static ref GENERATING_RE: Regex = Regex::new(
        r"(?:Start generating document|Generating document|开始生成文档|正在生成文档)\s*\((\d+)/(\d+)\)"
    )
    .unwrap();
}

const DONE_MARKERS: [&str; 2] = ["文档生成完成", "Document generation completed"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
pub struct DocumentProgress {
    pub total: u32,
    pub completed: u32,
}

/// Fold the progress grammar over a chronological message stream.
///
/// Pattern order is semantic: the first matching rule wins for each message.
pub fn scan_messages<'a, I>(messages: I) -> DocumentProgress
where
    I: IntoIterator<Item = &'a str>,
{
    let mut progress = DocumentProgress::default();

    for message in messages {
        if let Some(caps) = FOUND_RE
            .captures(message)
            .or_else(|| FOUND_ZH_RE.captures(message))
        {
            if let Some(total) = parse_capture(&caps, 1) {
                progress.total = total;
            }
        } else if let Some(caps) = COMPLETED_RE.captures(message) {
            if let Some(done) = parse_capture(&caps, 1) {
                progress.completed = progress.completed.max(done);
            }
            if progress.total == 0
                && let Some(total) = parse_capture(&caps, 2)
            {
                progress.total = total;
            }
        } else if let Some(caps) = GENERATING_RE.captures(message) {
            // Never moves `completed`; only seeds the total when unknown.
            if progress.total == 0
                && let Some(total) = parse_capture(&caps, 2)
            {
                progress.total = total;
            }
        } else if DONE_MARKERS.iter().any(|marker| message.contains(marker)) {
            progress.completed = progress.total;
        }
    }

    progress
}

fn parse_capture(caps: &regex::Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}
