//! Counts a subject's pages by probing 1, 2, 3, ... until the first absent page.
//!
//! Pages are assumed to be numbered densely from 1. A gap in the source is
//! indistinguishable from the end of the subject, so pages after a gap are
//! never reported.

use std::path::PathBuf;

use futures::StreamExt;
use futures::stream;

use super::probe::{PageProbe, ProbeOutcome};
use super::subject::Subject;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFound {
    pub page: u32,
    pub path: PathBuf,
}

/// Returns the highest contiguous confirmed page (0 if page 1 is absent).
///
/// `lookahead` bounds how many probes run ahead of the confirmed frontier.
/// Results are consumed strictly in page order, so `on_found` sees pages in
/// increasing order and nothing past the first gap; probes already in flight
/// beyond the gap are dropped.
pub async fn discover<F>(
    probe: &PageProbe<'_>,
    subject: &Subject,
    lookahead: usize,
    mut on_found: F,
) -> u32
where
    F: FnMut(PageFound),
{
    let mut highest = 0;

    let mut probes = stream::iter(1u32..)
        .map(|page| async move { (page, probe.probe(subject, page).await) })
        .buffered(lookahead.max(1));

    while let Some((page, outcome)) = probes.next().await {
        match outcome {
            ProbeOutcome::Found(path) => {
                highest = page;
                on_found(PageFound { page, path });
            }
            ProbeOutcome::Absent => break,
        }
    }

    log::info!("Detected {} page(s) for {}", highest, subject.slug());
    highest
}
