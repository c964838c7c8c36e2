use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, warn};

use crate::card::{Card, CardTemplate};
use crate::config::ProbeFailurePolicy;
use crate::error::{AutopaceError, Result};
use crate::media::{audio_field_names, find_audio_fields};
use crate::probe::DurationProber;
use crate::template::extract_referenced_fields;

/// Outcome of probing one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationResult {
    pub filename: String,
    pub duration: std::result::Result<f64, String>,
}

/// Total answer duration of a card plus what happened to each clip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub total_seconds: f64,
    pub results: Vec<DurationResult>,
}

impl AggregateReport {
    pub fn failures(&self) -> impl Iterator<Item = &DurationResult> {
        self.results.iter().filter(|r| r.duration.is_err())
    }

    pub fn probed_files(&self) -> usize {
        self.results.len()
    }
}

/// Unique audio filenames embedded in the fields the answer template shows.
///
/// The question side is not measured.
pub fn answer_audio_files(card: &Card, template: &CardTemplate) -> BTreeSet<String> {
    let audio_fields = find_audio_fields(card);
    let known = audio_field_names(&audio_fields);

    extract_referenced_fields(&template.answer_format, &known)
        .iter()
        .filter_map(|field| audio_fields.get(field))
        .flatten()
        .cloned()
        .collect()
}

/// Probe every unique clip of the card's answer under `media_dir` and sum the
/// durations.
///
/// With [`ProbeFailurePolicy::Abort`] the first failing clip fails the card;
/// with [`ProbeFailurePolicy::Skip`] it is recorded in the report and left out
/// of the total. Failures are logged either way.
pub fn aggregate_answer_duration(
    card: &Card,
    template: &CardTemplate,
    media_dir: &Path,
    prober: &dyn DurationProber,
    policy: ProbeFailurePolicy,
) -> Result<AggregateReport> {
    let files = answer_audio_files(card, template);
    if files.is_empty() {
        debug!("Card {} has no audio on the answer side", card.id);
        return Ok(AggregateReport::default());
    }

    debug!(
        "Card {}: probing {} unique clip(s) with {}",
        card.id,
        files.len(),
        prober.name()
    );

    let mut report = AggregateReport::default();

    for filename in files {
        let path = media_dir.join(&filename);
        match prober.probe(&path) {
            Ok(seconds) => {
                report.total_seconds += seconds;
                report.results.push(DurationResult {
                    filename,
                    duration: Ok(seconds),
                });
            }
            Err(e) => {
                warn!("Card {}: failed to probe {}: {}", card.id, filename, e);
                match policy {
                    ProbeFailurePolicy::Abort => {
                        return Err(AutopaceError::Probe(format!("{filename}: {e}")));
                    }
                    ProbeFailurePolicy::Skip => report.results.push(DurationResult {
                        filename,
                        duration: Err(e.to_string()),
                    }),
                }
            }
        }
    }

    debug!(
        "Card {}: answer audio totals {:.3}s",
        card.id, report.total_seconds
    );
    Ok(report)
}
