//! teknium/OpenHermes-2.5: one JSON array of ShareGPT records.

use super::sharegpt::ShareGptRecord;
use super::{locate_source, read_json_array, NormalizeOptions, NormalizeReport, Normalizer};
use crate::error::PrepResult;
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenHermesNormalizer;

impl Normalizer for OpenHermesNormalizer {
    fn name(&self) -> &'static str {
        "openhermes"
    }

    fn normalize(&self, source_dataset: &str, raw_source_path: &Path, options: &NormalizeOptions) -> PrepResult<NormalizeReport> {
        let file = locate_source(raw_source_path, &["openhermes2_5.json"], "json")?;
        let mut report = NormalizeReport::new(source_dataset);

        read_json_array(&file, options, |index, value| {
            let result = ShareGptRecord::parse(value).and_then(|r| r.into_conversation(source_dataset));
            report.push(index, result);
        })?;

        Ok(report.finish())
    }
}
