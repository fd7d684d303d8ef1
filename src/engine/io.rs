//! Run export
//!
//! Writes one `<layer>.events.json` per layer (events sorted by tick) and
//! `units.json` (the provenance manifest) into an output directory. The
//! audit command reads the same layout back.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::Engine;
use crate::error::Result;
use crate::hierarchy::{EVENTS_SUFFIX, MANIFEST_FILE};

/// What an export wrote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSummary {
    pub dir: PathBuf,
    pub run_id: String,
    pub files: Vec<PathBuf>,
    pub units: usize,
}

/// Path of a layer's event stream inside an export directory
pub fn events_path(dir: &Path, layer: &str) -> PathBuf {
    dir.join(format!("{}{}", layer, EVENTS_SUFFIX))
}

/// Export every layer buffer and the manifest of `engine`
///
/// # Arguments
/// * `engine` - A finished engine run
/// * `dir` - Output directory, created if missing
///
/// # Errors
/// `Io` or `Serialization` when a file cannot be written.
pub fn export_run(engine: &Engine, dir: &Path) -> Result<ExportSummary> {
    fs::create_dir_all(dir)?;

    let mut files = Vec::new();
    for layer in engine.layers().layers() {
        let path = events_path(dir, &layer.name);
        layer.buffer.to_stream().save(&path)?;
        tracing::info!("Wrote {} events to {}", layer.buffer.len(), path.display());
        files.push(path);
    }

    let manifest = engine.manifest();
    let path = dir.join(MANIFEST_FILE);
    manifest.save(&path)?;
    tracing::info!("Wrote {} units to {}", manifest.units.len(), path.display());
    files.push(path);

    Ok(ExportSummary {
        dir: dir.to_path_buf(),
        run_id: manifest.run_id,
        files,
        units: manifest.units.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::{ClickPerformer, FixedMeterProvider};
    use crate::config::{CountRange, EngineConfig};
    use crate::hierarchy::{audit_dir, Manifest};
    use crate::layers::EventStream;
    use crate::timing::Meter;
    use tempfile::tempdir;

    #[test]
    fn test_export_layout_round_trips() {
        let config = EngineConfig {
            sections: CountRange::new(1, 1),
            phrases_per_section: CountRange::new(1, 1),
            section_types: vec![],
            ..Default::default()
        };
        let provider = FixedMeterProvider::new(Meter::new(7, 8))
            .unwrap()
            .with_poly_meters(vec![Meter::new(7, 4)])
            .unwrap();
        let mut engine =
            Engine::with_parts(config, Box::new(provider), Box::new(ClickPerformer::default())).unwrap();
        engine.run().unwrap();

        let dir = tempdir().unwrap();
        let out = dir.path().join("run");
        let summary = engine.export(&out).unwrap();
        assert_eq!(summary.files.len(), 3);
        assert!(events_path(&out, "primary").exists());
        assert!(events_path(&out, "poly").exists());

        let stream = EventStream::load(&events_path(&out, "poly")).unwrap();
        assert!(stream.events.windows(2).all(|w| w[0].tick <= w[1].tick));

        let manifest = Manifest::load(&out.join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.run_id, summary.run_id);
        assert_eq!(manifest.units.len(), summary.units);

        let report = audit_dir(&out, &engine.config().audit).unwrap();
        assert!(report.is_clean(), "{:?}", report.findings);
        assert!(report.handoffs_checked > 0);
    }
}
