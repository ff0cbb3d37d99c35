//! Audio file tag writing
//!
//! After analysis changes a track's attributes the orchestrator may push them
//! back into the file's primary tag. Failures here never fail an analysis.

use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use std::path::Path;
use thiserror::Error;

/// Tag writing errors
#[derive(Debug, Error)]
pub enum TagError {
    /// lofty could not read or save the file
    #[error("Tag I/O failed: {0}")]
    Lofty(#[from] lofty::error::LoftyError),

    /// File format has no writable tag
    #[error("No writable tag for {0}")]
    Unsupported(String),
}

/// Attribute values to write; `None` fields are left as they are
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagUpdate {
    pub bpm: Option<u32>,
    pub key: Option<String>,
    pub energy: Option<u8>,
}

impl TagUpdate {
    pub fn is_empty(&self) -> bool {
        self.bpm.is_none() && self.key.is_none() && self.energy.is_none()
    }
}

/// Writes analyzed attributes into audio file tags
///
/// Blocking; the orchestrator calls it from `spawn_blocking`.
pub trait TagWriter: Send + Sync {
    fn write_tags(&self, path: &Path, update: &TagUpdate) -> Result<(), TagError>;
}

/// Tag writer backed by lofty
///
/// BPM goes to the BPM frame, key to the initial key frame and energy to a
/// comment of the form `Energy: N`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTagWriter;

impl TagWriter for LoftyTagWriter {
    fn write_tags(&self, path: &Path, update: &TagUpdate) -> Result<(), TagError> {
        if update.is_empty() {
            return Ok(());
        }

        let mut tagged_file = Probe::open(path)?.read()?;

        if tagged_file.primary_tag().is_none() {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
        }

        let tag = tagged_file
            .primary_tag_mut()
            .ok_or_else(|| TagError::Unsupported(path.display().to_string()))?;

        if let Some(bpm) = update.bpm {
            tag.insert_text(ItemKey::Bpm, bpm.to_string());
        }
        if let Some(key) = &update.key {
            tag.insert_text(ItemKey::InitialKey, key.clone());
        }
        if let Some(energy) = update.energy {
            tag.insert_text(ItemKey::Comment, format!("Energy: {}", energy));
        }

        tag.save_to_path(path, WriteOptions::default())?;

        tracing::debug!(
            file = %path.display(),
            bpm = ?update.bpm,
            key = ?update.key,
            energy = ?update.energy,
            "Wrote analysis tags"
        );

        Ok(())
    }
}

/// Tag writer that does nothing (tag writing disabled)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTagWriter;

impl TagWriter for NoopTagWriter {
    fn write_tags(&self, _path: &Path, _update: &TagUpdate) -> Result<(), TagError> {
        Ok(())
    }
}
