//! Durable trainer profile storage.
//!
//! One canonical JSON document per trainer identifier, written atomically
//! (temp file + rename). Undecodable documents are quarantined in place with
//! a `.corrupt.<unix-timestamp>` suffix and never abort a scan; they are
//! left on disk for manual inspection.

use log::{info, warn};
use rand::Rng;
use serde_json::Value;
use shared::{merge_value, Position, TrainerProfile, SPAWN_SEARCH_ATTEMPTS};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use crate::world::WorldGrid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode profile: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("patch does not fit the profile shape: {0}")]
    InvalidPatch(serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    save_dir: PathBuf,
    spawn_attempts: u32,
}

impl ProfileStore {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        ProfileStore {
            save_dir: save_dir.into(),
            spawn_attempts: SPAWN_SEARCH_ATTEMPTS,
        }
    }

    pub fn with_spawn_attempts(mut self, attempts: u32) -> Self {
        self.spawn_attempts = attempts;
        self
    }

    pub fn save_path(&self, trainer_id: &str) -> PathBuf {
        self.save_dir.join(format!("{trainer_id}.json"))
    }

    pub async fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.save_dir).await?;
        Ok(())
    }

    /// Case-insensitive, whitespace-trimmed exact match over every persisted
    /// profile. A document that fails to decode is quarantined and the scan
    /// continues; decode failures never surface to the caller.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<TrainerProfile>, StoreError> {
        let target = name.trim().to_lowercase();
        if target.is_empty() {
            return Ok(None);
        }

        self.ensure_dir().await?;
        let mut entries = fs::read_dir(&self.save_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let raw = match fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("skipping unreadable save {}: {err}", path.display());
                    continue;
                }
            };

            let profile: TrainerProfile = match serde_json::from_str(&raw) {
                Ok(profile) => profile,
                Err(err) => {
                    self.quarantine(&path, &err).await;
                    continue;
                }
            };

            if profile.trainer.name.trim().to_lowercase() == target {
                return Ok(Some(profile));
            }
        }

        Ok(None)
    }

    /// Renames a corrupt document to `<file>.corrupt.<unix-timestamp>`.
    /// The file stays on disk; it is never deleted automatically.
    async fn quarantine(&self, path: &Path, cause: &serde_json::Error) {
        let mut quarantined = path.as_os_str().to_owned();
        quarantined.push(format!(".corrupt.{}", crate::unix_timestamp()));
        let quarantined = PathBuf::from(quarantined);

        match fs::rename(path, &quarantined).await {
            Ok(()) => warn!(
                "quarantined corrupt save {} -> {} ({cause})",
                path.display(),
                quarantined.display()
            ),
            Err(err) => warn!(
                "failed to quarantine corrupt save {}: {err}",
                path.display()
            ),
        }
    }

    /// Builds a fresh profile: slugged id with a random hex suffix and a
    /// spawn position sampled from the grid (origin when the search fails).
    pub fn create_default(&self, name: &str, sprite: &str, grid: &WorldGrid) -> TrainerProfile {
        let mut profile = TrainerProfile::default();
        profile.trainer.id = allocate_trainer_id(name);
        profile.trainer.name = if name.trim().is_empty() {
            "Trainer".to_string()
        } else {
            name.to_string()
        };
        if !sprite.is_empty() {
            profile.trainer.sprite = sprite.to_string();
        }

        let (x, y) = match grid.random_walkable_tile(self.spawn_attempts) {
            Ok(position) => position,
            Err(err) => {
                warn!("{err}; falling back to default spawn");
                shared::DEFAULT_SPAWN
            }
        };
        profile.trainer.position = Position { x, y };
        profile
    }

    /// Resolves a profile by claimed display name, refreshing the name and
    /// sprite from the claim; creates one otherwise. The initial persist of
    /// a fresh profile is best-effort: a write failure is logged and the
    /// in-memory profile is still returned, so a connect never stalls on
    /// storage. The autosave loop retries the write.
    pub async fn load_or_create(
        &self,
        name: &str,
        sprite: &str,
        grid: &WorldGrid,
    ) -> Result<TrainerProfile, StoreError> {
        if let Some(mut profile) = self.find_by_name(name).await? {
            if !name.trim().is_empty() {
                profile.trainer.name = name.to_string();
            }
            if !sprite.is_empty() {
                profile.trainer.sprite = sprite.to_string();
            }
            return Ok(profile);
        }

        let mut profile = self.create_default(name, sprite, grid);
        match self.save(&mut profile).await {
            Ok(()) => info!("created new trainer profile {}", profile.trainer.id),
            Err(err) => warn!(
                "initial save for {} failed, keeping profile in memory: {err}",
                profile.trainer.id
            ),
        }
        Ok(profile)
    }

    /// Serializes the full profile with stable (sorted) key order and a
    /// trailing newline, then writes it atomically: temp file in the same
    /// directory, then rename over the target.
    pub async fn save(&self, profile: &mut TrainerProfile) -> Result<(), StoreError> {
        self.ensure_dir().await?;

        if profile.trainer.id.is_empty() {
            profile.trainer.id = format!("trainer-{}", random_hex8());
        }

        let document = serde_json::to_value(&*profile)?;
        let payload = format!("{}\n", serde_json::to_string_pretty(&document)?);

        let path = self.save_path(&profile.trainer.id);
        let staging = self.save_dir.join(format!(".{}.tmp", profile.trainer.id));
        fs::write(&staging, payload).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    /// Deep-merges a patch into the profile. A patch that leaves the
    /// document undecodable as a profile is rejected without mutating it.
    /// The merge goes through the typed document, so patch keys outside the
    /// profile schema are dropped rather than persisted.
    pub fn merge_patch(profile: &mut TrainerProfile, patch: &Value) -> Result<(), StoreError> {
        let mut document = serde_json::to_value(&*profile)?;
        merge_value(&mut document, patch);
        let merged: TrainerProfile =
            serde_json::from_value(document).map_err(StoreError::InvalidPatch)?;
        *profile = merged;
        Ok(())
    }
}

/// Lowercases, collapses runs of characters outside `[a-z0-9_-]` into a
/// single `_`, truncates to 32 chars; `"trainer"` when nothing remains.
pub fn slugify(name: &str) -> String {
    let cleaned = name.trim().to_lowercase();
    let mut slug = String::new();
    let mut in_run = false;
    for ch in cleaned.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            slug.push(ch);
            in_run = false;
        } else if !in_run {
            slug.push('_');
            in_run = true;
        }
    }

    slug.truncate(32);
    if slug.is_empty() {
        "trainer".to_string()
    } else {
        slug
    }
}

pub fn allocate_trainer_id(name: &str) -> String {
    format!("{}-{}", slugify(name), random_hex8())
}

fn random_hex8() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}
