use crate::voice::{sanitize_voice_id, Gender, Voice, VoiceSource};
use std::{
    collections::BTreeMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::RwLock,
};

const LOG_TARGET: &str = "voice::catalog";

/// Built-in voice manifest: id, gender, description. Voices listed here are
/// always available even without a sample on disk; a matching
/// `voices/<id>.wav` attaches one.
const BUILTIN_MANIFEST: &[(&str, Gender, &str)] = &[
    ("abigail", Gender::Female, "Warm and professional female voice"),
    ("alice", Gender::Female, "Clear and articulate young female voice"),
    ("cora", Gender::Female, "Sophisticated mature female voice"),
    ("elena", Gender::Female, "Expressive and melodic female voice"),
    ("emily", Gender::Female, "Friendly and approachable female voice"),
    ("olivia", Gender::Female, "Elegant and refined female voice"),
    ("taylor", Gender::Female, "Versatile and natural female voice"),
    ("alexander", Gender::Male, "Distinguished and authoritative male voice"),
    ("gabriel", Gender::Male, "Smooth and charismatic male voice"),
    ("jordan", Gender::Male, "Versatile and adaptable male voice"),
    ("michael", Gender::Male, "Classic and dependable male voice"),
    ("thomas", Gender::Male, "Traditional and trustworthy male voice"),
];

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("voice not found: {0}")]
    NotFound(String),
    #[error("voice id already exists: {0}")]
    Duplicate(String),
    #[error("two samples resolve to voice id {id:?}: {first} and {second}")]
    DuplicateOnDisk {
        id: String,
        first: String,
        second: String,
    },
    #[error("voice name has no usable characters: {0:?}")]
    InvalidName(String),
    #[error("voice sample is not a readable PCM wav: {0}")]
    InvalidSample(String),
    #[error("voice sample is {seconds:.1}s, cap is {cap:.1}s")]
    SampleTooLong { seconds: f64, cap: f64 },
    #[error("built-in voice cannot be deleted: {0}")]
    BuiltinImmutable(String),
    #[error("catalog io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Enumerates built-in voices and user-uploaded samples in one directory.
#[derive(Debug)]
pub struct VoiceCatalog {
    voices_dir: PathBuf,
    max_sample_seconds: f64,
    voices: RwLock<BTreeMap<String, Voice>>,
}

impl VoiceCatalog {
    pub fn open<P: Into<PathBuf>>(
        voices_dir: P,
        max_sample_seconds: f64,
    ) -> Result<Self, CatalogError> {
        let voices_dir = voices_dir.into();
        std::fs::create_dir_all(&voices_dir)?;
        let catalog = Self {
            voices_dir,
            max_sample_seconds,
            voices: RwLock::new(BTreeMap::new()),
        };
        catalog.rescan()?;
        Ok(catalog)
    }

    pub fn voices_dir(&self) -> &Path {
        &self.voices_dir
    }

    /// Rebuild the catalog from the manifest plus the wav files on disk.
    /// Two files collapsing to the same id is a hard error.
    pub fn rescan(&self) -> Result<(), CatalogError> {
        let mut scanned: BTreeMap<String, Voice> = manifest_voices();
        let mut sources: BTreeMap<String, String> = BTreeMap::new();

        let mut entries: Vec<PathBuf> = std::fs::read_dir(&self.voices_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("wav"))
                    .unwrap_or(false)
            })
            .collect();
        entries.sort();

        for path in entries {
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_owned(),
                None => continue,
            };
            let id = match sanitize_voice_id(&stem) {
                Some(id) => id,
                None => {
                    tracing::warn!(target: LOG_TARGET, file = %path.display(), "skipping sample with unusable name");
                    continue;
                }
            };
            if let Some(first) = sources.get(&id) {
                return Err(CatalogError::DuplicateOnDisk {
                    id,
                    first: first.clone(),
                    second: path.display().to_string(),
                });
            }
            sources.insert(id.clone(), path.display().to_string());

            match scanned.get_mut(&id) {
                Some(builtin) => {
                    builtin.sample_path = Some(path);
                }
                None => {
                    scanned.insert(
                        id.clone(),
                        Voice {
                            id: id.clone(),
                            display_name: stem,
                            gender: guess_gender(&id),
                            sample_path: Some(path),
                            source: VoiceSource::UserUploaded,
                            description: String::new(),
                        },
                    );
                }
            }
        }

        let count = scanned.len();
        *self.voices.write().unwrap_or_else(|e| e.into_inner()) = scanned;
        tracing::debug!(target: LOG_TARGET, count, "voice catalog scanned");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Voice, CatalogError> {
        let key = id.trim().to_lowercase();
        self.voices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
            .ok_or(CatalogError::NotFound(key))
    }

    pub fn list(&self) -> Vec<Voice> {
        self.voices
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Store an uploaded wav as a new user voice. Refuses to overwrite an
    /// existing id and validates the payload before anything touches disk.
    pub fn upload(
        &self,
        wav_bytes: &[u8],
        requested_name: Option<&str>,
    ) -> Result<Voice, CatalogError> {
        let id = match requested_name {
            Some(name) => sanitize_voice_id(name)
                .ok_or_else(|| CatalogError::InvalidName(name.to_owned()))?,
            None => format!("custom_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
        };

        self.validate_sample(wav_bytes)?;

        if self.get(&id).is_ok() {
            return Err(CatalogError::Duplicate(id));
        }

        let target = self.voices_dir.join(format!("{id}.wav"));
        // create_new keeps two concurrent uploads from clobbering each other
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CatalogError::Duplicate(id));
            }
            Err(e) => return Err(e.into()),
        };
        std::io::Write::write_all(&mut file, wav_bytes)?;
        drop(file);
        self.rescan()?;
        tracing::info!(target: LOG_TARGET, voice = %id, "uploaded voice sample");
        self.get(&id)
    }

    /// Remove a user-uploaded voice and its sample file.
    pub fn delete(&self, id: &str) -> Result<(), CatalogError> {
        let voice = self.get(id)?;
        if voice.source == VoiceSource::Builtin {
            return Err(CatalogError::BuiltinImmutable(voice.id));
        }
        if let Some(path) = voice.sample_path {
            std::fs::remove_file(path)?;
        }
        self.rescan()
    }

    fn validate_sample(&self, wav_bytes: &[u8]) -> Result<(), CatalogError> {
        let reader = hound::WavReader::new(Cursor::new(wav_bytes))
            .map_err(|e| CatalogError::InvalidSample(e.to_string()))?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.channels > 2 {
            return Err(CatalogError::InvalidSample(format!(
                "{} channels, expected mono or stereo",
                spec.channels
            )));
        }
        let seconds = f64::from(reader.duration()) / f64::from(spec.sample_rate);
        if seconds > self.max_sample_seconds {
            return Err(CatalogError::SampleTooLong {
                seconds,
                cap: self.max_sample_seconds,
            });
        }
        Ok(())
    }
}

fn manifest_voices() -> BTreeMap<String, Voice> {
    BUILTIN_MANIFEST
        .iter()
        .map(|(id, gender, description)| {
            (
                (*id).to_owned(),
                Voice {
                    id: (*id).to_owned(),
                    display_name: capitalize(id),
                    gender: *gender,
                    sample_path: None,
                    source: VoiceSource::Builtin,
                    description: (*description).to_owned(),
                },
            )
        })
        .collect()
}

/// Naming-pattern fallback for samples not covered by the manifest.
fn guess_gender(id: &str) -> Gender {
    if id.ends_with(['a', 'e', 'i']) {
        Gender::Female
    } else {
        Gender::Male
    }
}

fn capitalize(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
