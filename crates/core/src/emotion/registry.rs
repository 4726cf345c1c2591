use crate::emotion::{
    builtin_emotions, AcousticParams, Emotion, ParamOverrides, FALLBACK_EMOTION,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
    sync::RwLock,
};

const LOG_TARGET: &str = "emotion::registry";
const DOCUMENT_VERSION: &str = "2.0";

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("emotion not found: {0}")]
    NotFound(String),
    #[error("emotion name must not be empty")]
    EmptyName,
    #[error("emotion already exists: {0}")]
    AlreadyExists(String),
    #[error("built-in emotion cannot be deleted: {0}")]
    BuiltinImmutable(String),
    #[error("registry document error: {0}")]
    Document(#[from] serde_json::Error),
    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Serialize, Deserialize)]
struct RegistryDocument {
    version: String,
    emotions: BTreeMap<String, Emotion>,
    aliases: BTreeMap<String, String>,
}

struct RegistryState {
    emotions: BTreeMap<String, Emotion>,
    aliases: BTreeMap<String, String>,
}

impl RegistryState {
    fn from_builtins() -> Self {
        let mut emotions = BTreeMap::new();
        let mut aliases = BTreeMap::new();
        for emotion in builtin_emotions() {
            for alias in &emotion.aliases {
                aliases.insert(alias.clone(), emotion.name.clone());
            }
            emotions.insert(emotion.name.clone(), emotion);
        }
        Self { emotions, aliases }
    }

    /// Lowercase the input, try canonical names, then follow at most one
    /// alias hop. No chains.
    fn resolve(&self, name_or_alias: &str) -> Option<&Emotion> {
        let key = name_or_alias.trim().to_lowercase();
        if let Some(emotion) = self.emotions.get(&key) {
            return Some(emotion);
        }
        self.aliases
            .get(&key)
            .and_then(|canonical| self.emotions.get(canonical))
    }
}

/// Canonical catalog of named emotions and their acoustic parameters.
/// Read-mostly; writes take the exclusive lock and rewrite the persisted
/// document atomically.
pub struct EmotionRegistry {
    path: PathBuf,
    inner: RwLock<RegistryState>,
}

impl EmotionRegistry {
    /// Load the registry document at `path`, or seed it from the built-in
    /// database when missing or unreadable.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, RegistryError> {
        let path = path.into();
        let state = match Self::load_document(&path) {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::info!(target: LOG_TARGET, path = %path.display(), "no registry document, seeding built-ins");
                let state = RegistryState::from_builtins();
                Self::persist_state(&path, &state)?;
                state
            }
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, path = %path.display(), error = %e, "corrupt registry document, recreating from built-ins");
                let state = RegistryState::from_builtins();
                Self::persist_state(&path, &state)?;
                state
            }
        };
        Ok(Self {
            path,
            inner: RwLock::new(state),
        })
    }

    fn load_document(path: &Path) -> Result<Option<RegistryState>, RegistryError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let doc: RegistryDocument = serde_json::from_str(&raw)?;
        Ok(Some(RegistryState {
            emotions: doc.emotions,
            aliases: doc.aliases,
        }))
    }

    fn persist_state(path: &Path, state: &RegistryState) -> Result<(), RegistryError> {
        let doc = RegistryDocument {
            version: DOCUMENT_VERSION.to_owned(),
            emotions: state.emotions.clone(),
            aliases: state.aliases.clone(),
        };
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut tmp, &doc)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Resolve a name or alias to an emotion with parameters clamped to the
    /// declared ranges.
    pub fn get(&self, name_or_alias: &str) -> Result<Emotion, RegistryError> {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        state
            .resolve(name_or_alias)
            .map(|emotion| Emotion {
                params: emotion.params.clamped(),
                ..emotion.clone()
            })
            .ok_or_else(|| RegistryError::NotFound(name_or_alias.to_owned()))
    }

    /// The fallback parameters used when a requested emotion is unknown.
    pub fn neutral_params(&self) -> AcousticParams {
        self.get(FALLBACK_EMOTION)
            .map(|e| e.params)
            .unwrap_or_default()
    }

    /// All emotions, ordered by category then name, parameters clamped.
    pub fn list(&self) -> Vec<Emotion> {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut emotions: Vec<Emotion> = state
            .emotions
            .values()
            .map(|emotion| Emotion {
                params: emotion.params.clamped(),
                ..emotion.clone()
            })
            .collect();
        emotions.sort_by(|a, b| a.category.cmp(&b.category).then(a.name.cmp(&b.name)));
        emotions
    }

    /// Overwrite selected parameters of an emotion and persist the document.
    pub fn customize(
        &self,
        name: &str,
        overrides: ParamOverrides,
    ) -> Result<Emotion, RegistryError> {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let canonical = state
            .resolve(name)
            .map(|e| e.name.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))?;
        let emotion = state
            .emotions
            .get_mut(&canonical)
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))?;
        emotion.params = overrides.apply(emotion.params);
        let updated = emotion.clone();
        Self::persist_state(&self.path, &state)?;
        tracing::info!(target: LOG_TARGET, emotion = %canonical, "customized emotion");
        Ok(Emotion {
            params: updated.params.clamped(),
            ..updated
        })
    }

    /// Restore a built-in emotion to its default parameters.
    pub fn reset(&self, name: &str) -> Result<Emotion, RegistryError> {
        let defaults = builtin_emotions();
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let canonical = state
            .resolve(name)
            .map(|e| e.name.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))?;
        let default = defaults
            .into_iter()
            .find(|e| e.name == canonical)
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))?;
        state.emotions.insert(canonical.clone(), default.clone());
        Self::persist_state(&self.path, &state)?;
        tracing::info!(target: LOG_TARGET, emotion = %canonical, "reset emotion to defaults");
        Ok(default)
    }

    /// Register a new custom emotion. Names and aliases must not collide
    /// with anything already registered.
    pub fn add_custom(&self, emotion: Emotion) -> Result<Emotion, RegistryError> {
        let name = emotion.name.trim().to_lowercase();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if state.resolve(&name).is_some() {
            return Err(RegistryError::AlreadyExists(name));
        }
        for alias in &emotion.aliases {
            if state.resolve(alias).is_some() {
                return Err(RegistryError::AlreadyExists(alias.clone()));
            }
        }
        let stored = Emotion {
            name: name.clone(),
            builtin: false,
            ..emotion
        };
        for alias in &stored.aliases {
            state.aliases.insert(alias.to_lowercase(), name.clone());
        }
        state.emotions.insert(name.clone(), stored.clone());
        Self::persist_state(&self.path, &state)?;
        tracing::info!(target: LOG_TARGET, emotion = %name, "added custom emotion");
        Ok(stored)
    }

    /// Remove a custom emotion. Built-ins are immutable.
    pub fn delete_custom(&self, name: &str) -> Result<(), RegistryError> {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let canonical = state
            .resolve(name)
            .map(|e| e.name.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))?;
        let emotion = state
            .emotions
            .get(&canonical)
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))?;
        if emotion.builtin {
            return Err(RegistryError::BuiltinImmutable(canonical));
        }
        let aliases = emotion.aliases.clone();
        state.emotions.remove(&canonical);
        for alias in aliases {
            state.aliases.remove(&alias.to_lowercase());
        }
        Self::persist_state(&self.path, &state)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
        state.emotions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionCategory;

    fn open_temp() -> (tempfile::TempDir, EmotionRegistry) {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry =
            EmotionRegistry::open(dir.path().join("registry.json")).expect("open registry");
        (dir, registry)
    }

    #[test]
    fn open_seeds_builtins_and_persists_document() {
        let (dir, registry) = open_temp();
        assert!(!registry.is_empty());
        assert!(dir.path().join("registry.json").exists());
        assert!(registry.get("neutral").is_ok());
    }

    #[test]
    fn get_resolves_aliases_with_one_hop() {
        let (_dir, registry) = open_temp();
        let via_alias = registry.get("furious").expect("alias resolves");
        assert_eq!(via_alias.name, "angry");
        assert!(registry.get("no-such-emotion").is_err());
    }

    #[test]
    fn get_is_case_insensitive() {
        let (_dir, registry) = open_temp();
        assert_eq!(registry.get("HAPPY").unwrap().name, "happy");
    }

    #[test]
    fn list_orders_by_category_then_name() {
        let (_dir, registry) = open_temp();
        let listed = registry.list();
        let keys: Vec<(EmotionCategory, String)> = listed
            .iter()
            .map(|e| (e.category, e.name.clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn customize_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        {
            let registry = EmotionRegistry::open(&path).expect("open");
            registry
                .customize(
                    "happy",
                    ParamOverrides {
                        speed: Some(1.45),
                        ..Default::default()
                    },
                )
                .expect("customize");
        }
        let reopened = EmotionRegistry::open(&path).expect("reopen");
        assert_eq!(reopened.get("happy").unwrap().params.speed, 1.45);
    }

    #[test]
    fn reset_restores_builtin_defaults() {
        let (_dir, registry) = open_temp();
        let original = registry.get("sad").unwrap();
        registry
            .customize(
                "sad",
                ParamOverrides {
                    exaggeration: Some(2.2),
                    ..Default::default()
                },
            )
            .expect("customize");
        assert_ne!(registry.get("sad").unwrap().params, original.params);
        registry.reset("sad").expect("reset");
        assert_eq!(registry.get("sad").unwrap().params, original.params);
    }

    #[test]
    fn out_of_range_stored_params_are_clamped_on_read() {
        let (_dir, registry) = open_temp();
        registry
            .customize(
                "calm",
                ParamOverrides {
                    temperature: Some(9.0),
                    ..Default::default()
                },
            )
            .expect("customize");
        assert_eq!(
            registry.get("calm").unwrap().params.temperature,
            crate::emotion::TEMPERATURE_RANGE.1
        );
    }

    #[test]
    fn custom_emotions_can_be_added_once_and_deleted() {
        let (_dir, registry) = open_temp();
        let custom = Emotion {
            name: "Wistful".into(),
            aliases: vec!["nostalgic".into()],
            category: EmotionCategory::Special,
            params: AcousticParams::default(),
            description: "Longing for what was".into(),
            builtin: true, // stored as custom regardless
        };
        let stored = registry.add_custom(custom.clone()).expect("add");
        assert_eq!(stored.name, "wistful");
        assert!(!stored.builtin);
        assert_eq!(registry.get("nostalgic").unwrap().name, "wistful");
        assert!(matches!(
            registry.add_custom(custom),
            Err(RegistryError::AlreadyExists(_))
        ));
        registry.delete_custom("wistful").expect("delete");
        assert!(registry.get("wistful").is_err());
    }

    #[test]
    fn builtins_cannot_be_deleted() {
        let (_dir, registry) = open_temp();
        assert!(matches!(
            registry.delete_custom("neutral"),
            Err(RegistryError::BuiltinImmutable(_))
        ));
    }

    #[test]
    fn corrupt_document_is_recreated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json");
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        let registry = EmotionRegistry::open(&path).expect("open recreates");
        assert!(registry.get("neutral").is_ok());
    }
}
