// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Conditional artifact assembly
//!
//! Picks the most capable signing profile whose secrets were all supplied,
//! decodes those secrets and writes them where the build expects them. When
//! no profile is satisfiable the fallback profile (unsigned by default) is
//! selected and nothing is written.

pub mod presets;

use base64::Engine as _;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::context::RunContext;
use crate::errors::ShipflowError;
use crate::pipeline::{ArtifactProfile, SecretEncoding};
use crate::secrets::SecretBlob;

/// Decodes encoded secret payloads
pub trait PayloadDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>, String>;
}

/// Standard base64 with padding; embedded line breaks are tolerated
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Decoder;

impl PayloadDecoder for Base64Decoder {
    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>, String> {
        let compact: Vec<u8> = payload
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(&compact)
            .map_err(|e| e.to_string())
    }
}

/// Why a profile was passed over
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    MissingSecrets { secrets: Vec<String> },
    Disabled { condition: String },
}

/// A profile that was considered and not selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSkip {
    pub profile: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Result of profile selection
#[derive(Debug, Clone)]
pub struct Selection {
    pub profile: ArtifactProfile,
    pub skipped: Vec<ProfileSkip>,
}

impl Selection {
    pub fn is_fallback(&self) -> bool {
        self.profile.fallback
    }
}

/// Files written for the selected profile
#[derive(Debug, Clone, Serialize)]
pub struct Assembly {
    pub profile: String,
    pub fallback: bool,
    pub written: Vec<PathBuf>,
    pub skipped: Vec<ProfileSkip>,
}

/// Signing material on disk, removed when the guard is dropped
#[derive(Debug, Default)]
#[must_use = "dropping the guard removes the placed files"]
pub struct PlacementGuard {
    paths: Vec<PathBuf>,
}

impl PlacementGuard {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every placed file now. Returns how many were removed.
    pub fn release(mut self) -> usize {
        remove_files(&std::mem::take(&mut self.paths))
    }

    /// Leave the files in place after the run
    pub fn keep(mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.paths)
    }
}

impl Drop for PlacementGuard {
    fn drop(&mut self) {
        if !self.paths.is_empty() {
            let removed = remove_files(&self.paths);
            tracing::debug!(files = removed, "Removed signing material on teardown");
        }
    }
}

/// Selects and materialises signing profiles
pub struct ArtifactAssembler {
    profiles: Vec<ArtifactProfile>,
    decoder: Box<dyn PayloadDecoder>,
}

impl ArtifactAssembler {
    pub fn new(profiles: Vec<ArtifactProfile>) -> Self {
        Self {
            profiles,
            decoder: Box::new(Base64Decoder),
        }
    }

    pub fn with_decoder(mut self, decoder: impl PayloadDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    /// Non-fallback profiles, most demanding first. Ties keep declaration order.
    pub fn priority_order(&self) -> Vec<&ArtifactProfile> {
        let mut candidates: Vec<&ArtifactProfile> =
            self.profiles.iter().filter(|p| !p.fallback).collect();
        candidates.sort_by(|a, b| b.requires.len().cmp(&a.requires.len()));
        candidates
    }

    /// The designated fallback, or the built-in unsigned profile
    pub fn fallback(&self) -> ArtifactProfile {
        self.profiles
            .iter()
            .find(|p| p.fallback)
            .cloned()
            .unwrap_or_else(ArtifactProfile::unsigned)
    }

    /// Pick the first satisfiable profile in priority order
    pub fn select(&self, ctx: &RunContext) -> Selection {
        let mut skipped = Vec::new();

        for profile in self.priority_order() {
            if let Some(when) = &profile.when {
                if !when.evaluate(ctx.inputs()) {
                    skipped.push(ProfileSkip {
                        profile: profile.name.clone(),
                        reason: SkipReason::Disabled {
                            condition: when.to_string(),
                        },
                    });
                    continue;
                }
            }

            let missing: Vec<String> = profile
                .requires
                .iter()
                .filter(|name| !ctx.secrets().is_present(name))
                .cloned()
                .collect();

            if missing.is_empty() {
                return Selection {
                    profile: profile.clone(),
                    skipped,
                };
            }

            skipped.push(ProfileSkip {
                profile: profile.name.clone(),
                reason: SkipReason::MissingSecrets { secrets: missing },
            });
        }

        Selection {
            profile: self.fallback(),
            skipped,
        }
    }

    /// Select a profile and write its decoded secrets under the run directory
    ///
    /// Every payload is decoded before anything is written, so a malformed
    /// secret leaves no partial signing material behind. Decoded text is
    /// added to the run's mask set. The files live as long as the returned
    /// guard.
    pub fn assemble(&self, ctx: &mut RunContext) -> Result<(Assembly, PlacementGuard), ShipflowError> {
        let selection = self.select(ctx);
        let profile = &selection.profile;

        for skip in &selection.skipped {
            tracing::debug!(profile = %skip.profile, reason = ?skip.reason, "Profile not selected");
        }

        let mut decoded: Vec<(PathBuf, SecretBlob)> = Vec::with_capacity(profile.placements.len());
        for placement in &profile.placements {
            let blob = ctx.secrets().get(&placement.secret).ok_or_else(|| {
                ShipflowError::MissingSecret {
                    secret: placement.secret.clone(),
                    step: None,
                }
            })?;

            let bytes = match placement.encoding {
                SecretEncoding::Base64 => {
                    self.decoder
                        .decode(blob.expose())
                        .map_err(|reason| ShipflowError::SecretDecode {
                            secret: placement.secret.clone(),
                            reason,
                        })?
                }
                SecretEncoding::Raw => blob.expose().to_vec(),
            };

            decoded.push((ctx.working_dir().join(&placement.path), SecretBlob::new(bytes)));
        }

        let mut guard = PlacementGuard::default();
        for (path, blob) in &decoded {
            write_secret_file(path, blob.expose())?;
            guard.paths.push(path.clone());
        }
        for (_, blob) in &decoded {
            ctx.secrets_mut().mask_decoded(blob.expose());
        }

        tracing::info!(
            profile = %profile.name,
            fallback = profile.fallback,
            files = guard.paths.len(),
            "Selected artifact profile"
        );

        let assembly = Assembly {
            profile: profile.name.clone(),
            fallback: profile.fallback,
            written: guard.paths.clone(),
            skipped: selection.skipped,
        };
        Ok((assembly, guard))
    }
}

fn write_secret_file(path: &Path, bytes: &[u8]) -> Result<(), ShipflowError> {
    let write_error = |e: std::io::Error| ShipflowError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    std::fs::write(path, bytes).map_err(write_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(write_error)?;
    }

    Ok(())
}

fn remove_files(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove signing material"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResolvedInputs;
    use crate::pipeline::{InputValue, Placement, Predicate};
    use crate::secrets::SecretVault;

    const KEYSTORE: &str = "a2V5c3RvcmUtYnl0ZXM="; // "keystore-bytes"
    const PROPERTIES: &str = "c3RvcmVQYXNzd29yZD14"; // "storePassword=x"

    fn ctx(dir: &Path, vault: SecretVault, build_type: &str) -> RunContext {
        let mut inputs = ResolvedInputs::default();
        inputs.set("build_type", InputValue::String(build_type.into()));
        RunContext::new("mobile", inputs, vault, vec![], dir)
    }

    fn android_release() -> ArtifactProfile {
        let mut profile = presets::android_signed();
        profile.when = Some(Predicate::Equals {
            input: "build_type".into(),
            value: "release".into(),
        });
        profile
    }

    fn profile(name: &str, requires: &[&str]) -> ArtifactProfile {
        ArtifactProfile {
            name: name.into(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            placements: vec![],
            when: None,
            fallback: false,
        }
    }

    #[test]
    fn test_android_signed_selected_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::new()
            .with("ANDROID_KEYSTORE_BASE64", KEYSTORE)
            .with("ANDROID_KEY_PROPERTIES_BASE64", PROPERTIES);
        let mut ctx = ctx(dir.path(), vault, "release");

        let assembler = ArtifactAssembler::new(vec![android_release(), presets::unsigned()]);
        let (assembly, guard) = assembler.assemble(&mut ctx).unwrap();

        assert_eq!(assembly.profile, "android-signed");
        assert_eq!(guard.paths(), assembly.written.as_slice());
        assert!(!assembly.fallback);
        assert_eq!(assembly.written.len(), 2);
        let keystore = std::fs::read(dir.path().join("android/app/upload-keystore.jks")).unwrap();
        assert_eq!(keystore, b"keystore-bytes");
        let props = std::fs::read_to_string(dir.path().join("android/key.properties")).unwrap();
        assert_eq!(props, "storePassword=x");
    }

    #[test]
    fn test_missing_either_secret_falls_back_to_unsigned() {
        for present in ["ANDROID_KEYSTORE_BASE64", "ANDROID_KEY_PROPERTIES_BASE64"] {
            let dir = tempfile::tempdir().unwrap();
            let vault = SecretVault::new().with(present, KEYSTORE);
            let mut ctx = ctx(dir.path(), vault, "release");

            let assembler = ArtifactAssembler::new(vec![android_release(), presets::unsigned()]);
            let (assembly, guard) = assembler.assemble(&mut ctx).unwrap();
            assert!(guard.paths().is_empty());

            assert_eq!(assembly.profile, "unsigned");
            assert!(assembly.fallback);
            assert!(assembly.written.is_empty());
            assert!(!dir.path().join("android").exists());
            assert!(matches!(
                &assembly.skipped[0].reason,
                SkipReason::MissingSecrets { secrets } if secrets.len() == 1
            ));
        }
    }

    #[test]
    fn test_debug_build_skips_signed_profile() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::new()
            .with("ANDROID_KEYSTORE_BASE64", KEYSTORE)
            .with("ANDROID_KEY_PROPERTIES_BASE64", PROPERTIES);
        let ctx = ctx(dir.path(), vault, "debug");

        let selection = ArtifactAssembler::new(vec![android_release()]).select(&ctx);
        assert_eq!(selection.profile.name, "unsigned");
        assert!(matches!(selection.skipped[0].reason, SkipReason::Disabled { .. }));
    }

    #[test]
    fn test_selects_exactly_satisfied_profile() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::new().with("A", "x").with("B", "x");
        let ctx = ctx(dir.path(), vault, "release");

        // Declared least-specific first; priority order must still try "abc" first.
        let assembler = ArtifactAssembler::new(vec![
            profile("a", &["A"]),
            profile("ab", &["A", "B"]),
            profile("abc", &["A", "B", "C"]),
        ]);
        let names: Vec<_> = assembler.priority_order().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["abc", "ab", "a"]);

        let selection = assembler.select(&ctx);
        assert_eq!(selection.profile.name, "ab");
        assert_eq!(selection.skipped.len(), 1);
        assert_eq!(selection.skipped[0].profile, "abc");
    }

    #[test]
    fn test_malformed_payload_names_secret_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::new()
            .with("ANDROID_KEYSTORE_BASE64", KEYSTORE)
            .with("ANDROID_KEY_PROPERTIES_BASE64", "not base64 at all!");
        let mut ctx = ctx(dir.path(), vault, "release");

        let err = ArtifactAssembler::new(vec![android_release()])
            .assemble(&mut ctx)
            .unwrap_err();
        match err {
            ShipflowError::SecretDecode { secret, .. } => {
                assert_eq!(secret, "ANDROID_KEY_PROPERTIES_BASE64");
            }
            other => panic!("Expected SecretDecode, got {:?}", other),
        }
        assert!(!dir.path().join("android/app/upload-keystore.jks").exists());
    }

    #[test]
    fn test_wrapped_base64_is_accepted() {
        let decoded = Base64Decoder.decode(b"a2V5c3Rv\ncmUtYnl0\nZXM=\n").unwrap();
        assert_eq!(decoded, b"keystore-bytes");
    }

    #[test]
    fn test_raw_placement_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::new().with("CONFIG", "plain text");
        let mut ctx = ctx(dir.path(), vault, "release");

        let assembler = ArtifactAssembler::new(vec![ArtifactProfile {
            name: "configured".into(),
            requires: vec!["CONFIG".into()],
            placements: vec![Placement {
                secret: "CONFIG".into(),
                path: PathBuf::from("nested/dir/config.txt"),
                encoding: SecretEncoding::Raw,
            }],
            when: None,
            fallback: false,
        }]);

        let (assembly, guard) = assembler.assemble(&mut ctx).unwrap();
        let path = dir.path().join("nested/dir/config.txt");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "plain text");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        assert_eq!(assembly.written, vec![path.clone()]);
        assert_eq!(guard.release(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_dropped_guard_removes_material() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::new()
            .with("ANDROID_KEYSTORE_BASE64", KEYSTORE)
            .with("ANDROID_KEY_PROPERTIES_BASE64", PROPERTIES);
        let mut ctx = ctx(dir.path(), vault, "release");
        let keystore = dir.path().join("android/app/upload-keystore.jks");

        {
            let (_assembly, _guard) = ArtifactAssembler::new(vec![android_release()])
                .assemble(&mut ctx)
                .unwrap();
            assert!(keystore.exists());
        }

        assert!(!keystore.exists());
        assert!(!dir.path().join("android/key.properties").exists());
    }

    #[test]
    fn test_kept_material_survives_the_guard() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::new()
            .with("ANDROID_KEYSTORE_BASE64", KEYSTORE)
            .with("ANDROID_KEY_PROPERTIES_BASE64", PROPERTIES);
        let mut ctx = ctx(dir.path(), vault, "release");

        let (_, guard) = ArtifactAssembler::new(vec![android_release()])
            .assemble(&mut ctx)
            .unwrap();
        let kept = guard.keep();

        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|path| path.exists()));
    }

    #[test]
    fn test_decoded_text_is_masked() {
        let dir = tempfile::tempdir().unwrap();
        let vault = SecretVault::new()
            .with("ANDROID_KEYSTORE_BASE64", KEYSTORE)
            .with("ANDROID_KEY_PROPERTIES_BASE64", PROPERTIES);
        let mut ctx = ctx(dir.path(), vault, "release");

        let (_assembly, _guard) = ArtifactAssembler::new(vec![android_release()])
            .assemble(&mut ctx)
            .unwrap();

        assert_eq!(ctx.secrets().mask("$ cat key.properties\nstorePassword=x"), "$ cat key.properties\n***");
        assert_eq!(ctx.secrets().mask("keystore-bytes"), "***");
    }

    #[test]
    fn test_designated_fallback_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path(), SecretVault::new(), "release");
        let mut fallback = profile("debug-signing", &[]);
        fallback.fallback = true;

        let selection = ArtifactAssembler::new(vec![android_release(), fallback]).select(&ctx);
        assert_eq!(selection.profile.name, "debug-signing");
        assert!(selection.is_fallback());
    }
}
