// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Built-in signing profiles for mobile builds

use std::path::PathBuf;

use crate::pipeline::{ArtifactProfile, Placement, SecretEncoding};

/// Names accepted by `preset:` in a pipeline's signing section
pub const NAMES: &[&str] = &["android-signed", "ios-signed", "unsigned"];

/// Look up a preset by name
pub fn by_name(name: &str) -> Option<ArtifactProfile> {
    match name {
        "android-signed" => Some(android_signed()),
        "ios-signed" => Some(ios_signed()),
        "unsigned" => Some(unsigned()),
        _ => None,
    }
}

/// Release keystore plus the `key.properties` Gradle reads it through
pub fn android_signed() -> ArtifactProfile {
    ArtifactProfile {
        name: "android-signed".into(),
        requires: vec![
            "ANDROID_KEYSTORE_BASE64".into(),
            "ANDROID_KEY_PROPERTIES_BASE64".into(),
        ],
        placements: vec![
            base64_file("ANDROID_KEYSTORE_BASE64", "android/app/upload-keystore.jks"),
            base64_file("ANDROID_KEY_PROPERTIES_BASE64", "android/key.properties"),
        ],
        when: None,
        fallback: false,
    }
}

/// Distribution certificate, provisioning profile and export options.
///
/// The certificate password and team id are required but stay in the
/// environment of the steps that use them.
pub fn ios_signed() -> ArtifactProfile {
    ArtifactProfile {
        name: "ios-signed".into(),
        requires: vec![
            "IOS_CERTIFICATE_P12_BASE64".into(),
            "IOS_CERTIFICATE_PASSWORD".into(),
            "IOS_PROVISIONING_PROFILE_BASE64".into(),
            "IOS_EXPORT_OPTIONS_PLIST_BASE64".into(),
            "APPLE_TEAM_ID".into(),
        ],
        placements: vec![
            base64_file("IOS_CERTIFICATE_P12_BASE64", "ios/certs/distribution.p12"),
            base64_file(
                "IOS_PROVISIONING_PROFILE_BASE64",
                "ios/profiles/distribution.mobileprovision",
            ),
            base64_file("IOS_EXPORT_OPTIONS_PLIST_BASE64", "ios/ExportOptions.plist"),
        ],
        when: None,
        fallback: false,
    }
}

pub fn unsigned() -> ArtifactProfile {
    ArtifactProfile::unsigned()
}

fn base64_file(secret: &str, path: &str) -> Placement {
    Placement {
        secret: secret.into(),
        path: PathBuf::from(path),
        encoding: SecretEncoding::Base64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_name_resolves() {
        for name in NAMES {
            let profile = by_name(name).unwrap();
            assert_eq!(profile.name, *name);
        }
        assert!(by_name("windows-signed").is_none());
    }

    #[test]
    fn test_placements_only_use_required_secrets() {
        for name in NAMES {
            let profile = by_name(name).unwrap();
            for placement in &profile.placements {
                assert!(profile.requires.contains(&placement.secret));
            }
        }
    }

    #[test]
    fn test_ios_needs_five_secrets() {
        assert_eq!(ios_signed().requires.len(), 5);
        assert_eq!(ios_signed().placements.len(), 3);
    }
}
