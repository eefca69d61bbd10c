//! Engine configuration as seen from the command line.
//!
//! Layering, lowest first: profile defaults, `--config` JSON, `--device`,
//! and finally the format of an `--input` WAV file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hark_core::{EngineConfig, Profile};
use serde_json::Value;
use tracing::info;

pub fn normalize_device_name(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Where segments go when `--out-dir` is not given.
pub fn default_out_dir() -> PathBuf {
    std::env::temp_dir().join("hark")
}

/// Overlay a JSON object onto the profile's defaults, so keys the file
/// leaves out keep the *profile's* value rather than the adaptive default.
pub fn apply_config_json(base: EngineConfig, raw: &str) -> Result<EngineConfig> {
    let overlay: Value = serde_json::from_str(raw).context("config file is not valid JSON")?;
    let Value::Object(overlay) = overlay else {
        anyhow::bail!("config file must contain a JSON object");
    };

    let mut merged = serde_json::to_value(base)?;
    if let Value::Object(fields) = &mut merged {
        fields.extend(overlay);
    }
    serde_json::from_value(merged).context("config file has a field of the wrong type")
}

/// Match the engine's format to a replayed WAV file.
fn adopt_wav_format(config: &mut EngineConfig, path: &Path) -> Result<()> {
    let reader = hound::WavReader::open(path)
        .with_context(|| format!("cannot read WAV header of {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate != config.sample_rate || spec.channels != config.channels {
        info!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            "using the input file's format"
        );
    }
    config.sample_rate = spec.sample_rate;
    config.channels = spec.channels;
    Ok(())
}

pub fn resolve_engine_config(
    profile: Profile,
    config_path: Option<&Path>,
    device: Option<&str>,
    input: Option<&Path>,
) -> Result<EngineConfig> {
    let mut config = EngineConfig::for_profile(profile);

    if let Some(path) = config_path {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        config = apply_config_json(config, &raw)
            .with_context(|| format!("in config file {}", path.display()))?;
    }

    if let Some(device) = normalize_device_name(device) {
        config.input_device = Some(device);
    }
    config.input_device = normalize_device_name(config.input_device.as_deref());

    if let Some(input) = input {
        adopt_wav_format(&mut config, input)?;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_device_names_mean_default() {
        assert_eq!(normalize_device_name(Some("  ")), None);
        assert_eq!(normalize_device_name(Some(" USB Mic ")), Some("USB Mic".into()));
        assert_eq!(normalize_device_name(None), None);
    }

    #[test]
    fn config_json_overrides_only_given_fields_of_profile() {
        let base = EngineConfig::for_profile(Profile::FixedThreshold);
        let merged = apply_config_json(base, r#"{ "minAmplitude": 800.0 }"#).expect("merge");
        assert_eq!(merged.min_amplitude, 800.0);
        // Kept from the fixed-threshold profile, not the adaptive default.
        assert_eq!(merged.max_silence_blocks, 30);
        assert_eq!(merged.adaptation_rate, 0.0);
    }

    #[test]
    fn config_json_must_be_an_object() {
        assert!(apply_config_json(EngineConfig::default(), "[1, 2]").is_err());
        assert!(apply_config_json(EngineConfig::default(), r#"{ "blockSize": "big" }"#).is_err());
    }

    #[test]
    fn device_flag_beats_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hark.json");
        fs::write(&path, r#"{ "inputDevice": "Built-in Mic", "maxSilenceBlocks": 4 }"#)
            .expect("write config");

        let config =
            resolve_engine_config(Profile::Adaptive, Some(&path), Some("USB Mic"), None)
                .expect("resolve");
        assert_eq!(config.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(config.max_silence_blocks, 4);
    }

    #[test]
    fn invalid_values_in_config_file_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hark.json");
        fs::write(&path, r#"{ "blockSize": 0 }"#).expect("write config");
        assert!(resolve_engine_config(Profile::Adaptive, Some(&path), None, None).is_err());
    }

    #[test]
    fn input_file_format_is_adopted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("in.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
        writer.write_sample(0i16).expect("write");
        writer.write_sample(0i16).expect("write");
        writer.finalize().expect("finalize");

        let config =
            resolve_engine_config(Profile::Adaptive, None, None, Some(&path)).expect("resolve");
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.channels, 2);
    }
}
