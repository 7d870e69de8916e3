// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Keylime Authors

use crate::{
    algorithms::{AlgorithmError, HashAlgorithm},
    pcrs::PcrSelection,
    policy::{CertifyPolicy, SealPolicy},
    serialization::deserialize_pcr_list,
};
use config::{Config, ConfigError, Environment, File, FileFormat};
use log::*;
use serde::{Deserialize, Serialize};
use std::{
    convert::TryFrom,
    env,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub static CONFIG_OVERRIDE_ENV_VAR: &str = "KEYLIME_PCR_POLICY_CONFIG";
pub static ENV_PREFIX: &str = "KEYLIME_PCR_POLICY";

pub const DEFAULT_PCR_HASH_ALG: &str = "sha256";

#[derive(Error, Debug)]
pub enum PolicyConfigError {
    // Error from config crate
    #[error("Error from the config crate")]
    Config(#[from] ConfigError),

    // Unsupported hash algorithm set in pcr_hash_alg
    #[error("Invalid 'pcr_hash_alg' configuration option")]
    Algorithm(#[from] AlgorithmError),

    // Missing configuration file set in KEYLIME_PCR_POLICY_CONFIG
    #[error("Missing file {file} set in 'KEYLIME_PCR_POLICY_CONFIG' environment variable")]
    MissingEnvConfigFile { file: String },
}

/// Configuration of the PCR policies.
///
/// An empty `tcti` lets the TPM connection pick its default. Empty PCR lists
/// are accepted here; the resulting policy is rejected when it is used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub tcti: String,
    pub pcr_hash_alg: String,
    #[serde(deserialize_with = "deserialize_pcr_list")]
    pub seal_pcrs: Vec<u32>,
    #[serde(deserialize_with = "deserialize_pcr_list")]
    pub certify_pcrs: Vec<u32>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            tcti: String::new(),
            pcr_hash_alg: DEFAULT_PCR_HASH_ALG.to_string(),
            seal_pcrs: Vec::new(),
            certify_pcrs: Vec::new(),
        }
    }
}

impl PolicyConfig {
    pub fn tcti(&self) -> Option<&str> {
        if self.tcti.is_empty() {
            None
        } else {
            Some(&self.tcti)
        }
    }

    pub fn hash_algorithm(&self) -> Result<HashAlgorithm, PolicyConfigError> {
        Ok(HashAlgorithm::try_from(self.pcr_hash_alg.as_str())?)
    }

    /// Policy sealing to the current value of the `seal_pcrs`.
    pub fn seal_policy(&self) -> Result<SealPolicy, PolicyConfigError> {
        Ok(SealPolicy::Current(PcrSelection::new(
            self.hash_algorithm()?,
            self.seal_pcrs.clone(),
        )))
    }

    /// Policy certifying against the current value of the `certify_pcrs`.
    pub fn certify_policy(&self) -> Result<CertifyPolicy, PolicyConfigError> {
        Ok(CertifyPolicy::Current(PcrSelection::new(
            self.hash_algorithm()?,
            self.certify_pcrs.clone(),
        )))
    }
}

#[derive(Debug, Default)]
pub struct PolicyConfigBuilder {
    files: Vec<PathBuf>,
}

impl PolicyConfigBuilder {
    /// Creates a new, empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a TOML configuration file. Files added later override the
    /// options set by earlier ones.
    pub fn file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.files.push(path.into());
        self
    }

    /// Loads the configuration.
    ///
    /// Options are taken, by increasing priority, from the defaults, the
    /// configuration files and the `KEYLIME_PCR_POLICY_*` environment
    /// variables. If `KEYLIME_PCR_POLICY_CONFIG` is set, the file it points
    /// to replaces the files added to the builder.
    pub fn build(&self) -> Result<PolicyConfig, PolicyConfigError> {
        let mut builder = Config::builder();

        let override_file = env::var(CONFIG_OVERRIDE_ENV_VAR)
            .ok()
            .filter(|v| !v.is_empty());

        match override_file {
            Some(env_cfg) => {
                let path = Path::new(&env_cfg);
                if !path.exists() {
                    return Err(PolicyConfigError::MissingEnvConfigFile {
                        file: env_cfg,
                    });
                }
                warn!("Configuration overridden by '{CONFIG_OVERRIDE_ENV_VAR}' environment variable: using {}", path.display());
                builder = builder
                    .add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                for file in &self.files {
                    debug!("Loading configuration file {}", file.display());
                    builder = builder.add_source(
                        File::from(file.as_path()).format(FileFormat::Toml),
                    );
                }
            }
        }

        // Lists of PCRs are parsed from the environment as strings
        let env_source = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(".");

        let config: PolicyConfig = builder
            .add_source(env_source)
            .build()?
            .try_deserialize()?;

        // Fail early on an unsupported bank
        let _ = config.hash_algorithm()?;

        debug!("PCR policy configuration: {config:?}");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default() {
        let config = PolicyConfig::default();
        assert_eq!(config.tcti(), None);
        assert_eq!(
            config.hash_algorithm().unwrap(), //#[allow_ci]
            HashAlgorithm::Sha256
        );
        assert!(config.seal_pcrs.is_empty());
    }

    #[test]
    fn test_policies_from_config() {
        let config = PolicyConfig {
            pcr_hash_alg: "sha1".to_string(),
            seal_pcrs: vec![0, 7],
            certify_pcrs: vec![7],
            ..Default::default()
        };
        assert_eq!(
            config.seal_policy().unwrap(), //#[allow_ci]
            SealPolicy::Current(PcrSelection::new(
                HashAlgorithm::Sha1,
                vec![0, 7]
            ))
        );
        assert_eq!(
            config.certify_policy().unwrap(), //#[allow_ci]
            CertifyPolicy::Current(PcrSelection::new(
                HashAlgorithm::Sha1,
                vec![7]
            ))
        );
    }

    #[test]
    fn test_unsupported_hash_alg() {
        let config = PolicyConfig {
            pcr_hash_alg: "md5".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.seal_policy(),
            Err(PolicyConfigError::Algorithm(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempdir().unwrap(); //#[allow_ci]
        let path = dir.path().join("pcr_policy.toml");
        let mut file = std::fs::File::create(&path).unwrap(); //#[allow_ci]
        writeln!(
            file,
            "tcti = \"mssim:host=localhost\"\nseal_pcrs = [0, 2, 4]"
        )
        .unwrap(); //#[allow_ci]

        let config = PolicyConfigBuilder::new().file(&path).build().unwrap(); //#[allow_ci]
        assert_eq!(config.tcti(), Some("mssim:host=localhost"));
        assert_eq!(config.seal_pcrs, vec![0, 2, 4]);
        assert_eq!(config.pcr_hash_alg, DEFAULT_PCR_HASH_ALG);
        assert!(config.certify_pcrs.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap(); //#[allow_ci]
        let r = PolicyConfigBuilder::new()
            .file(dir.path().join("missing.toml"))
            .build();
        assert!(matches!(r, Err(PolicyConfigError::Config(_))));
    }
}
