// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors
use openssl::hash::MessageDigest;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use thiserror::Error;
use tss_esapi::interface_types::algorithm::HashingAlgorithm;

// This error needs to be public because we implement TryFrom for public types
#[derive(Error, Debug)]
pub enum AlgorithmError {
    #[error("Hashing Algorithm {0} not supported")]
    UnsupportedHashingAlgorithm(String),
}

/// Hash algorithm of a PCR bank.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Sm3_256,
    Sha3_256,
    Sha3_384,
    Sha3_512,
}

impl HashAlgorithm {
    /// Size in bytes of a digest produced by this algorithm, which is also
    /// the size of every PCR in the bank.
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256
            | HashAlgorithm::Sm3_256
            | HashAlgorithm::Sha3_256 => 32,
            HashAlgorithm::Sha384 | HashAlgorithm::Sha3_384 => 48,
            HashAlgorithm::Sha512 | HashAlgorithm::Sha3_512 => 64,
        }
    }
}

impl TryFrom<&str> for HashAlgorithm {
    type Error = AlgorithmError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "sm3_256" => Ok(HashAlgorithm::Sm3_256),
            "sha3_256" => Ok(HashAlgorithm::Sha3_256),
            "sha3_384" => Ok(HashAlgorithm::Sha3_384),
            "sha3_512" => Ok(HashAlgorithm::Sha3_512),
            _ => {
                Err(AlgorithmError::UnsupportedHashingAlgorithm(value.into()))
            }
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let value = match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Sm3_256 => "sm3_256",
            HashAlgorithm::Sha3_256 => "sha3_256",
            HashAlgorithm::Sha3_384 => "sha3_384",
            HashAlgorithm::Sha3_512 => "sha3_512",
        };
        write!(f, "{value}")
    }
}

impl From<HashAlgorithm> for HashingAlgorithm {
    fn from(hash_algorithm: HashAlgorithm) -> Self {
        match hash_algorithm {
            HashAlgorithm::Sha1 => HashingAlgorithm::Sha1,
            HashAlgorithm::Sha256 => HashingAlgorithm::Sha256,
            HashAlgorithm::Sha384 => HashingAlgorithm::Sha384,
            HashAlgorithm::Sha512 => HashingAlgorithm::Sha512,
            HashAlgorithm::Sm3_256 => HashingAlgorithm::Sm3_256,
            HashAlgorithm::Sha3_256 => HashingAlgorithm::Sha3_256,
            HashAlgorithm::Sha3_384 => HashingAlgorithm::Sha3_384,
            HashAlgorithm::Sha3_512 => HashingAlgorithm::Sha3_512,
        }
    }
}

impl TryFrom<HashingAlgorithm> for HashAlgorithm {
    type Error = AlgorithmError;

    fn try_from(
        hashing_algorithm: HashingAlgorithm,
    ) -> Result<Self, Self::Error> {
        match hashing_algorithm {
            HashingAlgorithm::Sha1 => Ok(HashAlgorithm::Sha1),
            HashingAlgorithm::Sha256 => Ok(HashAlgorithm::Sha256),
            HashingAlgorithm::Sha384 => Ok(HashAlgorithm::Sha384),
            HashingAlgorithm::Sha512 => Ok(HashAlgorithm::Sha512),
            HashingAlgorithm::Sm3_256 => Ok(HashAlgorithm::Sm3_256),
            HashingAlgorithm::Sha3_256 => Ok(HashAlgorithm::Sha3_256),
            HashingAlgorithm::Sha3_384 => Ok(HashAlgorithm::Sha3_384),
            HashingAlgorithm::Sha3_512 => Ok(HashAlgorithm::Sha3_512),
            other => Err(AlgorithmError::UnsupportedHashingAlgorithm(
                format!("{other:?}"),
            )),
        }
    }
}

impl From<HashAlgorithm> for MessageDigest {
    fn from(hash_algorithm: HashAlgorithm) -> Self {
        match hash_algorithm {
            HashAlgorithm::Sha1 => MessageDigest::sha1(),
            HashAlgorithm::Sha256 => MessageDigest::sha256(),
            HashAlgorithm::Sha384 => MessageDigest::sha384(),
            HashAlgorithm::Sha512 => MessageDigest::sha512(),
            HashAlgorithm::Sm3_256 => MessageDigest::sm3(),
            HashAlgorithm::Sha3_256 => MessageDigest::sha3_256(),
            HashAlgorithm::Sha3_384 => MessageDigest::sha3_384(),
            HashAlgorithm::Sha3_512 => MessageDigest::sha3_512(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_tryfrom() {
        for name in ["sha1", "sha256", "sha384", "sha512", "sm3_256"] {
            let result = HashAlgorithm::try_from(name);
            assert!(result.is_ok(), "{name} should be supported");
            assert_eq!(result.unwrap().to_string(), name); //#[allow_ci]
        }
    }

    #[test]
    fn test_unsupported_hash_tryfrom() {
        let result = HashAlgorithm::try_from("unsupported");
        assert!(result.is_err());
    }

    #[test]
    fn test_hashing_algorithm_conversion() {
        let tss: HashingAlgorithm = HashAlgorithm::Sha384.into();
        assert_eq!(tss, HashingAlgorithm::Sha384);
        assert_eq!(
            HashAlgorithm::try_from(HashingAlgorithm::Sha1).unwrap(), //#[allow_ci]
            HashAlgorithm::Sha1
        );
        assert!(HashAlgorithm::try_from(HashingAlgorithm::Null).is_err());
    }

    #[test]
    fn test_digest_size_matches_openssl() {
        for alg in [
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            let md: MessageDigest = alg.into();
            assert_eq!(md.size(), alg.digest_size());
        }
    }

    #[test]
    fn test_serde_names() {
        let s = serde_json::to_string(&HashAlgorithm::Sm3_256).unwrap(); //#[allow_ci]
        assert_eq!(s, "\"sm3_256\"");
        let alg: HashAlgorithm = serde_json::from_str("\"sha256\"").unwrap(); //#[allow_ci]
        assert_eq!(alg, HashAlgorithm::Sha256);
    }
}
