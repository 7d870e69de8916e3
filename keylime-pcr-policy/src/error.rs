// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors

use crate::{
    algorithms::{AlgorithmError, HashAlgorithm},
    subset::CertificationMismatch,
};
use thiserror::Error;

/// PcrError wraps all possible errors raised while selecting, reading,
/// sealing to and certifying PCR values
#[derive(Error, Debug)]
pub enum PcrError {
    /// Error querying the TPM for the implemented PCR banks
    #[error("Error listing implemented PCR banks")]
    CapabilityQuery { source: tss_esapi::Error },

    /// The capability query did not fit in a single response
    #[error("Extra data from GetCapability when listing PCR banks")]
    CapabilityMoreData,

    /// The capability query returned something that is not a PCR bank
    #[error("Unexpected data from GetCapability: {0}")]
    UnexpectedCapabilityData(String),

    /// Error building a TPM PCR selection list
    #[error("Error building PCR Selection list")]
    PcrSelectionBuild { source: tss_esapi::Error },

    /// Error reading a chunk of PCRs from the TPM
    #[error("Error reading {hash} PCRs {pcrs:?}")]
    PcrRead {
        hash: HashAlgorithm,
        pcrs: Vec<u32>,
        source: tss_esapi::Error,
    },

    /// Error reading one of the implemented banks
    #[error("Error reading bank {hash} PCRs")]
    BankRead {
        hash: HashAlgorithm,
        source: Box<PcrError>,
    },

    /// The sealing or certification policy selects no PCRs
    #[error("{policy} policy contains 0 PCRs")]
    EmptyPolicy { policy: &'static str },

    /// The observed PCR values do not certify against the recorded ones
    #[error("PCR certification failed")]
    CertificationMismatch(#[from] CertificationMismatch),

    /// A digest does not have the size of its bank's hash algorithm
    #[error("PCR {index} digest has {got} bytes, but {hash} digests have {expected} bytes")]
    InvalidDigestSize {
        index: u32,
        hash: HashAlgorithm,
        expected: usize,
        got: usize,
    },

    /// Malformed PCR selection mask
    #[error("Malformed PCR selection mask: {0}")]
    MalformedPcrSelectionMask(String),

    /// Generic catch-all Algorithm error
    #[error("AlgorithmError")]
    Algorithm(#[from] AlgorithmError),

    /// Error computing a digest
    #[error("Error computing {hash} digest")]
    OpenSSLHasher {
        hash: HashAlgorithm,
        source: openssl::error::ErrorStack,
    },

    /// Error creating a TCTI context
    #[error("Error creating TCTI context")]
    TSSTctiContextError { source: tss_esapi::Error },

    /// Error parsing the TCTI configuration
    #[error("Error parsing TCTI configuration {path}")]
    TctiNameError {
        path: String,
        source: tss_esapi::Error,
    },
}

/// Broad classification of a [`PcrError`].
///
/// `CertificationMismatch` is the policy answering "no" and is actionable
/// security information; every other kind means the environment or the
/// caller is broken.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PcrErrorKind {
    Discovery,
    Read,
    PolicyConfiguration,
    CertificationMismatch,
    Other,
}

impl PcrError {
    pub fn kind(&self) -> PcrErrorKind {
        match self {
            PcrError::CapabilityQuery { .. }
            | PcrError::CapabilityMoreData
            | PcrError::UnexpectedCapabilityData(_) => PcrErrorKind::Discovery,
            PcrError::PcrSelectionBuild { .. }
            | PcrError::PcrRead { .. } => PcrErrorKind::Read,
            // A bank failure keeps the kind of what actually went wrong
            PcrError::BankRead { source, .. } => source.kind(),
            PcrError::EmptyPolicy { .. } => {
                PcrErrorKind::PolicyConfiguration
            }
            PcrError::CertificationMismatch(_) => {
                PcrErrorKind::CertificationMismatch
            }
            _ => PcrErrorKind::Other,
        }
    }

    pub fn is_certification_mismatch(&self) -> bool {
        self.kind() == PcrErrorKind::CertificationMismatch
    }
}

pub type Result<T> = std::result::Result<T, PcrError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tss_esapi::WrapperErrorKind;

    #[test]
    fn test_kind() {
        let e = PcrError::CapabilityMoreData;
        assert_eq!(e.kind(), PcrErrorKind::Discovery);

        let e = PcrError::EmptyPolicy { policy: "SealCurrent" };
        assert_eq!(e.kind(), PcrErrorKind::PolicyConfiguration);
        assert_eq!(e.to_string(), "SealCurrent policy contains 0 PCRs");

        let e = PcrError::from(CertificationMismatch::MissingPcr {
            index: 2,
        });
        assert!(e.is_certification_mismatch());
    }

    #[test]
    fn test_bank_read_keeps_inner_kind() {
        let inner = PcrError::PcrRead {
            hash: HashAlgorithm::Sha1,
            pcrs: vec![0, 1],
            source: tss_esapi::Error::WrapperError(
                WrapperErrorKind::InvalidParam,
            ),
        };
        let e = PcrError::BankRead {
            hash: HashAlgorithm::Sha1,
            source: Box::new(inner),
        };
        assert_eq!(e.kind(), PcrErrorKind::Read);
        assert!(!e.is_certification_mismatch());
        assert_eq!(e.to_string(), "Error reading bank sha1 PCRs");
    }
}
