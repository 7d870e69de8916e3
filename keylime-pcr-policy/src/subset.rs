// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors

use crate::{algorithms::HashAlgorithm, pcrs::PcrValues};
use openssl::memcmp;
use thiserror::Error;

/// Why a set of PCR values does not certify against a recorded one
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificationMismatch {
    /// The two sets come from different banks
    #[error("PCR bank mismatch: reference values are {reference}, certified values are {certified}")]
    HashMismatch {
        reference: HashAlgorithm,
        certified: HashAlgorithm,
    },

    /// A certified PCR is not part of the reference values
    #[error("PCR {index} is certified but missing from the reference values")]
    MissingPcr { index: u32 },

    /// A certified PCR has a different value in the reference values
    #[error(
        "PCR {index} mismatch: certified {}, reference {}",
        hex::encode(.certified),
        hex::encode(.reference)
    )]
    DigestMismatch {
        index: u32,
        certified: Vec<u8>,
        reference: Vec<u8>,
    },
}

impl CertificationMismatch {
    /// The PCR that failed certification, if the failure is about one PCR.
    pub fn index(&self) -> Option<u32> {
        match self {
            CertificationMismatch::HashMismatch { .. } => None,
            CertificationMismatch::MissingPcr { index }
            | CertificationMismatch::DigestMismatch { index, .. } => {
                Some(*index)
            }
        }
    }
}

/// Checks that every PCR in `certified` has the same value in `reference`.
///
/// `reference` may hold PCRs that are not in `certified`; those are ignored.
/// The first PCR that fails, in ascending order, is reported.
pub fn check_subset(
    reference: &PcrValues,
    certified: &PcrValues,
) -> Result<(), CertificationMismatch> {
    if reference.hash() != certified.hash() {
        return Err(CertificationMismatch::HashMismatch {
            reference: reference.hash(),
            certified: certified.hash(),
        });
    }

    for (&index, certified_digest) in certified.pcrs() {
        let reference_digest = reference
            .get(index)
            .ok_or(CertificationMismatch::MissingPcr { index })?;

        if reference_digest.len() != certified_digest.len()
            || !memcmp::eq(reference_digest, certified_digest)
        {
            return Err(CertificationMismatch::DigestMismatch {
                index,
                certified: certified_digest.clone(),
                reference: reference_digest.to_vec(),
            });
        }
    }

    Ok(())
}
