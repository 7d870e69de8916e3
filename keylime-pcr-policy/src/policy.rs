// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors

use crate::{
    algorithms::HashAlgorithm,
    error::{PcrError, Result},
    pcrs::{PcrSelection, PcrValues, CERTIFY_HASH_ALG},
    reader::read_pcrs,
    subset::check_subset,
    tpm::PcrDevice,
};
use log::*;
use serde::{Deserialize, Serialize};

/// The PCR values data is sealed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealPolicy {
    /// Seal to the current values of the selected PCRs
    Current(PcrSelection),
    /// Predictively seal to the given PCR values
    Target(PcrValues),
}

impl SealPolicy {
    /// Returns the PCR values to seal to, reading them from the TPM for
    /// `SealPolicy::Current`.
    ///
    /// Sealing to no PCR at all would leave the data unconditionally
    /// recoverable, so an empty policy is rejected before touching the TPM.
    pub fn pcrs_for_sealing<D: PcrDevice + ?Sized>(
        &self,
        device: &mut D,
    ) -> Result<PcrValues> {
        match self {
            SealPolicy::Current(selection) => {
                if selection.is_empty() {
                    return Err(PcrError::EmptyPolicy {
                        policy: "SealCurrent",
                    });
                }
                info!(
                    "Sealing to current {} PCRs {:?}",
                    selection.hash, selection.pcrs
                );
                read_pcrs(device, selection)
            }
            SealPolicy::Target(values) => {
                if values.is_empty() {
                    return Err(PcrError::EmptyPolicy {
                        policy: "SealTarget",
                    });
                }
                info!(
                    "Sealing to target {} PCRs {:?}",
                    values.hash(),
                    values.selection().pcrs
                );
                Ok(values.clone())
            }
        }
    }
}

/// The PCR values recorded at sealing time are checked against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertifyPolicy {
    /// Certify that the selected PCRs currently have the values they had
    /// when sealing
    Current(PcrSelection),
    /// Certify that the TPM had the given PCR values when sealing
    Expected(PcrValues),
}

impl CertifyPolicy {
    /// Checks that the `certified` PCR values, recorded when sealing, are a
    /// subset of the reference values of this policy.
    ///
    /// The reference values are expected to be in the `CERTIFY_HASH_ALG`
    /// bank. A mismatch is reported as `PcrError::CertificationMismatch`.
    pub fn certify_pcrs<D: PcrDevice + ?Sized>(
        &self,
        device: &mut D,
        certified: &PcrValues,
    ) -> Result<()> {
        let result = match self {
            CertifyPolicy::Current(selection) => {
                if selection.is_empty() {
                    return Err(PcrError::EmptyPolicy {
                        policy: "CertifyCurrent",
                    });
                }
                warn_certify_hash(selection.hash);
                let current = read_pcrs(device, selection)?;
                check_subset(&current, certified)
            }
            CertifyPolicy::Expected(values) => {
                if values.is_empty() {
                    return Err(PcrError::EmptyPolicy {
                        policy: "CertifyExpected",
                    });
                }
                warn_certify_hash(values.hash());
                check_subset(values, certified)
            }
        };

        match result {
            Ok(()) => {
                info!(
                    "Certified {} PCRs {:?}",
                    certified.hash(),
                    certified.selection().pcrs
                );
                Ok(())
            }
            Err(mismatch) => {
                warn!("PCR certification failed: {mismatch}");
                Err(mismatch.into())
            }
        }
    }
}

fn warn_certify_hash(hash: HashAlgorithm) {
    if hash != CERTIFY_HASH_ALG {
        warn!("Certifying {hash} PCRs, but certification uses the {CERTIFY_HASH_ALG} bank");
    }
}
