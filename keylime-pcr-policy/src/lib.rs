// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors

//! Selection, reading, sealing and certification policies of TPM PCRs.
//!
//! A secret is sealed to the values a [`policy::SealPolicy`] resolves to.
//! Later, a [`policy::CertifyPolicy`] checks that the PCR values recorded at
//! sealing time are a subset of a reference set, read from the TPM or given
//! explicitly.

pub mod algorithms;
pub mod config;
pub mod error;
pub mod pcrs;
pub mod policy;
pub mod reader;
pub mod serialization;
pub mod subset;
pub mod testing;
pub mod tpm;

pub use error::{PcrError, PcrErrorKind};
pub use pcrs::{PcrSelection, PcrValues, NUM_PCRS};
pub use policy::{CertifyPolicy, SealPolicy};
pub use reader::{implemented_pcr_banks, read_all_pcrs, read_pcrs};
pub use subset::{check_subset, CertificationMismatch};
pub use tpm::PcrDevice;
