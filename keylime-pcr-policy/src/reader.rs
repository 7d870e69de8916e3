// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors

use crate::{
    error::{PcrError, Result},
    pcrs::{pcr_digests, selection_list, PcrSelection, PcrValues},
    tpm::PcrDevice,
};
use log::*;
use std::convert::TryFrom;
use tss_esapi::{constants::CapabilityType, structures::CapabilityData};

/// Lists the PCR banks implemented by the TPM.
///
/// The whole list is expected in a single response: the TPM reporting more
/// data is treated as an unsupported configuration and fails.
pub fn implemented_pcr_banks<D: PcrDevice + ?Sized>(
    device: &mut D,
) -> Result<Vec<PcrSelection>> {
    let (capability_data, more_data) = device
        .get_capability(CapabilityType::AssignedPcr, 0, u32::MAX)
        .map_err(|source| PcrError::CapabilityQuery { source })?;

    if more_data {
        return Err(PcrError::CapabilityMoreData);
    }

    let assigned = match capability_data {
        CapabilityData::AssignedPcr(assigned) => assigned,
        other => {
            return Err(PcrError::UnexpectedCapabilityData(format!(
                "{other:?}"
            )));
        }
    };

    let banks = assigned
        .get_selections()
        .iter()
        .map(|selection| {
            PcrSelection::try_from(selection).map_err(|e| {
                PcrError::UnexpectedCapabilityData(format!(
                    "PCR bank {:?}: {e}",
                    selection.hashing_algorithm()
                ))
            })
        })
        .collect::<Result<Vec<PcrSelection>>>()?;

    debug!(
        "Implemented PCR banks: {:?}",
        banks.iter().map(|b| b.hash.to_string()).collect::<Vec<_>>()
    );
    Ok(banks)
}

/// Reads all the PCRs in `selection`, making multiple calls to the TPM if
/// necessary.
///
/// The indices are read in groups of at most 8, in the order given. A PCR
/// selected more than once appears once in the result. Any failed read, or
/// a digest that does not have the size of the bank's hash algorithm, aborts
/// the whole operation.
pub fn read_pcrs<D: PcrDevice + ?Sized>(
    device: &mut D,
    selection: &PcrSelection,
) -> Result<PcrValues> {
    let hash = selection.hash;
    let mut values = PcrValues::empty(hash);

    for chunk in selection.chunks() {
        let request = selection_list(hash, chunk)?;
        let (_update_counter, read, digests) =
            device.pcr_read(request).map_err(|source| PcrError::PcrRead {
                hash,
                pcrs: chunk.to_vec(),
                source,
            })?;
        debug!("Read {hash} PCRs {chunk:?}");

        for (index, digest) in pcr_digests(hash, &read, &digests)? {
            values.try_insert(index, digest)?;
        }
    }

    Ok(values)
}

/// Reads all the PCR values from all implemented PCR banks, in the order the
/// TPM reports the banks.
pub fn read_all_pcrs<D: PcrDevice + ?Sized>(
    device: &mut D,
) -> Result<Vec<PcrValues>> {
    let banks = implemented_pcr_banks(device)?;

    let mut all_pcrs = Vec::with_capacity(banks.len());
    for bank in &banks {
        let values =
            read_pcrs(device, bank).map_err(|e| PcrError::BankRead {
                hash: bank.hash,
                source: Box::new(e),
            })?;
        all_pcrs.push(values);
    }
    Ok(all_pcrs)
}
