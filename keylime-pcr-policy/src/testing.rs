// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors

//! In-memory TPM used to exercise PCR policies without hardware.

use crate::{
    algorithms::HashAlgorithm,
    error::{PcrError, Result},
    pcrs::{PcrSelection, MAX_PCRS_PER_READ, NUM_PCRS},
    tpm::PcrDevice,
};
use openssl::{
    error::ErrorStack,
    hash::{Hasher, MessageDigest},
};
use std::{collections::BTreeMap, convert::TryFrom};
use tss_esapi::{
    constants::CapabilityType,
    structures::{
        CapabilityData, Digest, DigestList, HandleList, PcrSelectionList,
        PcrSelectionListBuilder, PcrSlot,
    },
    WrapperErrorKind,
};

/// A TPM holding PCR banks in memory.
///
/// Every capability query and every PCR read is recorded so tests can check
/// how the TPM was used.
#[derive(Clone, Debug, Default)]
pub struct SimulatedTpm {
    banks: Vec<(HashAlgorithm, BTreeMap<u32, Vec<u8>>)>,
    update_counter: u32,
    more_data: bool,
    unexpected_capability: bool,
    failing_capability: bool,
    failing_banks: Vec<HashAlgorithm>,
    capability_queries: usize,
    reads: Vec<PcrSelection>,
}

impl SimulatedTpm {
    /// Creates a TPM implementing the given banks, in that order, with all
    /// PCRs reset to zero.
    pub fn new(banks: &[HashAlgorithm]) -> Self {
        let banks = banks
            .iter()
            .map(|&hash| {
                let pcrs = (0..NUM_PCRS)
                    .map(|index| (index, vec![0; hash.digest_size()]))
                    .collect();
                (hash, pcrs)
            })
            .collect();
        SimulatedTpm {
            banks,
            ..Default::default()
        }
    }

    fn bank_mut(
        &mut self,
        hash: HashAlgorithm,
    ) -> Option<&mut BTreeMap<u32, Vec<u8>>> {
        self.banks
            .iter_mut()
            .find(|(h, _)| *h == hash)
            .map(|(_, pcrs)| pcrs)
    }

    /// Overwrites a PCR, adding the bank if it does not exist.
    pub fn set_pcr(
        &mut self,
        hash: HashAlgorithm,
        index: u32,
        digest: Vec<u8>,
    ) {
        match self.bank_mut(hash) {
            Some(pcrs) => {
                let _ = pcrs.insert(index, digest);
            }
            None => {
                self.banks.push((hash, BTreeMap::from([(index, digest)])))
            }
        }
        self.update_counter += 1;
    }

    /// Extends a PCR with the digest of `data`, as a measurement would:
    /// `new = H(old || H(data))`.
    pub fn extend(
        &mut self,
        hash: HashAlgorithm,
        index: u32,
        data: &[u8],
    ) -> Result<()> {
        let md: MessageDigest = hash.into();
        let hasher_error =
            |source: ErrorStack| PcrError::OpenSSLHasher { hash, source };

        let old = self
            .bank_mut(hash)
            .and_then(|pcrs| pcrs.get(&index).cloned())
            .unwrap_or_else(|| vec![0; hash.digest_size()]);
        let measurement =
            openssl::hash::hash(md, data).map_err(hasher_error)?;

        let mut hasher = Hasher::new(md).map_err(hasher_error)?;
        hasher.update(&old).map_err(hasher_error)?;
        hasher.update(&measurement).map_err(hasher_error)?;
        let new = hasher.finish().map_err(hasher_error)?;

        self.set_pcr(hash, index, new.to_vec());
        Ok(())
    }

    /// Makes the PCR capability query report that more data is available.
    pub fn set_more_data(&mut self, more_data: bool) {
        self.more_data = more_data;
    }

    /// Makes the PCR capability query return data that is not a list of PCR
    /// banks.
    pub fn set_unexpected_capability(&mut self, unexpected: bool) {
        self.unexpected_capability = unexpected;
    }

    /// Makes every capability query fail.
    pub fn fail_capability(&mut self) {
        self.failing_capability = true;
    }

    /// Makes every read of the given bank fail.
    pub fn fail_reads(&mut self, hash: HashAlgorithm) {
        self.failing_banks.push(hash);
    }

    pub fn capability_queries(&self) -> usize {
        self.capability_queries
    }

    /// The PCRs requested by each read, in ascending order.
    pub fn reads(&self) -> &[PcrSelection] {
        &self.reads
    }

    /// Number of TPM commands received.
    pub fn commands(&self) -> usize {
        self.capability_queries + self.reads.len()
    }
}

fn to_slots(pcrs: &[u32]) -> tss_esapi::Result<Vec<PcrSlot>> {
    pcrs.iter()
        .map(|&index| {
            1u32.checked_shl(index)
                .ok_or(tss_esapi::Error::WrapperError(
                    WrapperErrorKind::InvalidParam,
                ))
                .and_then(PcrSlot::try_from)
        })
        .collect()
}

impl PcrDevice for SimulatedTpm {
    fn get_capability(
        &mut self,
        capability: CapabilityType,
        _property: u32,
        _property_count: u32,
    ) -> tss_esapi::Result<(CapabilityData, bool)> {
        self.capability_queries += 1;

        if self.failing_capability {
            return Err(tss_esapi::Error::WrapperError(
                WrapperErrorKind::InternalError,
            ));
        }
        if capability != CapabilityType::AssignedPcr {
            return Err(tss_esapi::Error::WrapperError(
                WrapperErrorKind::UnsupportedParam,
            ));
        }
        if self.unexpected_capability {
            return Ok((CapabilityData::Handles(HandleList::new()), false));
        }

        let mut builder = PcrSelectionListBuilder::new();
        for (hash, pcrs) in &self.banks {
            let indices: Vec<u32> = pcrs.keys().copied().collect();
            builder =
                builder.with_selection((*hash).into(), &to_slots(&indices)?);
        }
        Ok((CapabilityData::AssignedPcr(builder.build()?), self.more_data))
    }

    fn pcr_read(
        &mut self,
        selection_list: PcrSelectionList,
    ) -> tss_esapi::Result<(u32, PcrSelectionList, DigestList)> {
        let mut read = PcrSelectionListBuilder::new();
        let mut digests = DigestList::new();
        let mut count = 0;

        for selection in selection_list.get_selections() {
            let requested = PcrSelection::try_from(selection).map_err(|_| {
                tss_esapi::Error::WrapperError(WrapperErrorKind::InvalidParam)
            })?;
            self.reads.push(requested.clone());

            count += requested.pcrs.len();
            if count > MAX_PCRS_PER_READ {
                return Err(tss_esapi::Error::WrapperError(
                    WrapperErrorKind::WrongParamSize,
                ));
            }
            if self.failing_banks.contains(&requested.hash) {
                return Err(tss_esapi::Error::WrapperError(
                    WrapperErrorKind::InternalError,
                ));
            }

            let bank = self
                .banks
                .iter()
                .find(|(h, _)| *h == requested.hash)
                .map(|(_, pcrs)| pcrs);
            let mut present = Vec::new();
            for index in requested.pcrs {
                if let Some(digest) = bank.and_then(|pcrs| pcrs.get(&index)) {
                    digests.add(Digest::try_from(digest.clone())?)?;
                    present.push(index);
                }
            }
            read = read
                .with_selection(requested.hash.into(), &to_slots(&present)?);
        }

        Ok((self.update_counter, read.build()?, digests))
    }
}
