// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors

use crate::{
    algorithms::HashAlgorithm,
    error::{PcrError, Result},
    serialization::*,
};
use openssl::{
    error::ErrorStack,
    hash::{Hasher, MessageDigest},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    convert::{TryFrom, TryInto},
};
use tss_esapi::{
    structures::{
        DigestList, PcrSelection as TssPcrSelection, PcrSelectionList,
        PcrSelectionListBuilder, PcrSlot,
    },
    WrapperErrorKind,
};

/// Number of PCRs in a bank. This is the minimum the TPM 2.0 specification
/// requires and the only bank size supported.
pub const NUM_PCRS: u32 = 24;

/// Maximum number of PCRs a single TPM2_PCR_Read returns.
pub const MAX_PCRS_PER_READ: usize = 8;

/// Hash algorithm of the PCR bank used when certifying PCRs.
pub const CERTIFY_HASH_ALG: HashAlgorithm = HashAlgorithm::Sha256;

/// A list of PCR indices in one bank.
///
/// The indices keep the order given by the caller and may contain
/// duplicates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrSelection {
    pub hash: HashAlgorithm,
    pub pcrs: Vec<u32>,
}

impl PcrSelection {
    pub fn new(hash: HashAlgorithm, pcrs: impl Into<Vec<u32>>) -> Self {
        PcrSelection {
            hash,
            pcrs: pcrs.into(),
        }
    }

    /// Selects every PCR of the bank.
    pub fn full(hash: HashAlgorithm) -> Self {
        PcrSelection {
            hash,
            pcrs: (0..NUM_PCRS).collect(),
        }
    }

    /// Builds a selection from a mask where the LSB corresponds to PCR0.
    ///
    /// For example, PCRs 15 and 22 are represented by the mask
    /// 0b010000001000000000000000 (0x408000).
    pub fn from_mask(hash: HashAlgorithm, mask: u32) -> Result<Self> {
        if mask >> NUM_PCRS != 0 {
            return Err(PcrError::MalformedPcrSelectionMask(format!(
                "only pcrs 0-{} can be selected, but mask {mask:#x} included pcr {}",
                NUM_PCRS - 1,
                31 - mask.leading_zeros()
            )));
        }
        let pcrs = (0..NUM_PCRS).filter(|i| mask & (1 << i) != 0).collect();
        Ok(PcrSelection { hash, pcrs })
    }

    pub fn is_empty(&self) -> bool {
        self.pcrs.is_empty()
    }

    /// Splits the selected indices in consecutive groups small enough to be
    /// read with a single TPM command.
    pub fn chunks(&self) -> impl Iterator<Item = &[u32]> {
        self.pcrs.chunks(MAX_PCRS_PER_READ)
    }
}

impl TryFrom<&TssPcrSelection> for PcrSelection {
    type Error = PcrError;

    fn try_from(selection: &TssPcrSelection) -> Result<Self> {
        let hash = selection.hashing_algorithm().try_into()?;
        let pcrs = selection
            .selected()
            .into_iter()
            .map(slot_index)
            .collect();
        Ok(PcrSelection { hash, pcrs })
    }
}

fn slot_index(slot: PcrSlot) -> u32 {
    let mask: u32 = slot.into();
    mask.trailing_zeros()
}

fn index_slot(index: u32) -> Result<PcrSlot> {
    1u32.checked_shl(index)
        .ok_or(tss_esapi::Error::WrapperError(WrapperErrorKind::InvalidParam))
        .and_then(PcrSlot::try_from)
        .map_err(|source| PcrError::PcrSelectionBuild { source })
}

/// Builds the TPM selection list for a group of PCRs of a bank.
pub(crate) fn selection_list(
    hash: HashAlgorithm,
    pcrs: &[u32],
) -> Result<PcrSelectionList> {
    let slots = pcrs
        .iter()
        .map(|&index| index_slot(index))
        .collect::<Result<Vec<PcrSlot>>>()?;
    PcrSelectionListBuilder::new()
        .with_selection(hash.into(), &slots)
        .build()
        .map_err(|source| PcrError::PcrSelectionBuild { source })
}

/// Pairs each PCR selected in `selection_list` with its digest.
///
/// The TPM returns the digests in ascending PCR order, bank after bank.
/// Only the digests belonging to the `hash` bank are kept.
pub(crate) fn pcr_digests(
    hash: HashAlgorithm,
    selection_list: &PcrSelectionList,
    digests: &DigestList,
) -> Result<Vec<(u32, Vec<u8>)>> {
    let mut digests = digests.value().iter();
    let mut result = Vec::new();
    for selection in selection_list.get_selections() {
        let same_bank = HashAlgorithm::try_from(selection.hashing_algorithm())
            .map(|alg| alg == hash)
            .unwrap_or(false);
        for slot in selection.selected() {
            let digest = digests.next().ok_or_else(|| {
                PcrError::PcrSelectionBuild {
                    source: tss_esapi::Error::WrapperError(
                        WrapperErrorKind::InconsistentParams,
                    ),
                }
            })?;
            if same_bank {
                result.push((slot_index(slot), digest.value().to_vec()));
            }
        }
    }
    Ok(result)
}

#[derive(Deserialize)]
struct RawPcrValues {
    hash: HashAlgorithm,
    #[serde(deserialize_with = "deserialize_pcr_map")]
    pcrs: BTreeMap<u32, Vec<u8>>,
}

impl TryFrom<RawPcrValues> for PcrValues {
    type Error = PcrError;

    fn try_from(raw: RawPcrValues) -> Result<Self> {
        PcrValues::new(raw.hash, raw.pcrs)
    }
}

/// The values of a set of PCRs of one bank.
///
/// Every digest has the size of the bank's hash algorithm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPcrValues")]
pub struct PcrValues {
    hash: HashAlgorithm,
    #[serde(serialize_with = "serialize_pcr_map")]
    pcrs: BTreeMap<u32, Vec<u8>>,
}

impl PcrValues {
    pub fn new(
        hash: HashAlgorithm,
        pcrs: impl IntoIterator<Item = (u32, Vec<u8>)>,
    ) -> Result<Self> {
        let mut values = PcrValues::empty(hash);
        for (index, digest) in pcrs {
            values.try_insert(index, digest)?;
        }
        Ok(values)
    }

    pub(crate) fn empty(hash: HashAlgorithm) -> Self {
        PcrValues {
            hash,
            pcrs: BTreeMap::new(),
        }
    }

    // A PCR read twice keeps the last digest
    pub(crate) fn try_insert(
        &mut self,
        index: u32,
        digest: Vec<u8>,
    ) -> Result<()> {
        if digest.len() != self.hash.digest_size() {
            return Err(PcrError::InvalidDigestSize {
                index,
                hash: self.hash,
                expected: self.hash.digest_size(),
                got: digest.len(),
            });
        }
        let _ = self.pcrs.insert(index, digest);
        Ok(())
    }

    pub fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    pub fn pcrs(&self) -> &BTreeMap<u32, Vec<u8>> {
        &self.pcrs
    }

    pub fn get(&self, index: u32) -> Option<&[u8]> {
        self.pcrs.get(&index).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.pcrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pcrs.len()
    }

    /// The selection of PCRs present in this set, in ascending order.
    pub fn selection(&self) -> PcrSelection {
        PcrSelection {
            hash: self.hash,
            pcrs: self.pcrs.keys().copied().collect(),
        }
    }

    /// Computes the composite digest of the set: the hash, with the bank's
    /// algorithm, of the concatenated PCR digests in ascending PCR order.
    ///
    /// This is the value a PolicyPCR assertion binds a sealed object to.
    pub fn pcr_digest(&self) -> Result<Vec<u8>> {
        let hasher_error = |source: ErrorStack| PcrError::OpenSSLHasher {
            hash: self.hash,
            source,
        };
        let mut hasher =
            Hasher::new(MessageDigest::from(self.hash)).map_err(hasher_error)?;
        for digest in self.pcrs.values() {
            hasher.update(digest).map_err(hasher_error)?;
        }
        Ok(hasher.finish().map_err(hasher_error)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::hash::hash;
    use tss_esapi::{
        interface_types::algorithm::HashingAlgorithm, structures::Digest,
    };

    #[test]
    fn test_full_selection() {
        let sel = PcrSelection::full(HashAlgorithm::Sha256);
        assert_eq!(sel.pcrs.len(), NUM_PCRS as usize);
        assert_eq!(sel.pcrs.first(), Some(&0));
        assert_eq!(sel.pcrs.last(), Some(&23));
    }

    #[test]
    fn test_from_mask() {
        let sel = PcrSelection::from_mask(HashAlgorithm::Sha1, 0x0).unwrap(); //#[allow_ci]
        assert!(sel.is_empty());

        let sel =
            PcrSelection::from_mask(HashAlgorithm::Sha1, 0x408000).unwrap(); //#[allow_ci]
        assert_eq!(sel.pcrs, vec![15, 22]);

        let sel =
            PcrSelection::from_mask(HashAlgorithm::Sha1, 0xffffff).unwrap(); //#[allow_ci]
        assert_eq!(sel, PcrSelection::full(HashAlgorithm::Sha1));

        let r = PcrSelection::from_mask(HashAlgorithm::Sha1, 1 << 24);
        assert!(matches!(r, Err(PcrError::MalformedPcrSelectionMask(_))));
    }

    #[test]
    fn test_chunks_keep_order() {
        let sel = PcrSelection::new(
            HashAlgorithm::Sha256,
            vec![9, 1, 1, 23, 0, 4, 5, 6, 7, 2],
        );
        let chunks: Vec<&[u32]> = sel.chunks().collect();
        assert_eq!(
            chunks,
            vec![&[9, 1, 1, 23, 0, 4, 5, 6][..], &[7, 2][..]]
        );
    }

    #[test]
    fn test_selection_list_round_trip() {
        let list = selection_list(HashAlgorithm::Sha256, &[8, 0, 8, 23])
            .unwrap(); //#[allow_ci]
        let selections = list.get_selections();
        assert_eq!(selections.len(), 1);
        assert_eq!(
            selections[0].hashing_algorithm(),
            HashingAlgorithm::Sha256
        );
        let decoded = PcrSelection::try_from(&selections[0]).unwrap(); //#[allow_ci]
        assert_eq!(decoded.pcrs, vec![0, 8, 23]);
    }

    #[test]
    fn test_selection_list_index_out_of_range() {
        let r = selection_list(HashAlgorithm::Sha256, &[0, 40]);
        assert!(matches!(r, Err(PcrError::PcrSelectionBuild { .. })));
    }

    #[test]
    fn test_pcr_digests_pairs_in_order() {
        let list = selection_list(HashAlgorithm::Sha1, &[3, 1]).unwrap(); //#[allow_ci]
        let mut digests = DigestList::new();
        digests
            .add(Digest::try_from(vec![0x11; 20]).unwrap()) //#[allow_ci]
            .unwrap(); //#[allow_ci]
        digests
            .add(Digest::try_from(vec![0x33; 20]).unwrap()) //#[allow_ci]
            .unwrap(); //#[allow_ci]
        let pairs =
            pcr_digests(HashAlgorithm::Sha1, &list, &digests).unwrap(); //#[allow_ci]
        assert_eq!(pairs, vec![(1, vec![0x11; 20]), (3, vec![0x33; 20])]);

        let other =
            pcr_digests(HashAlgorithm::Sha256, &list, &digests).unwrap(); //#[allow_ci]
        assert!(other.is_empty());
    }

    #[test]
    fn test_values_reject_wrong_digest_size() {
        let r = PcrValues::new(HashAlgorithm::Sha256, [(7, vec![0xbb; 20])]);
        assert!(matches!(
            r,
            Err(PcrError::InvalidDigestSize {
                index: 7,
                expected: 32,
                got: 20,
                ..
            })
        ));
    }

    #[test]
    fn test_pcr_digest() {
        let values = PcrValues::new(
            HashAlgorithm::Sha256,
            [(7, vec![0x07; 32]), (0, vec![0x00; 32])],
        )
        .unwrap(); //#[allow_ci]

        let mut concat = vec![0x00; 32];
        concat.extend(vec![0x07; 32]);
        let expected = hash(MessageDigest::sha256(), &concat).unwrap(); //#[allow_ci]

        assert_eq!(values.pcr_digest().unwrap(), expected.to_vec()); //#[allow_ci]
        assert_eq!(values.selection().pcrs, vec![0, 7]);
    }

    #[test]
    fn test_values_json() {
        let values =
            PcrValues::new(HashAlgorithm::Sha1, [(2, vec![0xab; 20])]).unwrap(); //#[allow_ci]
        let json = serde_json::to_string(&values).unwrap(); //#[allow_ci]
        assert_eq!(
            json,
            format!(r#"{{"hash":"sha1","pcrs":{{"2":"{}"}}}}"#, "ab".repeat(20))
        );
        let parsed: PcrValues = serde_json::from_str(&json).unwrap(); //#[allow_ci]
        assert_eq!(parsed, values);

        // Digest sizes are checked when deserializing as well
        let bad = r#"{"hash":"sha256","pcrs":{"2":"abab"}}"#;
        assert!(serde_json::from_str::<PcrValues>(bad).is_err());
    }
}
