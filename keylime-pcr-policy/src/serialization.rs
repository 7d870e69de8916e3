// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors

use serde::{ser::SerializeMap, Deserialize};
use std::collections::BTreeMap;

pub fn serialize_pcr_map<S>(
    pcrs: &BTreeMap<u32, Vec<u8>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let mut map = serializer.serialize_map(Some(pcrs.len()))?;
    for (index, digest) in pcrs {
        map.serialize_entry(index, &hex::encode(digest))?;
    }
    map.end()
}

pub fn deserialize_pcr_map<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<u32, Vec<u8>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    BTreeMap::<u32, String>::deserialize(deserializer).and_then(|encoded| {
        encoded
            .into_iter()
            .map(|(index, digest)| {
                hex::decode(&digest)
                    .map(|digest| (index, digest))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PcrList {
    List(Vec<u32>),
    Single(u32),
    Text(String),
}

/// Deserializes a list of PCR indices given as a sequence, a single number or
/// a string such as `"0,7"`, `"0 7"` or `"[0, 7]"`.
pub fn deserialize_pcr_list<'de, D>(
    deserializer: D,
) -> Result<Vec<u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match PcrList::deserialize(deserializer)? {
        PcrList::List(pcrs) => Ok(pcrs),
        PcrList::Single(pcr) => Ok(vec![pcr]),
        PcrList::Text(text) => text
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|item| !item.is_empty())
            .map(|item| item.parse::<u32>().map_err(serde::de::Error::custom))
            .collect(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestPcrs {
        #[serde(
            serialize_with = "serialize_pcr_map",
            deserialize_with = "deserialize_pcr_map"
        )]
        pcrs: BTreeMap<u32, Vec<u8>>,
    }

    #[test]
    fn test_serialize_pcr_map() {
        let value = TestPcrs {
            pcrs: BTreeMap::from([(0, vec![0xaa]), (10, vec![0x0b, 0xcd])]),
        };
        let json = serde_json::to_string(&value).unwrap(); //#[allow_ci]
        assert_eq!(json, r#"{"pcrs":{"0":"aa","10":"0bcd"}}"#);
    }

    #[derive(Debug, Deserialize)]
    struct TestList {
        #[serde(deserialize_with = "deserialize_pcr_list")]
        pcrs: Vec<u32>,
    }

    #[test]
    fn test_deserialize_pcr_list() {
        for (json, expected) in [
            (r#"{"pcrs":[0,7]}"#, vec![0, 7]),
            (r#"{"pcrs":7}"#, vec![7]),
            (r#"{"pcrs":"7"}"#, vec![7]),
            (r#"{"pcrs":"0,7, 8"}"#, vec![0, 7, 8]),
            (r#"{"pcrs":"[0 7]"}"#, vec![0, 7]),
            (r#"{"pcrs":""}"#, vec![]),
        ] {
            let parsed: TestList = serde_json::from_str(json).unwrap(); //#[allow_ci]
            assert_eq!(parsed.pcrs, expected, "{json}");
        }
        assert!(
            serde_json::from_str::<TestList>(r#"{"pcrs":"0,x"}"#).is_err()
        );
    }

    #[test]
    fn test_deserialize_bad_hex() {
        let result =
            serde_json::from_str::<TestPcrs>(r#"{"pcrs":{"1":"zz"}}"#);
        assert!(result.is_err());
    }
}
