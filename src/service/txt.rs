//! TXT record metadata (`key=value` strings).
//!
//! TXT content is advisory, so decoding never fails: strings without a `=`
//! are skipped.

use std::collections::BTreeMap;

pub type TxtMap = BTreeMap<String, String>;

/// One `key=value` string per entry, in key order.
pub fn encode(txt: &TxtMap) -> Vec<Vec<u8>> {
    txt.iter()
        .map(|(key, value)| format!("{key}={value}").into_bytes())
        .collect()
}

/// Splits every string on its first `=`. Later duplicates of a key win.
pub fn decode(strings: &[Vec<u8>]) -> TxtMap {
    strings
        .iter()
        .filter_map(|raw| {
            let entry = String::from_utf8_lossy(raw);
            let (key, value) = entry.split_once('=')?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Required TXT key/value pairs for browsing.
///
/// Keys containing `binary` are dropped when the filter is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxtFilter(TxtMap);

impl TxtFilter {
    pub fn new(required: TxtMap) -> Self {
        Self(
            required
                .into_iter()
                .filter(|(key, _)| !key.contains("binary"))
                .collect(),
        )
    }

    /// True when every required pair is present with an equal value.
    pub fn matches(&self, txt: &TxtMap) -> bool {
        self.0
            .iter()
            .all(|(key, value)| txt.get(key) == Some(value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
