use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A TTM file an ADS script pulls in, with the environment id the scene
/// script uses to address it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtmReference {
    pub id: u16,
    pub name: String,
}

/// Scene script payload as extracted from its container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdsResource {
    #[serde(default)]
    pub scripts: Vec<TtmReference>,
    pub words: Vec<u16>,
}

/// Animation script payload as extracted from its container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtmResource {
    /// Frame count from the container header, if it carried one.
    #[serde(default)]
    pub frames: Option<u16>,
    pub words: Vec<u16>,
}

impl AdsResource {
    pub fn bytes(&self) -> Vec<u8> {
        words_to_bytes(&self.words)
    }
}

impl TtmResource {
    pub fn bytes(&self) -> Vec<u8> {
        words_to_bytes(&self.words)
    }
}

pub fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

/// JSON collection of already-extracted scripts keyed by filename.
///
/// Stands in for the resource volumes: the interpreter only ever asks for
/// a script by name and receives its bytecode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptBundle {
    #[serde(default)]
    pub ads: BTreeMap<String, AdsResource>,
    #[serde(default)]
    pub ttm: BTreeMap<String, TtmResource>,
}

impl ScriptBundle {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading script bundle {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("parsing script bundle {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn write_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing script bundle")?;
        fs::write(path, json).with_context(|| format!("writing script bundle {}", path.display()))
    }

    pub fn find_ads(&self, name: &str) -> Option<&AdsResource> {
        self.ads
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, resource)| resource)
    }

    pub fn find_ttm(&self, name: &str) -> Option<&TtmResource> {
        self.ttm
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, resource)| resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_bundle_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "ads": {{ "INTRO.ADS": {{ "scripts": [{{ "id": 1, "name": "intro.ttm" }}], "words": [1, 65535] }} }},
                "ttm": {{ "INTRO.TTM": {{ "words": [4080] }} }}
            }}"#
        )
        .unwrap();

        let bundle = ScriptBundle::from_json_file(file.path()).unwrap();
        let ads = bundle.find_ads("intro.ads").expect("case-insensitive lookup");
        assert_eq!(ads.scripts[0].name, "intro.ttm");
        assert_eq!(ads.bytes(), vec![1, 0, 0xff, 0xff]);
        let ttm = bundle.find_ttm(&ads.scripts[0].name).unwrap();
        assert_eq!(ttm.frames, None);
        assert_eq!(ttm.bytes(), vec![0xf0, 0x0f]);
    }
}
