use std::collections::BTreeMap;
use std::path::Path;

use fxhash::FxHashMap;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::error::ProtocolError;

/// Expected measurement counts per protocol, derived once per run by parsing
/// each mapped protocol XML and counting its receiver (`Rx`) elements.
///
/// A task whose protocol is not in the map simply has no nominal count; the
/// catalog then reports 0 and a completion percentage of 0.
#[derive(Debug, Clone, Default)]
pub struct NominalCounts {
    counts: FxHashMap<String, u64>,
}

impl NominalCounts {
    /// Build the lookup table from a protocol-name -> XML-file map.
    ///
    /// A mapped file that is missing or unparseable is a configuration error
    /// and fails the run; silently reporting 0 for a protocol the operator
    /// explicitly listed would corrupt every completion percentage downstream.
    pub fn load(
        protocols_path: &Path,
        protocol_map: &BTreeMap<String, String>,
    ) -> Result<Self, ProtocolError> {
        let mut counts = FxHashMap::default();
        for (protocol, file) in protocol_map {
            let path = protocols_path.join(file);
            if !path.exists() {
                return Err(ProtocolError::BadFilePath(path));
            }
            let content = std::fs::read_to_string(&path)?;
            let n = count_rx_elements(&content)
                .map_err(|source| ProtocolError::ParsingError { path, source })?;
            counts.insert(protocol.clone(), n);
        }
        Ok(Self { counts })
    }

    /// Nominal measurement count for a protocol; 0 if unknown.
    pub fn get(&self, protocol: &str) -> u64 {
        self.counts.get(protocol).copied().unwrap_or(0)
    }
}

/// Count `Rx` elements in a protocol definition.
fn count_rx_elements(xml: &str) -> Result<u64, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut count = 0u64;
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                if e.name().as_ref() == b"Rx" {
                    count += 1;
                }
            }
            Event::Eof => break,
            _ => (),
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_protocol(dir: &Path, name: &str, n_rx: usize) {
        let mut xml = String::from("<Protocol><Name>test</Name><SpreadFile/>");
        for i in 0..n_rx {
            xml.push_str(&format!("<Measure><Tx>1 2</Tx><Rx>{i}</Rx></Measure>"));
        }
        xml.push_str("</Protocol>");
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(xml.as_bytes()).unwrap();
    }

    #[test]
    fn test_rx_count() {
        let dir = tempfile::tempdir().unwrap();
        write_protocol(dir.path(), "GradientXL_64_DISKO.xml", 1000);

        let mut map = BTreeMap::new();
        map.insert(
            String::from("2x32gradientXL_1"),
            String::from("GradientXL_64_DISKO.xml"),
        );
        let counts = NominalCounts::load(dir.path(), &map).unwrap();
        assert_eq!(counts.get("2x32gradientXL_1"), 1000);
        assert_eq!(counts.get("not_mapped"), 0);
    }

    #[test]
    fn test_missing_protocol_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = BTreeMap::new();
        map.insert(String::from("p"), String::from("absent.xml"));
        let result = NominalCounts::load(dir.path(), &map);
        assert!(matches!(result, Err(ProtocolError::BadFilePath(_))));
    }

    #[test]
    fn test_empty_rx_elements_counted() {
        // Self-closing receiver elements still count.
        assert_eq!(count_rx_elements("<P><Rx/><Rx>1</Rx></P>").unwrap(), 2);
    }
}
