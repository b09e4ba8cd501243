use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::Result;

/// Read a text file trying UTF-8, then BOM-marked UTF-16, then Latin-1,
/// finally UTF-8 with replacement characters.
pub fn read_text_with_fallback(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;

    if let Ok(content) = String::from_utf8(bytes.clone()) {
        return Ok(content);
    }

    if let Some(content) = decode_utf16(&bytes) {
        info!("read {} as UTF-16", path.display());
        return Ok(content);
    }

    if bytes.iter().all(|&b| b != 0) {
        // Latin-1 maps every byte to a scalar value, which also covers most
        // CP-1252 content users actually upload.
        let content: String = bytes.iter().map(|&b| b as char).collect();
        info!("read {} as Latin-1", path.display());
        return Ok(content);
    }

    warn!(
        "read {} with replacement characters due to encoding issues",
        path.display()
    );
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 2 || bytes.len() % 2 != 0 {
        return None;
    }
    let (le, start) = match (bytes[0], bytes[1]) {
        (0xFF, 0xFE) => (true, 2),
        (0xFE, 0xFF) => (false, 2),
        _ => return None,
    };
    let units: Vec<u16> = bytes[start..]
        .chunks_exact(2)
        .map(|pair| {
            if le {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn reads_plain_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.txt");
        fs::write(&path, "héllo wörld").unwrap();
        assert_eq!(read_text_with_fallback(&path).unwrap(), "héllo wörld");
    }

    #[test]
    fn reads_utf16_le_with_bom() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("utf16.txt");
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hello".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        fs::write(&path, bytes).unwrap();
        assert_eq!(read_text_with_fallback(&path).unwrap(), "hello");
    }

    #[test]
    fn reads_latin1_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("latin1.txt");
        // "café" in Latin-1: the é is a bare 0xE9, invalid as UTF-8
        fs::write(&path, [0x63, 0x61, 0x66, 0xE9]).unwrap();
        assert_eq!(read_text_with_fallback(&path).unwrap(), "café");
    }

    #[test]
    fn binary_with_nulls_uses_replacement() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("binary.dat");
        fs::write(&path, [0x00, 0xFF, 0x00, 0xFE, 0x41]).unwrap();
        let content = read_text_with_fallback(&path).unwrap();
        assert!(content.contains('A'));
        assert!(content.contains('\u{FFFD}'));
    }
}
