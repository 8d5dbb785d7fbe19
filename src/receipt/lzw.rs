//! LZW codec used for the compressed form of a [`LogsBloom`](super::logs_bloom::LogsBloom).
//!
//! Codes are 12 bits wide. The dictionary starts with the 256 single-byte strings and grows by one
//! entry per emitted code until it holds 4096 entries, at which point it resets to its initial
//! state. Every code is emitted as a big-endian pair of bytes.

use std::collections::HashMap;

const INITIAL_CODES: u16 = 256;
const MAX_CODES: u16 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LzwError {
    OddLength,
    InvalidCode { position: usize, code: u16 },
}

fn initial_dictionary() -> HashMap<Vec<u8>, u16> {
    (0..INITIAL_CODES).map(|b| (vec![b as u8], b)).collect()
}

pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::new();
    if input.is_empty() {
        return output;
    }
    let mut dictionary = initial_dictionary();
    let mut next = INITIAL_CODES;
    let mut current: Vec<u8> = Vec::new();

    for &byte in input {
        current.push(byte);
        if dictionary.contains_key(&current) {
            continue;
        }
        let extended = current.clone();
        current.pop();
        output.extend_from_slice(&dictionary[&current].to_be_bytes());
        if next < MAX_CODES {
            dictionary.insert(extended, next);
            next += 1;
        } else {
            dictionary = initial_dictionary();
            next = INITIAL_CODES;
        }
        current.clear();
        current.push(byte);
    }
    output.extend_from_slice(&dictionary[&current].to_be_bytes());
    output
}

pub fn decompress(input: &[u8]) -> Result<Vec<u8>, LzwError> {
    if input.len() % 2 != 0 {
        return Err(LzwError::OddLength);
    }
    let reset = || -> Vec<Vec<u8>> { (0..INITIAL_CODES).map(|b| vec![b as u8]).collect() };
    let mut dictionary = reset();
    let mut previous: Option<Vec<u8>> = None;
    let mut output = Vec::new();

    for (position, pair) in input.chunks(2).enumerate() {
        let code = u16::from_be_bytes([pair[0], pair[1]]);
        let invalid = LzwError::InvalidCode { position, code };
        let entry = match previous.take() {
            None => dictionary.get(code as usize).cloned().ok_or(invalid)?,
            Some(prev) if (dictionary.len() as u16) < MAX_CODES => {
                let entry = match dictionary.get(code as usize) {
                    Some(entry) => entry.clone(),
                    None if code as usize == dictionary.len() => {
                        let mut entry = prev.clone();
                        entry.push(prev[0]);
                        entry
                    }
                    None => return Err(invalid),
                };
                let mut added = prev;
                added.push(entry[0]);
                dictionary.push(added);
                entry
            }
            Some(_) => {
                dictionary = reset();
                dictionary.get(code as usize).cloned().ok_or(invalid)?
            }
        };
        output.extend_from_slice(&entry);
        previous = Some(entry);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repetitive_input_shrinks_and_restores() {
        let mut input = vec![0u8; 256];
        input[3] = 0x10;
        input[200] = 0x80;
        let compressed = compress(&input);
        assert!(compressed.len() < input.len());
        assert_eq!(decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn dictionary_reset_is_mirrored() {
        // Enough distinct pairs to fill the dictionary several times.
        let input: Vec<u8> = (0..20_000u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        assert_eq!(decompress(&compress(&input)).unwrap(), input);
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert_eq!(decompress(&[]).unwrap(), Vec::<u8>::new());
        assert_eq!(decompress(&[0x00]), Err(LzwError::OddLength));
        assert!(matches!(
            decompress(&[0x0f, 0xff]),
            Err(LzwError::InvalidCode { position: 0, .. })
        ));
    }
}
