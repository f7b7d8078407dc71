//! Memory image formats.
//!
//! Text images hold one `%08x %08x` address/data pair per line. Binary
//! images are raw little-endian 32-bit words.

use std::io::{BufRead, ErrorKind, Read, Write};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{EdclError, Result};
use crate::protocol::{MAX_SND_SZ, NWORD_MAX_SND};

/// One address/data pair from a text image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageWord {
    pub address: u32,
    pub data: u32,
}

/// Contiguous run of words that can go out as one write session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordGroup {
    pub address: u32,
    pub words: Vec<u32>,
}

fn parse_hex(field: &str, line: usize) -> Result<u32> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    u32::from_str_radix(digits, 16).map_err(|e| EdclError::ImageParse {
        line,
        message: format!("bad hex field {:?}: {}", field, e),
    })
}

/// Parse a text image. Blank lines are skipped.
pub fn parse_text_image<R: BufRead>(reader: R) -> Result<Vec<ImageWord>> {
    let mut words = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let number = index + 1;
        let mut fields = line.split_whitespace();
        let (address, data) = match (fields.next(), fields.next(), fields.next()) {
            (None, _, _) => continue,
            (Some(a), Some(d), None) => (parse_hex(a, number)?, parse_hex(d, number)?),
            _ => {
                return Err(EdclError::ImageParse {
                    line: number,
                    message: "expected `<address> <data>`".to_string(),
                });
            }
        };
        words.push(ImageWord { address, data });
    }
    Ok(words)
}

/// Group consecutive entries into runs of contiguous addresses, each at
/// most one write chunk long.
pub fn group_words(words: &[ImageWord]) -> Vec<WordGroup> {
    let mut groups: Vec<WordGroup> = Vec::new();
    for word in words {
        match groups.last_mut() {
            Some(group)
                if group.words.len() < NWORD_MAX_SND
                    && group
                        .address
                        .checked_add(4 * group.words.len() as u32)
                        == Some(word.address) =>
            {
                group.words.push(word.data);
            }
            _ => groups.push(WordGroup {
                address: word.address,
                words: vec![word.data],
            }),
        }
    }
    groups
}

/// Write words starting at `address` as text image lines.
pub fn write_text_words<W: Write>(writer: &mut W, address: u32, words: &[u32]) -> Result<()> {
    for (i, data) in words.iter().enumerate() {
        writeln!(writer, "{:08x} {:08x}", address.wrapping_add(4 * i as u32), data)?;
    }
    Ok(())
}

/// Fill `words` from a little-endian binary image. A short read at end of
/// file leaves the rest zero. Returns the number of file bytes consumed.
pub fn read_le_words<R: Read>(reader: &mut R, words: &mut [u32]) -> Result<usize> {
    let mut bytes = [0u8; MAX_SND_SZ];
    let bytes = &mut bytes[..words.len() * 4];
    let mut filled = 0;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    LittleEndian::read_u32_into(bytes, words);
    Ok(filled)
}

pub fn words_to_le_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_text_image() {
        let text = "40000000 deadbeef\n\n40000004 0000000a\n0x40000008 0XFF\n";
        let words = parse_text_image(Cursor::new(text)).unwrap();
        assert_eq!(
            words,
            vec![
                ImageWord { address: 0x4000_0000, data: 0xDEAD_BEEF },
                ImageWord { address: 0x4000_0004, data: 0xA },
                ImageWord { address: 0x4000_0008, data: 0xFF },
            ]
        );
    }

    #[test]
    fn test_parse_errors_report_line() {
        let err = parse_text_image(Cursor::new("00000000 00000001\nzz 1\n")).unwrap_err();
        assert!(matches!(err, EdclError::ImageParse { line: 2, .. }));

        let err = parse_text_image(Cursor::new("00000000\n")).unwrap_err();
        assert!(matches!(err, EdclError::ImageParse { line: 1, .. }));
    }

    #[test]
    fn test_grouping_splits_on_gap_and_capacity() {
        let mut words: Vec<ImageWord> = (0..70)
            .map(|i| ImageWord { address: 0x1000 + 4 * i, data: i })
            .collect();
        words.push(ImageWord { address: 0x8000, data: 1 });

        let groups = group_words(&words);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].words.len(), 64);
        assert_eq!(groups[1].address, 0x1000 + 4 * 64);
        assert_eq!(groups[1].words.len(), 6);
        assert_eq!(groups[2], WordGroup { address: 0x8000, words: vec![1] });
    }

    #[test]
    fn test_write_text_words() {
        let mut out = Vec::new();
        write_text_words(&mut out, 0x8000_0000, &[1, 0xCAFE]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "80000000 00000001\n80000004 0000cafe\n"
        );
    }

    #[test]
    fn test_binary_blocks_pad_the_tail() {
        let mut reader = Cursor::new(vec![0x78, 0x56, 0x34, 0x12, 0xAA]);

        let mut words = [0xFFFF_FFFFu32; 2];
        assert_eq!(read_le_words(&mut reader, &mut words).unwrap(), 5);
        assert_eq!(words, [0x1234_5678, 0x0000_00AA]);
        assert_eq!(&words_to_le_bytes(&words)[..5], &[0x78, 0x56, 0x34, 0x12, 0xAA]);

        let mut words = [0xFFFF_FFFFu32; 1];
        assert_eq!(read_le_words(&mut reader, &mut words).unwrap(), 0);
        assert_eq!(words, [0]);
    }
}
