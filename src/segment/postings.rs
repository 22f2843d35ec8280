//! Postings format with block-based compression
//!
//! Each posting list is laid out as:
//! - a flag byte telling whether locations follow each posting
//! - a skip table: block count, then `(max_doc, block_offset)` per block
//! - the blocks: count, bitpacked doc deltas, bitpacked frequencies and
//!   the optional location stream
//!
//! Doc deltas run across block boundaries, so decoding block `i` starts
//! from the previous block's `max_doc`.

use std::io;

use bytes::Bytes;

use super::types::{Posting, PostingListMeta, BLOCK_SIZE};
use crate::error::CuttleError;
use crate::models::TokenLocation;
use crate::Result;

/// Variable-byte encoding for integers
pub fn encode_vbyte(value: u32, output: &mut Vec<u8>) {
    let mut v = value;
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            output.push(byte | 0x80); // high bit marks the last byte
            break;
        } else {
            output.push(byte);
        }
    }
}

/// Decode a variable-byte encoded integer
pub fn decode_vbyte(input: &[u8], pos: &mut usize) -> io::Result<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;

    loop {
        let Some(&byte) = input.get(*pos) else {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected end of vbyte",
            ));
        };
        *pos += 1;

        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 != 0 {
            return Ok(result);
        }

        shift += 7;
        if shift > 28 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "vbyte value too large",
            ));
        }
    }
}

/// Pack integers with the minimum bit width needed for the largest one
pub fn bitpack_encode(values: &[u32], output: &mut Vec<u8>) {
    let max_val = values.iter().copied().max().unwrap_or(0);
    if values.is_empty() || max_val == 0 {
        output.push(0);
        return;
    }
    let bits_needed = (32 - max_val.leading_zeros()) as u8;
    output.push(bits_needed);

    let mut current: u64 = 0;
    let mut bits_in_current = 0;
    for &value in values {
        current |= (value as u64) << bits_in_current;
        bits_in_current += bits_needed as u32;
        while bits_in_current >= 8 {
            output.push(current as u8);
            current >>= 8;
            bits_in_current -= 8;
        }
    }
    if bits_in_current > 0 {
        output.push(current as u8);
    }
}

/// Decode `count` bitpacked integers
pub fn bitpack_decode(input: &[u8], pos: &mut usize, count: usize) -> io::Result<Vec<u32>> {
    let Some(&bits) = input.get(*pos) else {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "unexpected end of bitpack",
        ));
    };
    *pos += 1;
    let bits = bits as u32;

    if bits == 0 {
        return Ok(vec![0; count]);
    }

    let bytes_needed = (count * bits as usize + 7) / 8;
    if *pos + bytes_needed > input.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough bytes for bitpack",
        ));
    }

    let mut values = Vec::with_capacity(count);
    let mut current: u64 = 0;
    let mut bits_available = 0;
    let mask = (1u64 << bits) - 1;
    for _ in 0..count {
        while bits_available < bits {
            current |= (input[*pos] as u64) << bits_available;
            *pos += 1;
            bits_available += 8;
        }
        values.push((current & mask) as u32);
        current >>= bits;
        bits_available -= bits;
    }
    Ok(values)
}

struct PendingPosting {
    doc: u32,
    frequency: u32,
    locations: Vec<TokenLocation>,
}

/// Writer for the posting lists of one field
pub struct PostingsWriter {
    with_locations: bool,
    data: Vec<u8>,
    block_data: Vec<u8>,
    skips: Vec<(u32, u32)>,
    block: Vec<PendingPosting>,
    last_doc: u32,
    doc_frequency: u32,
    total_term_frequency: u64,
}

impl PostingsWriter {
    pub fn new(with_locations: bool) -> Self {
        Self {
            with_locations,
            data: Vec::new(),
            block_data: Vec::new(),
            skips: Vec::new(),
            block: Vec::with_capacity(BLOCK_SIZE),
            last_doc: 0,
            doc_frequency: 0,
            total_term_frequency: 0,
        }
    }

    /// Start writing a new posting list
    pub fn start_list(&mut self) {
        self.block_data.clear();
        self.skips.clear();
        self.block.clear();
        self.last_doc = 0;
        self.doc_frequency = 0;
        self.total_term_frequency = 0;
    }

    /// Add a posting; docs must arrive in increasing order
    pub fn add(&mut self, doc: u32, frequency: u32, locations: &[TokenLocation]) {
        self.doc_frequency += 1;
        self.total_term_frequency += frequency as u64;
        self.block.push(PendingPosting {
            doc,
            frequency,
            locations: if self.with_locations {
                locations.to_vec()
            } else {
                Vec::new()
            },
        });
        if self.block.len() >= BLOCK_SIZE {
            self.flush_block();
        }
    }

    /// Finish the current list and return its metadata
    pub fn finish_list(&mut self) -> PostingListMeta {
        self.flush_block();

        let offset = self.data.len() as u64;
        self.data.push(self.with_locations as u8);
        encode_vbyte(self.skips.len() as u32, &mut self.data);
        for &(max_doc, block_offset) in &self.skips {
            encode_vbyte(max_doc, &mut self.data);
            encode_vbyte(block_offset, &mut self.data);
        }
        self.data.extend_from_slice(&self.block_data);

        PostingListMeta {
            offset,
            length: self.data.len() as u64 - offset,
            doc_frequency: self.doc_frequency,
            total_term_frequency: self.total_term_frequency,
        }
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn flush_block(&mut self) {
        let Some(last) = self.block.last() else {
            return;
        };
        self.skips.push((last.doc, self.block_data.len() as u32));

        encode_vbyte(self.block.len() as u32, &mut self.block_data);

        let mut prev = self.last_doc;
        let mut deltas = Vec::with_capacity(self.block.len());
        for p in &self.block {
            deltas.push(p.doc - prev);
            prev = p.doc;
        }
        self.last_doc = prev;
        bitpack_encode(&deltas, &mut self.block_data);

        let freqs: Vec<u32> = self.block.iter().map(|p| p.frequency).collect();
        bitpack_encode(&freqs, &mut self.block_data);

        if self.with_locations {
            for p in &self.block {
                encode_vbyte(p.locations.len() as u32, &mut self.block_data);
                let mut prev_pos = 0;
                for loc in &p.locations {
                    encode_vbyte(loc.position.saturating_sub(prev_pos), &mut self.block_data);
                    encode_vbyte(loc.start, &mut self.block_data);
                    encode_vbyte(loc.end.saturating_sub(loc.start), &mut self.block_data);
                    prev_pos = loc.position;
                }
            }
        }

        self.block.clear();
    }
}

/// Cursor over one posting list. Owns a cheap handle to the segment
/// bytes so it can outlive the borrow that created it.
pub struct PostingCursor {
    data: Bytes,
    with_locations: bool,
    skips: Vec<(u32, usize)>,
    blocks_start: usize,
    next_block: usize,
    block: Vec<Posting>,
    block_pos: usize,
}

fn corrupt(e: io::Error) -> CuttleError {
    CuttleError::CorruptSegment(format!("postings: {}", e))
}

impl PostingCursor {
    pub fn new(data: Bytes) -> Result<Self> {
        let mut pos = 0;
        let with_locations = match data.first() {
            Some(&flag) => flag == 1,
            None => {
                return Ok(Self::empty());
            }
        };
        pos += 1;

        let block_count = decode_vbyte(&data, &mut pos).map_err(corrupt)? as usize;
        let mut skips = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let max_doc = decode_vbyte(&data, &mut pos).map_err(corrupt)?;
            let offset = decode_vbyte(&data, &mut pos).map_err(corrupt)? as usize;
            skips.push((max_doc, offset));
        }

        Ok(Self {
            data,
            with_locations,
            skips,
            blocks_start: pos,
            next_block: 0,
            block: Vec::new(),
            block_pos: 0,
        })
    }

    /// A cursor over nothing
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            with_locations: false,
            skips: Vec::new(),
            blocks_start: 0,
            next_block: 0,
            block: Vec::new(),
            block_pos: 0,
        }
    }

    /// Rewind to the first posting
    pub fn reset(&mut self) {
        self.next_block = 0;
        self.block.clear();
        self.block_pos = 0;
    }

    pub fn next(&mut self) -> Result<Option<Posting>> {
        if self.block_pos >= self.block.len() && !self.load_block(self.next_block)? {
            return Ok(None);
        }
        let posting = std::mem::replace(&mut self.block[self.block_pos], Posting::new(0, 0));
        self.block_pos += 1;
        Ok(Some(posting))
    }

    /// First posting with `doc >= target`, moving forward only
    pub fn seek(&mut self, target: u32) -> Result<Option<Posting>> {
        let in_current = self
            .block
            .last()
            .map(|p| self.block_pos < self.block.len() && p.doc >= target)
            .unwrap_or(false);

        if !in_current {
            let mut idx = self.next_block;
            while idx < self.skips.len() && self.skips[idx].0 < target {
                idx += 1;
            }
            if !self.load_block(idx)? {
                return Ok(None);
            }
        }

        while let Some(p) = self.next()? {
            if p.doc >= target {
                return Ok(Some(p));
            }
        }
        Ok(None)
    }

    fn load_block(&mut self, idx: usize) -> Result<bool> {
        self.block.clear();
        self.block_pos = 0;
        let Some(&(_, offset)) = self.skips.get(idx) else {
            self.next_block = self.skips.len();
            return Ok(false);
        };
        let base = if idx == 0 { 0 } else { self.skips[idx - 1].0 };

        let data = &self.data[..];
        let mut pos = self.blocks_start + offset;
        let count = decode_vbyte(data, &mut pos).map_err(corrupt)? as usize;
        let deltas = bitpack_decode(data, &mut pos, count).map_err(corrupt)?;
        let freqs = bitpack_decode(data, &mut pos, count).map_err(corrupt)?;

        let mut doc = base;
        for (delta, frequency) in deltas.into_iter().zip(freqs) {
            doc += delta;
            let mut posting = Posting::new(doc, frequency);
            if self.with_locations {
                let n = decode_vbyte(data, &mut pos).map_err(corrupt)?;
                let mut position = 0;
                for _ in 0..n {
                    position += decode_vbyte(data, &mut pos).map_err(corrupt)?;
                    let start = decode_vbyte(data, &mut pos).map_err(corrupt)?;
                    let len = decode_vbyte(data, &mut pos).map_err(corrupt)?;
                    posting.locations.push(TokenLocation {
                        position,
                        start,
                        end: start + len,
                    });
                }
            }
            self.block.push(posting);
        }

        self.next_block = idx + 1;
        Ok(!self.block.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_list(docs: impl Iterator<Item = u32>, with_locations: bool) -> (Bytes, PostingListMeta) {
        let mut writer = PostingsWriter::new(with_locations);
        writer.start_list();
        for doc in docs {
            let loc = TokenLocation {
                position: doc % 7,
                start: doc,
                end: doc + 3,
            };
            writer.add(doc, doc % 5 + 1, &[loc]);
        }
        let meta = writer.finish_list();
        let data = Bytes::from(writer.into_data());
        let slice = data.slice(meta.offset as usize..(meta.offset + meta.length) as usize);
        (slice, meta)
    }

    #[test]
    fn test_vbyte_encoding() {
        let mut output = Vec::new();
        for v in [0, 127, 128, 16383, 1_000_000] {
            encode_vbyte(v, &mut output);
        }
        let mut pos = 0;
        for v in [0, 127, 128, 16383, 1_000_000] {
            assert_eq!(decode_vbyte(&output, &mut pos).unwrap(), v);
        }
        assert!(decode_vbyte(&output, &mut pos).is_err());
    }

    #[test]
    fn test_bitpack_large_values() {
        let values = vec![1000, 2000, 3000, 4000, 0];
        let mut output = Vec::new();
        bitpack_encode(&values, &mut output);
        let mut pos = 0;
        assert_eq!(bitpack_decode(&output, &mut pos, values.len()).unwrap(), values);
    }

    #[test]
    fn test_multi_block_list_decodes_exact_docs() {
        let (data, meta) = write_list((0..300).map(|i| i * 2), false);
        assert_eq!(meta.doc_frequency, 300);

        let mut cursor = PostingCursor::new(data).unwrap();
        let mut seen = Vec::new();
        while let Some(p) = cursor.next().unwrap() {
            seen.push(p.doc);
        }
        assert_eq!(seen, (0..300).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_seek_across_blocks() {
        let (data, _) = write_list((0..300).map(|i| i * 2), false);
        let mut cursor = PostingCursor::new(data).unwrap();

        assert_eq!(cursor.seek(401).unwrap().map(|p| p.doc), Some(402));
        assert_eq!(cursor.next().unwrap().map(|p| p.doc), Some(404));
        assert_eq!(cursor.seek(405).unwrap().map(|p| p.doc), Some(406));
        assert!(cursor.seek(10_000).unwrap().is_none());

        cursor.reset();
        assert_eq!(cursor.next().unwrap().map(|p| p.doc), Some(0));
    }

    #[test]
    fn test_locations_survive() {
        let (data, _) = write_list([3u32, 9, 200].into_iter(), true);
        let mut cursor = PostingCursor::new(data).unwrap();
        let p = cursor.seek(9).unwrap().unwrap();
        assert_eq!(p.frequency, 9 % 5 + 1);
        assert_eq!(
            p.locations,
            vec![TokenLocation {
                position: 2,
                start: 9,
                end: 12
            }]
        );
    }
}
